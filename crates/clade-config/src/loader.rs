// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::schema::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `$HOME_DIR`, default `~/.clade` (§6), overridable via `HOME_DIR_OVERRIDE`.
pub fn default_home_dir() -> PathBuf {
    if let Ok(over) = std::env::var("HOME_DIR_OVERRIDE") {
        if !over.is_empty() {
            return PathBuf::from(shellexpand::tilde(&over).into_owned());
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clade")
}

/// Load `config.json` from `$HOME_DIR`, optionally merging an explicit
/// override path on top (`--config` equivalent). A missing base file is not
/// fatal — it synthesizes [`Config::default`] — matching §4.0 ("caller is
/// told to run the setup wizard" is the binary crate's concern, not this
/// loader's).
///
/// An explicit `path_override` that does not exist or fails to parse IS an
/// error: unlike the base file, the caller asked for that file by name.
pub fn load(path_override: Option<&Path>) -> Result<Config, ConfigError> {
    let base_path = default_home_dir().join("config.json");
    let mut merged = serde_json::Value::Object(serde_json::Map::new());

    if base_path.is_file() {
        debug!(path = %base_path.display(), "loading base config");
        merge_in(&mut merged, &base_path)?;
    }

    if let Some(p) = path_override {
        debug!(path = %p.display(), "loading explicit config override");
        merge_in(&mut merged, p)?;
    }

    if matches!(&merged, serde_json::Value::Object(m) if m.is_empty()) {
        return Ok(Config::default());
    }

    let config: Config =
        serde_json::from_value(merged).map_err(|source| ConfigError::Parse {
            path: path_override.map(Path::to_path_buf).unwrap_or(base_path),
            source,
        })?;
    Ok(config)
}

/// Writes `config` back to `$HOME_DIR/config.json`, creating `$HOME_DIR` if
/// needed. Used by `clade-registry` to persist agent registration and by the
/// admin tool server's config-mutation path (§4.4, §4.6).
pub fn save(config: &Config, home_dir: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(home_dir).map_err(|source| ConfigError::Io {
        path: home_dir.to_path_buf(),
        source,
    })?;
    let path = home_dir.join("config.json");
    let text = serde_json::to_string_pretty(config).expect("Config always serializes");
    std::fs::write(&path, text).map_err(|source| ConfigError::Io { path, source })
}

fn merge_in(dst: &mut serde_json::Value, path: &Path) -> Result<(), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let layer: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    merge_json(dst, layer);
    Ok(())
}

/// Deep-merge `src` into `dst`; `src` wins on scalar conflicts. Mirrors the
/// teacher's `merge_yaml`, adapted to `serde_json::Value` since this host's
/// config file is JSON, not YAML (§6).
fn merge_json(dst: &mut serde_json::Value, src: serde_json::Value) {
    match (dst, src) {
        (serde_json::Value::Object(d), serde_json::Value::Object(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_json::Value::Object(serde_json::Map::new()));
                merge_json(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_with_no_files_returns_defaults() {
        std::env::set_var("HOME_DIR_OVERRIDE", "/tmp/clade_loader_test_nonexistent_xyz");
        let cfg = load(None).unwrap();
        assert_eq!(cfg.schema_version, crate::CONFIG_SCHEMA_VERSION);
        std::env::remove_var("HOME_DIR_OVERRIDE");
    }

    #[test]
    fn load_missing_explicit_override_errors() {
        let result = load(Some(Path::new("/tmp/clade_nonexistent_config_xyz.json")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_override_applies_on_top_of_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"{{"gateway":{{"port":9999}}}}"#).unwrap();
        std::env::set_var("HOME_DIR_OVERRIDE", "/tmp/clade_loader_test_nonexistent_xyz2");
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.gateway.port, 9999);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
        std::env::remove_var("HOME_DIR_OVERRIDE");
    }

    #[test]
    fn merge_json_nested_tables_src_wins() {
        let mut dst = serde_json::json!({"gateway": {"port": 1, "host": "a"}});
        let src = serde_json::json!({"gateway": {"port": 2}});
        merge_json(&mut dst, src);
        assert_eq!(dst["gateway"]["port"], 2);
        assert_eq!(dst["gateway"]["host"], "a");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.gateway.port = 4321;
        save(&cfg, dir.path()).unwrap();
        std::env::set_var("HOME_DIR_OVERRIDE", dir.path().to_str().unwrap());
        let reloaded = load(None).unwrap();
        assert_eq!(reloaded.gateway.port, 4321);
        std::env::remove_var("HOME_DIR_OVERRIDE");
    }

    #[test]
    fn default_home_dir_honors_override_env() {
        std::env::set_var("HOME_DIR_OVERRIDE", "/tmp/clade_home_override_test");
        assert_eq!(
            default_home_dir(),
            PathBuf::from("/tmp/clade_home_override_test")
        );
        std::env::remove_var("HOME_DIR_OVERRIDE");
    }
}
