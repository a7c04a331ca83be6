// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool Config Builder (§4.6): resolves the set of MCP-style tool servers one
//! CLI invocation exposes, and writes that set to a private manifest file.
//!
//! Every built-in server is realized by re-invoking this same host binary
//! under a dedicated bridge subcommand (`tool-bridge --server <name>`)
//! rather than shipping one binary per tool server. The bridge process
//! itself lives in `clade-ipc`; this crate only decides which servers
//! belong in the manifest and what argv/env each one gets.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use clade_config::BrowserConfig;
use clade_core::{is_reserved_name, ToolPreset};

#[derive(Debug, Error)]
pub enum ToolCfgError {
    #[error("writing tool manifest: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolManifest {
    pub servers: Vec<ToolServerSpec>,
}

/// Everything the builder needs to resolve one invocation's server set.
pub struct BuildManifestInput<'a> {
    pub agent_id: &'a str,
    pub preset: ToolPreset,
    pub custom_tools: &'a [String],
    pub skills: &'a [String],
    pub admin_enabled: bool,
    pub browser: Option<&'a BrowserConfig>,
    pub host_exe: &'a Path,
    pub home_dir: &'a Path,
    pub ipc_socket_path: &'a Path,
}

/// Builds the ordered, de-duplicated server set for one invocation (§4.6
/// policy: preset table, then admin, then per-skill servers with
/// collision-discard, then the optional browser server).
///
/// §4.6's preset table fixes `custom: {}` — unlike the other four presets,
/// `Custom` contributes no built-in servers of its own; its `custom_tools`
/// list is resolved separately, into [`resolved_allowed_tools`], not into
/// this manifest (it names CLI tools like `Bash`/`Edit`, not tool-server
/// identifiers). `admin`/`browser` can only enter `names` through their own
/// gated paths below, but the final retain is the invariant's actual
/// enforcement point (§3: "if admin.enabled=false, admin-only tool server
/// must not appear in any built manifest") rather than relying on every
/// contributor upstream to stay collision-safe forever.
pub fn build_manifest(input: &BuildManifestInput<'_>) -> ToolManifest {
    let mut names: Vec<String> = builtin_names(input.preset)
        .into_iter()
        .map(str::to_string)
        .collect();

    if input.admin_enabled && !names.iter().any(|n| n == "admin") {
        names.push("admin".to_string());
    }

    for skill in input.skills {
        if is_reserved_name(skill) {
            warn!(skill, "skill name collides with a built-in tool server, discarding");
            continue;
        }
        if !names.contains(skill) {
            names.push(skill.clone());
        }
    }

    if input.browser.is_some_and(|b| b.enabled) && !names.iter().any(|n| n == "browser") {
        names.push("browser".to_string());
    }

    names.retain(|n| n != "admin" || input.admin_enabled);
    names.retain(|n| n != "browser" || input.browser.is_some_and(|b| b.enabled));

    let servers = names
        .into_iter()
        .map(|name| server_spec(&name, input))
        .collect();

    ToolManifest { servers }
}

/// §4.7 step 5's "resolve allowed tools from preset + custom list": the
/// tool names the CLI invocation is allowed to call, as distinct from the
/// tool *servers* in the manifest (`build_manifest`). For every preset but
/// `Custom` these coincide with the manifest's server names. `Custom`
/// contributes `{}` servers (see `build_manifest`) but its `custom_tools`
/// — arbitrary CLI tool names, not tool-server identifiers, so not run
/// through `is_reserved_name` — are the whole point of that preset and are
/// appended here instead.
pub fn resolved_allowed_tools(input: &BuildManifestInput<'_>, manifest: &ToolManifest) -> Vec<String> {
    let mut tools: Vec<String> = manifest.servers.iter().map(|s| s.name.clone()).collect();
    if matches!(input.preset, ToolPreset::Custom) {
        for tool in input.custom_tools {
            if !tools.contains(tool) {
                tools.push(tool.clone());
            }
        }
    }
    tools
}

fn builtin_names(preset: ToolPreset) -> Vec<&'static str> {
    match preset {
        ToolPreset::Potato => vec![],
        ToolPreset::Coding => vec!["memory", "sessions", "skills"],
        ToolPreset::Messaging | ToolPreset::Full => {
            vec!["memory", "sessions", "messaging", "skills"]
        }
        ToolPreset::Custom => vec![],
    }
}

fn server_spec(name: &str, input: &BuildManifestInput<'_>) -> ToolServerSpec {
    let mut env = BTreeMap::new();
    env.insert("AGENT_ID".to_string(), input.agent_id.to_string());
    env.insert("HOME_DIR".to_string(), input.home_dir.display().to_string());
    env.insert(
        "IPC_SOCKET_PATH".to_string(),
        input.ipc_socket_path.display().to_string(),
    );

    if name == "browser" {
        if let Some(browser) = input.browser {
            if let Some(dir) = &browser.user_data_dir {
                env.insert("BROWSER_USER_DATA_DIR".to_string(), dir.clone());
            }
            if let Some(endpoint) = &browser.cdp_endpoint {
                env.insert("BROWSER_CDP_ENDPOINT".to_string(), endpoint.clone());
            }
            if let Some(binary) = &browser.browser {
                env.insert("BROWSER_BINARY".to_string(), binary.clone());
            }
            env.insert("BROWSER_HEADLESS".to_string(), browser.headless.to_string());
        }
    }

    ToolServerSpec {
        name: name.to_string(),
        command: input.host_exe.display().to_string(),
        args: vec!["tool-bridge".to_string(), "--server".to_string(), name.to_string()],
        env,
    }
}

/// A written manifest file, deleted best-effort on drop (§4.6: "deleted
/// best-effort after the invocation").
pub struct ManifestHandle {
    file: tempfile::NamedTempFile,
}

impl ManifestHandle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Serializes `manifest` to a private temp file (owner-readable only on
/// unix) and returns a handle whose path is passed to the CLI.
pub fn write_manifest(manifest: &ToolManifest) -> Result<ManifestHandle, ToolCfgError> {
    let mut file = tempfile::Builder::new()
        .prefix("clade-tools-")
        .suffix(".json")
        .tempfile()?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        file.as_file().set_permissions(std::fs::Permissions::from_mode(0o600))?;
        let text = serde_json::to_vec(manifest).expect("ToolManifest always serializes");
        file.write_all(&text)?;
        file.flush()?;
    }
    #[cfg(not(unix))]
    {
        use std::io::Write;
        let text = serde_json::to_vec(manifest).expect("ToolManifest always serializes");
        file.write_all(&text)?;
        file.flush()?;
    }
    Ok(ManifestHandle { file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_input(preset: ToolPreset) -> (Vec<String>, Vec<String>, BuildManifestInput<'static>) {
        let custom_tools = Vec::new();
        let skills = Vec::new();
        // leaked to satisfy the 'static bound in this test helper only
        let host_exe: &'static Path = Box::leak(PathBuf::from("/usr/bin/clade").into_boxed_path());
        let home_dir: &'static Path = Box::leak(PathBuf::from("/home/u/.clade").into_boxed_path());
        let ipc: &'static Path = Box::leak(PathBuf::from("/home/u/.clade/ipc.sock").into_boxed_path());
        let input = BuildManifestInput {
            agent_id: "jarvis",
            preset,
            custom_tools: &[],
            skills: &[],
            admin_enabled: false,
            browser: None,
            host_exe,
            home_dir,
            ipc_socket_path: ipc,
        };
        (custom_tools, skills, input)
    }

    #[test]
    fn potato_preset_has_no_servers() {
        let (_, _, input) = base_input(ToolPreset::Potato);
        let manifest = build_manifest(&input);
        assert!(manifest.servers.is_empty());
    }

    #[test]
    fn coding_preset_has_three_builtins() {
        let (_, _, input) = base_input(ToolPreset::Coding);
        let manifest = build_manifest(&input);
        let names: Vec<&str> = manifest.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["memory", "sessions", "skills"]);
    }

    #[test]
    fn messaging_and_full_presets_add_messaging_server() {
        let (_, _, input) = base_input(ToolPreset::Full);
        let manifest = build_manifest(&input);
        let names: Vec<&str> = manifest.servers.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"messaging"));
    }

    #[test]
    fn admin_enabled_adds_admin_server() {
        let (_, _, mut input) = base_input(ToolPreset::Coding);
        input.admin_enabled = true;
        let manifest = build_manifest(&input);
        assert!(manifest.servers.iter().any(|s| s.name == "admin"));
    }

    #[test]
    fn skill_colliding_with_builtin_is_discarded() {
        let (_, _, mut input) = base_input(ToolPreset::Coding);
        let skills = vec!["memory".to_string(), "git-workflow".to_string()];
        input.skills = &skills;
        let manifest = build_manifest(&input);
        let names: Vec<&str> = manifest.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "memory").count(), 1);
        assert!(names.contains(&"git-workflow"));
    }

    #[test]
    fn custom_preset_contributes_no_servers() {
        let (_, _, mut input) = base_input(ToolPreset::Custom);
        let custom = vec!["Bash".to_string(), "Edit".to_string()];
        input.custom_tools = &custom;
        let manifest = build_manifest(&input);
        assert!(manifest.servers.is_empty());
    }

    #[test]
    fn custom_preset_allowed_tools_is_the_full_custom_tools_list() {
        let (_, _, mut input) = base_input(ToolPreset::Custom);
        let custom = vec!["Bash".to_string(), "Edit".to_string()];
        input.custom_tools = &custom;
        let manifest = build_manifest(&input);
        let allowed = resolved_allowed_tools(&input, &manifest);
        assert_eq!(allowed, vec!["Bash".to_string(), "Edit".to_string()]);
    }

    #[test]
    fn custom_preset_admin_enabled_still_adds_admin_server_and_allowed_tool() {
        let (_, _, mut input) = base_input(ToolPreset::Custom);
        let custom = vec!["Bash".to_string()];
        input.custom_tools = &custom;
        input.admin_enabled = true;
        let manifest = build_manifest(&input);
        assert_eq!(manifest.servers.len(), 1);
        assert_eq!(manifest.servers[0].name, "admin");
        let allowed = resolved_allowed_tools(&input, &manifest);
        assert_eq!(allowed, vec!["admin".to_string(), "Bash".to_string()]);
    }

    #[test]
    fn custom_preset_with_admin_tool_name_but_admin_disabled_never_yields_admin_server() {
        let (_, _, mut input) = base_input(ToolPreset::Custom);
        let custom = vec!["admin".to_string()];
        input.custom_tools = &custom;
        input.admin_enabled = false;
        let manifest = build_manifest(&input);
        assert!(manifest.servers.is_empty());
    }

    #[test]
    fn non_custom_preset_allowed_tools_matches_manifest_server_names() {
        let (_, _, input) = base_input(ToolPreset::Coding);
        let manifest = build_manifest(&input);
        let allowed = resolved_allowed_tools(&input, &manifest);
        let server_names: Vec<String> = manifest.servers.iter().map(|s| s.name.clone()).collect();
        assert_eq!(allowed, server_names);
    }

    #[test]
    fn admin_invariant_holds_even_if_names_were_somehow_seeded_with_admin() {
        // Defense in depth for §3's "if admin.enabled=false, admin-only
        // tool server must not appear in any built manifest": even a
        // preset/skill path that managed to push "admin" into the working
        // set is stripped back out when admin is disabled.
        let (_, _, mut input) = base_input(ToolPreset::Coding);
        let skills = vec!["admin".to_string()];
        input.skills = &skills;
        input.admin_enabled = false;
        let manifest = build_manifest(&input);
        assert!(manifest.servers.iter().all(|s| s.name != "admin"));
    }

    #[test]
    fn browser_server_added_only_when_enabled() {
        let (_, _, mut input) = base_input(ToolPreset::Potato);
        let browser = BrowserConfig {
            enabled: true,
            user_data_dir: Some("/tmp/profile".to_string()),
            ..Default::default()
        };
        input.browser = Some(&browser);
        let manifest = build_manifest(&input);
        let server = manifest.servers.iter().find(|s| s.name == "browser").unwrap();
        assert_eq!(
            server.env.get("BROWSER_USER_DATA_DIR").map(String::as_str),
            Some("/tmp/profile")
        );
    }

    #[test]
    fn server_command_reinvokes_host_binary_with_bridge_subcommand() {
        let (_, _, input) = base_input(ToolPreset::Coding);
        let manifest = build_manifest(&input);
        let memory = manifest.servers.iter().find(|s| s.name == "memory").unwrap();
        assert_eq!(memory.command, "/usr/bin/clade");
        assert_eq!(memory.args, vec!["tool-bridge", "--server", "memory"]);
    }

    #[test]
    fn every_server_env_carries_agent_and_ipc_context() {
        let (_, _, input) = base_input(ToolPreset::Coding);
        let manifest = build_manifest(&input);
        for server in &manifest.servers {
            assert_eq!(server.env.get("AGENT_ID").map(String::as_str), Some("jarvis"));
            assert!(server.env.contains_key("IPC_SOCKET_PATH"));
        }
    }

    #[test]
    fn write_manifest_produces_a_readable_json_file() {
        let (_, _, input) = base_input(ToolPreset::Coding);
        let manifest = build_manifest(&input);
        let handle = write_manifest(&manifest).unwrap();
        let text = std::fs::read_to_string(handle.path()).unwrap();
        assert!(text.contains("\"memory\""));
    }
}
