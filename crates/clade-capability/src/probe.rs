// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use semver::Version;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

/// Minimum advertised version this host will drive (§4.2).
pub const MIN_CLI_VERSION: Version = Version::new(1, 0, 0);

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("spawning {cli} failed: {source}")]
    Spawn {
        cli: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{cli} --{flag} timed out after {secs}s")]
    Timeout { cli: String, flag: &'static str, secs: u64 },
    #[error("could not parse a semver version from {cli} --version output")]
    UnparseableVersion { cli: String },
    #[error("{cli} reports version {found}, below the minimum supported {min}")]
    BelowMinimumVersion {
        cli: String,
        found: Version,
        min: Version,
    },
    #[error("{cli} is missing a critical capability: {0}")]
    MissingCriticalCapability(&'static str),
}

/// Capability record (§4.2): every flag the argument builder might need to
/// gate on. `version` is kept for diagnostics even though only the minimum
/// threshold check reads it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct CliCapabilities {
    pub version: Version,
    pub stream_json: bool,
    pub resume: bool,
    pub append_system_prompt: bool,
    pub append_system_prompt_file: bool,
    pub allowed_tools: bool,
    pub tool_server_config_file: bool,
    pub max_turns: bool,
    pub model_selection: bool,
    pub inline_subagents: bool,
    pub lazy_tool_discovery: bool,
    pub plugin_export: bool,
}

impl CliCapabilities {
    fn validate(&self, cli: &str) -> Result<(), CapabilityError> {
        if self.version < MIN_CLI_VERSION {
            return Err(CapabilityError::BelowMinimumVersion {
                cli: cli.to_string(),
                found: self.version.clone(),
                min: MIN_CLI_VERSION,
            });
        }
        if !self.stream_json {
            return Err(CapabilityError::MissingCriticalCapability("stream-json output"));
        }
        if !self.resume {
            return Err(CapabilityError::MissingCriticalCapability("session resume"));
        }
        if !self.append_system_prompt && !self.append_system_prompt_file {
            return Err(CapabilityError::MissingCriticalCapability(
                "system prompt injection (inline or file)",
            ));
        }
        for (present, name) in [
            (self.allowed_tools, "allowed-tools list"),
            (self.tool_server_config_file, "tool-server config file"),
            (self.max_turns, "max-turns"),
            (self.model_selection, "model selection"),
            (self.inline_subagents, "inline subagent definitions"),
            (self.lazy_tool_discovery, "lazy tool discovery"),
            (self.plugin_export, "plugin export"),
        ] {
            if !present {
                warn!(capability = name, cli, "external CLI missing optional capability");
            }
        }
        Ok(())
    }
}

static CACHE: OnceLock<Mutex<Option<CliCapabilities>>> = OnceLock::new();

fn cache() -> &'static Mutex<Option<CliCapabilities>> {
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Probes `cli` once and caches the result for the process lifetime (§4.2).
pub async fn probe(cli: &str) -> Result<CliCapabilities, CapabilityError> {
    {
        let guard = cache().lock().await;
        if let Some(caps) = guard.as_ref() {
            return Ok(caps.clone());
        }
    }
    let caps = probe_uncached(cli).await?;
    let mut guard = cache().lock().await;
    *guard = Some(caps.clone());
    Ok(caps)
}

/// Test-only: clears the process-lifetime cache so a test can probe a
/// different mock CLI binary (§4.2 "a test-only reset hook is allowed").
pub async fn reset_cache_for_tests() {
    let mut guard = cache().lock().await;
    *guard = None;
}

async fn run_with_timeout(cli: &str, flag: &'static str) -> Result<String, CapabilityError> {
    let mut cmd = Command::new(cli);
    cmd.arg(format!("--{flag}"));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| CapabilityError::Spawn {
        cli: cli.to_string(),
        source,
    })?;

    let output = tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| CapabilityError::Timeout {
            cli: cli.to_string(),
            flag,
            secs: PROBE_TIMEOUT.as_secs(),
        })?
        .map_err(|source| CapabilityError::Spawn {
            cli: cli.to_string(),
            source,
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?)").expect("valid regex"))
}

fn parse_version(text: &str, cli: &str) -> Result<Version, CapabilityError> {
    let caught = version_regex()
        .captures(text)
        .ok_or_else(|| CapabilityError::UnparseableVersion { cli: cli.to_string() })?;
    Version::parse(&caught[1]).map_err(|_| CapabilityError::UnparseableVersion { cli: cli.to_string() })
}

/// Help-text flag → capability field. Each entry is checked against the
/// `--help` text with a simple substring/regex match; the external CLI's
/// help output is not machine-structured so this is necessarily heuristic.
fn has_flag(help: &str, flag: &str) -> bool {
    help.contains(flag)
}

async fn probe_uncached(cli: &str) -> Result<CliCapabilities, CapabilityError> {
    let version_text = run_with_timeout(cli, "version").await?;
    let version = parse_version(&version_text, cli)?;
    let help = run_with_timeout(cli, "help").await?;

    let caps = CliCapabilities {
        version,
        stream_json: has_flag(&help, "--output-format") && has_flag(&help, "stream-json"),
        resume: has_flag(&help, "--resume"),
        append_system_prompt: has_flag(&help, "--append-system-prompt"),
        append_system_prompt_file: has_flag(&help, "--append-system-prompt-file"),
        allowed_tools: has_flag(&help, "--allowed-tools"),
        tool_server_config_file: has_flag(&help, "--mcp-config"),
        max_turns: has_flag(&help, "--max-turns"),
        model_selection: has_flag(&help, "--model"),
        inline_subagents: has_flag(&help, "--agents"),
        lazy_tool_discovery: has_flag(&help, "--lazy-tools"),
        plugin_export: has_flag(&help, "--plugin-export"),
    };
    caps.validate(cli)?;
    Ok(caps)
}
