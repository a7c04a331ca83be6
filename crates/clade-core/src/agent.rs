// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::OrchestrationError;

/// Agent ids are lowercase, digits, `-`/`_` only — matches directory and
/// socket-path safe characters on every platform this host targets.
pub const AGENT_ID_PATTERN: &str = r"^[a-z0-9_-]+$";

fn agent_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(AGENT_ID_PATTERN).expect("static regex is valid"))
}

/// Named bundle of built-in tool servers an invocation exposes to the child
/// CLI. See `clade-toolcfg` for how each preset maps to a server set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPreset {
    Potato,
    Coding,
    Messaging,
    Full,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatMode {
    Check,
    Work,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    pub active_hours_start: Option<u8>,
    pub active_hours_end: Option<u8>,
    #[serde(default = "default_heartbeat_mode")]
    pub mode: HeartbeatMode,
    #[serde(default)]
    pub suppress_ok: bool,
}

fn default_heartbeat_interval_secs() -> u64 {
    3600
}

fn default_heartbeat_mode() -> HeartbeatMode {
    HeartbeatMode::Check
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_heartbeat_interval_secs(),
            active_hours_start: None,
            active_hours_end: None,
            mode: default_heartbeat_mode(),
            suppress_ok: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectionConfig {
    #[serde(default = "default_reflection_enabled")]
    pub enabled: bool,
    /// Turns between reflections. A reflection fires once the per-agent
    /// counter reaches this value (see `clade-reflection`).
    #[serde(default = "default_reflection_interval")]
    pub interval: u32,
}

fn default_reflection_enabled() -> bool {
    true
}

fn default_reflection_interval() -> u32 {
    20
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_reflection_enabled(),
            interval: default_reflection_interval(),
        }
    }
}

/// Admin privileges for an agent. When `enabled` is false, the admin tool
/// server must never appear in any manifest built for this agent — enforced
/// by `clade-toolcfg`, not re-checked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_approve_tool_calls: bool,
    #[serde(default)]
    pub auto_approve_skills: bool,
    #[serde(default)]
    pub can_create_skills: bool,
    #[serde(default)]
    pub can_manage_agents: bool,
    #[serde(default)]
    pub can_modify_config: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model: String,
    pub preset: ToolPreset,
    #[serde(default)]
    pub custom_tools: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reflection: ReflectionConfig,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub admin: AdminConfig,
}

fn default_max_turns() -> u32 {
    50
}

impl AgentConfig {
    /// Validates the invariants from the data model: `preset = custom`
    /// requires a non-empty `custom_tools` list.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if matches!(self.preset, ToolPreset::Custom) && self.custom_tools.is_empty() {
            return Err(OrchestrationError::Validation(
                "preset=custom requires a non-empty custom_tools list".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolved identity bundle for one agent: id plus validated config.
/// Document paths (soul, memory, heartbeat, tools notes) are resolved by
/// `clade-registry`, which owns the on-disk layout; this type only carries
/// the id/config pair that crosses component boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub config: AgentConfig,
}

impl Agent {
    pub fn new(id: impl Into<String>, config: AgentConfig) -> Result<Self, OrchestrationError> {
        let id = id.into();
        if !agent_id_regex().is_match(&id) {
            return Err(OrchestrationError::Validation(format!(
                "invalid agent id {id:?}: must match [a-z0-9_-]+"
            )));
        }
        config.validate()?;
        Ok(Self { id, config })
    }
}
