// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use clade_core::AgentConfig;

/// Bumped whenever the on-disk shape of [`Config`] changes incompatibly.
/// `load` does not yet refuse to read older versions (no prior version
/// exists to migrate from); it is carried so a future migration has
/// somewhere to branch from.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

/// Per-channel adapter config. Channel adapters themselves are out of scope
/// (§1) — this struct only carries the `enabled` flag the routing layer
/// needs plus whatever adapter-specific keys the (external) adapter wants,
/// held as an opaque JSON object rather than enumerated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_gateway_host")]
    pub host: String,
}

fn default_gateway_port() -> u16 {
    8787
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingRule {
    /// Channel this rule matches, e.g. `"webchat"`.
    pub channel: String,
    /// Agent id to dispatch matching requests to.
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    pub default_agent: Option<String>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillsConfig {
    #[serde(default)]
    pub auto_approve: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskQueueConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_tick_secs() -> u64 {
    15
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserConfig {
    #[serde(default)]
    pub enabled: bool,
    pub user_data_dir: Option<String>,
    pub cdp_endpoint: Option<String>,
    pub browser: Option<String>,
    #[serde(default)]
    pub headless: bool,
}

/// Root config document, `$HOME_DIR/config.json` (§6).
///
/// Unknown top-level keys are rejected (§9 "dynamic config structs"):
/// `#[serde(deny_unknown_fields)]` throughout, so a typo'd key surfaces
/// at load time rather than being silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub task_queue: TaskQueueConfig,
    pub browser: Option<BrowserConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            agents: HashMap::new(),
            channels: HashMap::new(),
            gateway: GatewayConfig::default(),
            routing: RoutingConfig::default(),
            skills: SkillsConfig::default(),
            task_queue: TaskQueueConfig::default(),
            browser: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_has_current_schema_version() {
        assert_eq!(Config::default().schema_version, CONFIG_SCHEMA_VERSION);
    }

    #[test]
    fn gateway_defaults_to_loopback() {
        let g = GatewayConfig::default();
        assert_eq!(g.host, "127.0.0.1");
        assert_eq!(g.port, 8787);
    }

    #[test]
    fn task_queue_defaults_match_spec() {
        let t = TaskQueueConfig::default();
        assert_eq!(t.tick_secs, 15);
        assert_eq!(t.max_concurrent, 4);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let json = r#"{"schema_version":1,"bogus_key":true}"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn channel_config_accepts_extra_adapter_keys() {
        let json = r#"{"enabled":true,"api_token":"xyz"}"#;
        let cfg: ChannelConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.extra.get("api_token").and_then(|v| v.as_str()), Some("xyz"));
    }

    #[test]
    fn routing_rule_requires_channel_and_agent() {
        let json = r#"{"channel":"webchat","agent":"jarvis"}"#;
        let rule: RoutingRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.channel, "webchat");
        assert_eq!(rule.agent, "jarvis");
    }

    #[test]
    fn minimal_config_deserializes_with_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.schema_version, CONFIG_SCHEMA_VERSION);
        assert!(cfg.agents.is_empty());
        assert!(cfg.browser.is_none());
    }
}
