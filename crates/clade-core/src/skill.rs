// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    Pending,
    Active,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub status: SkillStatus,
    pub path: String,
    pub config: Option<serde_json::Value>,
}

/// Built-in tool-server names, reserved: a user skill whose name collides
/// with one of these is silently discarded from the agent's manifest
/// (`clade-toolcfg`, §4.6).
pub const RESERVED_SERVER_NAMES: &[&str] =
    &["memory", "sessions", "messaging", "skills", "admin", "browser"];

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_SERVER_NAMES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_detected() {
        assert!(is_reserved_name("memory"));
        assert!(is_reserved_name("admin"));
    }

    #[test]
    fn non_reserved_name_passes() {
        assert!(!is_reserved_name("git-workflow"));
    }
}
