// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use clade_core::{Agent, AgentConfig};

/// Resolved bundle `{ id, config, soulPath, memoryDir, heartbeatPath,
/// baseDir }` from §4.4, plus a handful of sibling paths
/// `clade-prompt`/`clade-reflection` need that aren't named individually
/// there (today's activity log, soul/tools history, tools notes).
#[derive(Debug, Clone, PartialEq)]
pub struct AgentBundle {
    pub id: String,
    pub config: AgentConfig,
    pub base_dir: PathBuf,
    pub soul_path: PathBuf,
    pub heartbeat_path: PathBuf,
    pub memory_path: PathBuf,
    pub tools_path: PathBuf,
    pub memory_dir: PathBuf,
    pub soul_history_dir: PathBuf,
    pub tools_history_dir: PathBuf,
}

impl AgentBundle {
    pub(crate) fn new(home_dir: &Path, agent: Agent) -> Self {
        let base_dir = home_dir.join("agents").join(&agent.id);
        Self {
            soul_path: base_dir.join("SOUL.md"),
            heartbeat_path: base_dir.join("HEARTBEAT.md"),
            memory_path: base_dir.join("MEMORY.md"),
            tools_path: base_dir.join("TOOLS.md"),
            memory_dir: base_dir.join("memory"),
            soul_history_dir: base_dir.join("soul-history"),
            tools_history_dir: base_dir.join("tools-history"),
            id: agent.id,
            config: agent.config,
            base_dir,
        }
    }

    /// Today's activity log path (`memory/YYYY-MM-DD.md`), used by
    /// `clade-prompt` and `clade-session`.
    pub fn todays_activity_log(&self, today: &str) -> PathBuf {
        self.memory_dir.join(format!("{today}.md"))
    }
}
