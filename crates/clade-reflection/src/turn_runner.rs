// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Everything this crate needs from a CLI-driving session layer: the
/// ability to run one bare, toolless meta-invocation and get its text back.
/// `clade-session` implements this over its own `CliRunner` so this crate
/// never has to depend on `clade-session` itself (see the module doc on
/// [`crate`]).
#[async_trait::async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_meta_turn(&self, agent_id: &str, instruction: &str) -> Result<String, TurnRunnerError>;
}

#[derive(Debug, Error)]
#[error("meta-turn failed: {0}")]
pub struct TurnRunnerError(pub String);
