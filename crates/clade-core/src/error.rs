// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Shared error taxonomy (§7). Behaviour, not names: every component-level
/// error enum (`StoreError`, `CliError`, `IpcError`, …) converts into this
/// one at the point it crosses back to an external caller, so callers only
/// ever have to match on one shape.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("ipc error: {0}")]
    Ipc(String),
}

impl OrchestrationError {
    /// Short machine-readable tag, used by the IPC layer's `error` field and
    /// by tests asserting on error category without matching the message text.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::Store(_) => "store",
            Self::Cli(_) => "cli",
            Self::Ipc(_) => "ipc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_variant() {
        assert_eq!(
            OrchestrationError::NotFound("x".into()).tag(),
            "not_found"
        );
        assert_eq!(OrchestrationError::Validation("x".into()).tag(), "validation");
    }

    #[test]
    fn display_includes_message() {
        let e = OrchestrationError::Store("disk full".into());
        assert!(e.to_string().contains("disk full"));
    }
}
