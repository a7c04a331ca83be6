// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! CLI Runner (§4.3): spawns one invocation of the external LLM CLI, streams
//! its line-delimited JSON output, and collects the final assistant text
//! plus the session id it assigns or echoes back.
mod runner;
mod truncate;

pub use runner::{CliError, CliRunInput, CliRunOutput, CliRunner, CliRunnerConfig};
