// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session Manager (§4.7): the orchestration seam. Resolves the agent,
//! composes its prompt and tool manifest, drives one CLI turn, persists the
//! resulting session row, and fires the Reflection Driver without waiting on
//! it. Every public entry point is serialized per session key (§5) so turns
//! for the same conversation never race at the CLI boundary while distinct
//! conversations run fully in parallel.
mod manager;

pub use manager::{SendMessageOutput, SessionError, SessionManager, SessionManagerConfig};
