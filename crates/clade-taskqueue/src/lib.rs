// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Task Queue (§4.9): the ticker half of deferred one-shot prompts.
//!
//! Scheduling, cancelling, and listing tasks are plain `Store` row
//! operations already exposed by `clade-store` and wired directly into the
//! IPC server (`clade-ipc::server::taskqueue_*`). What's left here is the
//! part that actually *fires* a due task: a ticker that wakes on its own
//! interval (or early, when a near-term task is scheduled), claims due rows,
//! and re-enters `clade_session::SessionManager::send_message` for each one
//! under a bounded worker pool.
mod ticker;

pub use ticker::{TaskQueueTicker, TaskQueueTickerConfig};
