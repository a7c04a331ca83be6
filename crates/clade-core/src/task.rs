// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Cancelled,
    Failed,
}

/// Minimum and maximum delay, in minutes, `clade-taskqueue::schedule` will
/// accept. The wider of two candidate upper bounds was chosen (see
/// DESIGN.md); narrower callers can still enforce a tighter ceiling of
/// their own on top of this one.
pub const MIN_DELAY_MINUTES: f64 = 0.5;
pub const MAX_DELAY_MINUTES: f64 = 43200.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredTask {
    pub id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub prompt: String,
    pub description: String,
    pub execute_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Validates a requested delay against `[MIN_DELAY_MINUTES, MAX_DELAY_MINUTES]`.
pub fn validate_delay_minutes(delay_minutes: f64) -> bool {
    (MIN_DELAY_MINUTES..=MAX_DELAY_MINUTES).contains(&delay_minutes)
}
