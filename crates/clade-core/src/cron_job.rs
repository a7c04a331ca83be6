// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub agent_id: String,
    pub prompt: String,
    /// `<channel>:<target>`, parsed by `clade-cron` at fire time.
    pub deliver_to: Option<String>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl CronJob {
    /// Splits `deliver_to` into `(channel, target)`, if present.
    pub fn delivery_target(&self) -> Option<(&str, &str)> {
        self.deliver_to.as_deref().and_then(|d| d.split_once(':'))
    }
}
