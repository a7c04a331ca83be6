// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// Reserved for future use; no code path sets this today (§4.11 state
    /// machine — sessions are created active and only ever move to
    /// terminated).
    Idle,
    Terminated,
}

/// The durable binding between an `(agentId, channel?, userId?, chatId?)`
/// tuple and the opaque session id the external CLI assigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub channel: Option<String>,
    pub channel_user_id: Option<String>,
    pub chat_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        channel: Option<String>,
        channel_user_id: Option<String>,
        chat_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            channel,
            channel_user_id,
            chat_id,
            status: SessionStatus::Active,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn terminate(&mut self) {
        self.status = SessionStatus::Terminated;
    }
}

/// Deterministic serialization key for an `(agent, channel, user, chat)`
/// tuple. Distinct from [`Session::id`] — the session key only orders
/// concurrent turns (§5); it is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn derive(
        agent_id: &str,
        channel: Option<&str>,
        user_id: Option<&str>,
        chat_id: Option<&str>,
    ) -> Self {
        let key = match (channel, chat_id, user_id) {
            (Some(ch), Some(chat), _) => format!("agent:{agent_id}:{ch}:{chat}"),
            (Some(ch), None, Some(user)) => format!("agent:{agent_id}:{ch}:{user}"),
            _ => format!("agent:{agent_id}:cli"),
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
