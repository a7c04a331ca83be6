// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use clade_core::{Session, SessionStatus};

use crate::error::StoreError;
use crate::Store;

fn status_to_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Active => "active",
        SessionStatus::Idle => "idle",
        SessionStatus::Terminated => "terminated",
    }
}

fn status_from_str(s: &str) -> SessionStatus {
    match s {
        "idle" => SessionStatus::Idle,
        "terminated" => SessionStatus::Terminated,
        _ => SessionStatus::Active,
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let created_at: String = row.get("created_at")?;
    let last_active_at: String = row.get("last_active_at")?;
    let status: String = row.get("status")?;
    Ok(Session {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        channel: row.get("channel")?,
        channel_user_id: row.get("channel_user_id")?,
        chat_id: row.get("chat_id")?,
        status: status_from_str(&status),
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        last_active_at: last_active_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Filters accepted by `listSessions` (§4.1).
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub agent_id: Option<String>,
    pub status: Option<SessionStatus>,
}

impl Store {
    pub async fn create_session(&self, session: Session) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, agent_id, channel, channel_user_id, chat_id, status, created_at, last_active_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id,
                    session.agent_id,
                    session.channel,
                    session.channel_user_id,
                    session.chat_id,
                    status_to_str(session.status),
                    session.created_at.to_rfc3339(),
                    session.last_active_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id], row_to_session)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    /// Returns the most-recently-active `active`-status row for the tuple
    /// (§4.1: "should never be more than one; ordering is a safety net").
    pub async fn find_active_session(
        &self,
        agent_id: &str,
        channel: Option<&str>,
        user_id: Option<&str>,
        chat_id: Option<&str>,
    ) -> Result<Option<Session>, StoreError> {
        let agent_id = agent_id.to_string();
        let channel = channel.map(str::to_string);
        let user_id = user_id.map(str::to_string);
        let chat_id = chat_id.map(str::to_string);
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM sessions
                 WHERE agent_id = ?1 AND status = 'active'
                   AND channel IS ?2 AND channel_user_id IS ?3 AND chat_id IS ?4
                 ORDER BY last_active_at DESC LIMIT 1",
                params![agent_id, channel, user_id, chat_id],
                row_to_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Any active session for the agent, most-recently-active first (used
    /// when channel/user are unknown — §4.7 step 4(b)).
    pub async fn find_any_active_session(
        &self,
        agent_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM sessions WHERE agent_id = ?1 AND status = 'active'
                 ORDER BY last_active_at DESC LIMIT 1",
                params![agent_id],
                row_to_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, StoreError> {
        self.with_conn(move |conn| {
            let mut sql = "SELECT * FROM sessions WHERE 1=1".to_string();
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(agent_id) = &filter.agent_id {
                sql.push_str(" AND agent_id = ?");
                bound.push(Box::new(agent_id.clone()));
            }
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                bound.push(Box::new(status_to_str(status).to_string()));
            }
            sql.push_str(" ORDER BY last_active_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(params.as_slice(), row_to_session)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET status = ?1 WHERE id = ?2",
                params![status_to_str(status), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn touch_session(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET last_active_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}
