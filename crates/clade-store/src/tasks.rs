// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use clade_core::{DeferredTask, TaskStatus};

use crate::error::StoreError;
use crate::Store;

fn status_to_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Done => "done",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "done" => TaskStatus::Done,
        "cancelled" => TaskStatus::Cancelled,
        "failed" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

fn row_to_task(row: &Row) -> rusqlite::Result<DeferredTask> {
    let execute_at: String = row.get("execute_at")?;
    let status: String = row.get("status")?;
    Ok(DeferredTask {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        session_id: row.get("session_id")?,
        prompt: row.get("prompt")?,
        description: row.get("description")?,
        execute_at: execute_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        status: status_from_str(&status),
        error: row.get("error")?,
    })
}

impl Store {
    pub async fn enqueue_task(
        &self,
        agent_id: String,
        session_id: Option<String>,
        prompt: String,
        description: String,
        execute_at: DateTime<Utc>,
    ) -> Result<DeferredTask, StoreError> {
        self.with_conn(move |conn| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO tasks (id, agent_id, session_id, prompt, description, execute_at, status, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', NULL)",
                params![id, agent_id, session_id, prompt, description, execute_at.to_rfc3339()],
            )?;
            Ok(DeferredTask {
                id,
                agent_id,
                session_id,
                prompt,
                description,
                execute_at,
                status: TaskStatus::Pending,
                error: None,
            })
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<DeferredTask>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    /// All `pending` tasks with `execute_at <= now` (§4.9 ticker).
    pub async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<DeferredTask>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE status = 'pending' AND execute_at <= ?1 ORDER BY execute_at",
            )?;
            let rows = stmt.query_map(params![now.to_rfc3339()], row_to_task)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn list_tasks_by_agent(&self, agent_id: Option<&str>) -> Result<Vec<DeferredTask>, StoreError> {
        let agent_id = agent_id.map(str::to_string);
        self.with_conn(move |conn| {
            let mut out = Vec::new();
            if let Some(agent_id) = agent_id {
                let mut stmt = conn.prepare(
                    "SELECT * FROM tasks WHERE agent_id = ?1 ORDER BY execute_at DESC",
                )?;
                let rows = stmt.query_map(params![agent_id], row_to_task)?;
                for r in rows {
                    out.push(r?);
                }
            } else {
                let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY execute_at DESC")?;
                let rows = stmt.query_map([], row_to_task)?;
                for r in rows {
                    out.push(r?);
                }
            }
            Ok(out)
        })
        .await
    }

    /// Transitions `pending -> running`, atomically guarded by the WHERE
    /// clause so two concurrent tickers can't both claim the same row.
    pub async fn mark_task_running(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = 'running' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn mark_task_done(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("UPDATE tasks SET status = 'done' WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn mark_task_failed(&self, id: &str, error: String) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tasks SET status = 'failed', error = ?1 WHERE id = ?2",
                params![error, id],
            )?;
            Ok(())
        })
        .await
    }

    /// `pending -> cancelled`; `running`/terminal states reject cancellation
    /// (§4.9). Returns `Ok(false)` rather than erroring when the row is in a
    /// non-cancellable state, matching the IPC boundary's `ok:false` pattern.
    pub async fn cancel_task(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = 'cancelled' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_get_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let t = store
            .enqueue_task("jarvis".into(), None, "ping".into(), "ping me".into(), Utc::now())
            .await
            .unwrap();
        let fetched = store.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn list_due_tasks_only_returns_ready_pending_rows() {
        let store = Store::open_in_memory().unwrap();
        let past = store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();
        let future = store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        let due = store.list_due_tasks(Utc::now()).await.unwrap();
        let ids: Vec<_> = due.iter().map(|t| t.id.clone()).collect();
        assert!(ids.contains(&past.id));
        assert!(!ids.contains(&future.id));
    }

    #[tokio::test]
    async fn mark_running_is_one_shot() {
        let store = Store::open_in_memory().unwrap();
        let t = store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now())
            .await
            .unwrap();
        assert!(store.mark_task_running(&t.id).await.unwrap());
        // Second claim attempt fails — already running.
        assert!(!store.mark_task_running(&t.id).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_running_task_rejected() {
        let store = Store::open_in_memory().unwrap();
        let t = store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now())
            .await
            .unwrap();
        store.mark_task_running(&t.id).await.unwrap();
        assert!(!store.cancel_task(&t.id).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_pending_task_succeeds() {
        let store = Store::open_in_memory().unwrap();
        let t = store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now())
            .await
            .unwrap();
        assert!(store.cancel_task(&t.id).await.unwrap());
        let fetched = store.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn mark_failed_records_error() {
        let store = Store::open_in_memory().unwrap();
        let t = store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now())
            .await
            .unwrap();
        store.mark_task_running(&t.id).await.unwrap();
        store.mark_task_failed(&t.id, "boom".into()).await.unwrap();
        let fetched = store.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn list_tasks_by_agent_most_recent_first() {
        let store = Store::open_in_memory().unwrap();
        store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now())
            .await
            .unwrap();
        store
            .enqueue_task("jarvis".into(), None, "p".into(), "d".into(), Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        let rows = store.list_tasks_by_agent(Some("jarvis")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].execute_at >= rows[1].execute_at);
    }
}
