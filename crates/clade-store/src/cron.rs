// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use clade_core::CronJob;

use crate::error::StoreError;
use crate::Store;

fn row_to_job(row: &Row) -> rusqlite::Result<CronJob> {
    let last_run_at: Option<String> = row.get("last_run_at")?;
    let enabled: i64 = row.get("enabled")?;
    Ok(CronJob {
        id: row.get("id")?,
        name: row.get("name")?,
        schedule: row.get("schedule")?,
        agent_id: row.get("agent_id")?,
        prompt: row.get("prompt")?,
        deliver_to: row.get("deliver_to")?,
        enabled: enabled != 0,
        last_run_at: last_run_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
    })
}

impl Store {
    /// Inserts a new cron job, generating an id. Fails with `Conflict` if
    /// `name` is already taken (§3 `CronJob.name` is unique).
    pub async fn create_cron_job(
        &self,
        name: String,
        schedule: String,
        agent_id: String,
        prompt: String,
        deliver_to: Option<String>,
        enabled: bool,
    ) -> Result<CronJob, StoreError> {
        self.with_conn(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM cron_jobs WHERE name = ?1",
                    params![name],
                    |r| r.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::Conflict(format!(
                    "cron job named {name:?} already exists"
                )));
            }
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO cron_jobs (id, name, schedule, agent_id, prompt, deliver_to, enabled, last_run_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
                params![id, name, schedule, agent_id, prompt, deliver_to, enabled as i64],
            )?;
            Ok(CronJob {
                id,
                name,
                schedule,
                agent_id,
                prompt,
                deliver_to,
                enabled,
                last_run_at: None,
            })
        })
        .await
    }

    pub async fn get_cron_job_by_id(&self, id: &str) -> Result<Option<CronJob>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM cron_jobs WHERE id = ?1", params![id], row_to_job)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    pub async fn get_cron_job_by_name(&self, name: &str) -> Result<Option<CronJob>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM cron_jobs WHERE name = ?1",
                params![name],
                row_to_job,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn list_cron_jobs(&self) -> Result<Vec<CronJob>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM cron_jobs ORDER BY name")?;
            let rows = stmt.query_map([], row_to_job)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn set_cron_job_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE cron_jobs SET enabled = ?1 WHERE id = ?2",
                params![enabled as i64, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("cron job {id}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn touch_cron_last_run(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE cron_jobs SET last_run_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_cron_job(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    /// Generalized column update (§4.1 `update`): currently schedule and
    /// prompt are the only fields an operator edits in place; `name` and
    /// `agent_id` are immutable after creation (recreate the job instead).
    pub async fn update_cron_job(
        &self,
        id: &str,
        schedule: Option<String>,
        prompt: Option<String>,
        deliver_to: Option<Option<String>>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            if let Some(schedule) = schedule {
                conn.execute(
                    "UPDATE cron_jobs SET schedule = ?1 WHERE id = ?2",
                    params![schedule, id],
                )?;
            }
            if let Some(prompt) = prompt {
                conn.execute(
                    "UPDATE cron_jobs SET prompt = ?1 WHERE id = ?2",
                    params![prompt, id],
                )?;
            }
            if let Some(deliver_to) = deliver_to {
                conn.execute(
                    "UPDATE cron_jobs SET deliver_to = ?1 WHERE id = ?2",
                    params![deliver_to, id],
                )?;
            }
            Ok(())
        })
        .await
    }
}
