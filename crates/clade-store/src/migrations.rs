// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rusqlite::Connection;

use crate::error::StoreError;

/// Runs at open time, idempotent (`CREATE TABLE IF NOT EXISTS`). No
/// versioned migration chain exists yet — this is the only schema version
/// this store has shipped, so there is nothing to migrate from (§4.1
/// "migrations run at open time and are idempotent").
pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY,
            agent_id        TEXT NOT NULL,
            channel         TEXT,
            channel_user_id TEXT,
            chat_id         TEXT,
            status          TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            last_active_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_lookup
            ON sessions (agent_id, channel, channel_user_id, chat_id, status);

        CREATE TABLE IF NOT EXISTS cron_jobs (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL UNIQUE,
            schedule     TEXT NOT NULL,
            agent_id     TEXT NOT NULL,
            prompt       TEXT NOT NULL,
            deliver_to   TEXT,
            enabled      INTEGER NOT NULL,
            last_run_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id          TEXT PRIMARY KEY,
            agent_id    TEXT NOT NULL,
            session_id  TEXT,
            prompt      TEXT NOT NULL,
            description TEXT NOT NULL,
            execute_at  TEXT NOT NULL,
            status      TEXT NOT NULL,
            error       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks (status, execute_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_agent ON tasks (agent_id, execute_at DESC);

        CREATE TABLE IF NOT EXISTS memory_chunks (
            id          TEXT PRIMARY KEY,
            agent_id    TEXT NOT NULL,
            file_path   TEXT NOT NULL,
            chunk_text  TEXT NOT NULL,
            chunk_start INTEGER NOT NULL,
            chunk_end   INTEGER NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_file ON memory_chunks (agent_id, file_path);

        CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
            chunk_id UNINDEXED,
            agent_id UNINDEXED,
            chunk_text
        );

        CREATE TABLE IF NOT EXISTS skills (
            name    TEXT PRIMARY KEY,
            status  TEXT NOT NULL,
            path    TEXT NOT NULL,
            config  TEXT
        );
        "#,
    )
    .map_err(|e| StoreError::Open(e.to_string()))?;
    Ok(())
}
