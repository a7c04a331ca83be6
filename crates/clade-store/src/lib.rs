// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Embedded SQLite store (§4.1): sessions, cron jobs, deferred tasks, a
//! full-text memory index, and the skills registry — one database, opened
//! once at startup, all blocking calls pushed to `spawn_blocking` so the
//! async executor never stalls on disk I/O.
mod cron;
mod error;
mod memory;
mod migrations;
mod sessions;
mod skills;
mod tasks;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub use error::StoreError;
pub use memory::MemorySearchHit;
pub use sessions::SessionFilter;

/// Embedded database handle. Cheap to clone — internally `Arc`-shared.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path`, running
    /// idempotent migrations. Open failure is fatal (§4.1).
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Open(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    #[doc(hidden)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on a blocking-pool thread. Every
    /// public operation in this crate funnels through here so no caller can
    /// accidentally run a blocking SQLite call on the async executor (§4.1
    /// implementation note).
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Query(format!("blocking task panicked: {e}")))?
    }
}
