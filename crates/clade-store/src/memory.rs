// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use clade_core::MemoryChunk;

use crate::error::StoreError;
use crate::Store;

fn row_to_chunk(row: &Row) -> rusqlite::Result<MemoryChunk> {
    let updated_at: String = row.get("updated_at")?;
    let chunk_start: i64 = row.get("chunk_start")?;
    let chunk_end: i64 = row.get("chunk_end")?;
    Ok(MemoryChunk {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        file_path: row.get("file_path")?,
        chunk_text: row.get("chunk_text")?,
        chunk_start: chunk_start as usize,
        chunk_end: chunk_end as usize,
        updated_at: updated_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// One `search` result: the chunk plus its FTS5 relevance rank (lower is
/// more relevant — `bm25()`'s native ordering).
#[derive(Debug, Clone)]
pub struct MemorySearchHit {
    pub chunk: MemoryChunk,
    pub rank: f64,
}

/// Wraps each whitespace-separated token of `query` as an FTS5 phrase so
/// punctuation inside a token (e.g. `agent-id`, `v1.2`) doesn't break the
/// query parser (§4.1 "each token wrapped as a phrase to tolerate
/// punctuation").
fn tokenize_as_phrases(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Store {
    pub async fn index_chunk(&self, chunk: MemoryChunk) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO memory_chunks (id, agent_id, file_path, chunk_text, chunk_start, chunk_end, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET chunk_text = excluded.chunk_text,
                    chunk_start = excluded.chunk_start, chunk_end = excluded.chunk_end,
                    updated_at = excluded.updated_at",
                params![
                    chunk.id,
                    chunk.agent_id,
                    chunk.file_path,
                    chunk.chunk_text,
                    chunk.chunk_start as i64,
                    chunk.chunk_end as i64,
                    chunk.updated_at.to_rfc3339(),
                ],
            )?;
            conn.execute(
                "DELETE FROM memory_fts WHERE chunk_id = ?1",
                params![chunk.id],
            )?;
            conn.execute(
                "INSERT INTO memory_fts (chunk_id, agent_id, chunk_text) VALUES (?1, ?2, ?3)",
                params![chunk.id, chunk.agent_id, chunk.chunk_text],
            )?;
            Ok(())
        })
        .await
    }

    /// Clears every chunk previously indexed for `file_path`, e.g. before
    /// reindexing it after a file change (§3 `MemoryChunk` lifetime).
    pub async fn clear_file(&self, agent_id: &str, file_path: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let file_path = file_path.to_string();
        self.with_conn(move |conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM memory_chunks WHERE agent_id = ?1 AND file_path = ?2",
                )?;
                let rows = stmt.query_map(params![agent_id, file_path], |r| r.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for id in ids {
                conn.execute("DELETE FROM memory_fts WHERE chunk_id = ?1", params![id])?;
            }
            conn.execute(
                "DELETE FROM memory_chunks WHERE agent_id = ?1 AND file_path = ?2",
                params![agent_id, file_path],
            )?;
            Ok(())
        })
        .await
    }

    /// Full-text search scoped to `agent_id`, ordered by relevance
    /// (`bm25()`, ascending — lower is better).
    pub async fn search(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemorySearchHit>, StoreError> {
        let agent_id = agent_id.to_string();
        let fts_query = tokenize_as_phrases(query);
        self.with_conn(move |conn| {
            if fts_query.trim().is_empty() {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                "SELECT c.*, bm25(memory_fts) AS rank
                 FROM memory_fts f
                 JOIN memory_chunks c ON c.id = f.chunk_id
                 WHERE f.agent_id = ?1 AND memory_fts MATCH ?2
                 ORDER BY rank LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![agent_id, fts_query, limit as i64], |row| {
                let chunk = row_to_chunk(row)?;
                let rank: f64 = row.get("rank")?;
                Ok(MemorySearchHit { chunk, rank })
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn list_chunks(&self, agent_id: &str) -> Result<Vec<MemoryChunk>, StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM memory_chunks WHERE agent_id = ?1 ORDER BY file_path, chunk_start",
            )?;
            let rows = stmt.query_map(params![agent_id], row_to_chunk)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    /// Reindexes one file after a change (§3 "reindexed on file change"):
    /// clears its prior chunks, then windows `text` (via
    /// `clade_core::memory::chunk_file`) and indexes every resulting chunk.
    /// A no-op write (`text` unchanged) still re-derives and re-inserts —
    /// callers that want to skip unchanged files diff before calling this.
    pub async fn reindex_file(
        &self,
        agent_id: &str,
        file_path: &str,
        text: &str,
    ) -> Result<usize, StoreError> {
        self.clear_file(agent_id, file_path).await?;
        let chunks = clade_core::memory::chunk_file(agent_id, file_path, text, Utc::now());
        let count = chunks.len();
        for chunk in chunks {
            self.index_chunk(chunk).await?;
        }
        Ok(count)
    }

    /// Drops every indexed chunk for an agent (§3 "cleared on agent reset").
    pub async fn clear_agent_memory(&self, agent_id: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let ids: Vec<String> = {
                let mut stmt =
                    conn.prepare("SELECT id FROM memory_chunks WHERE agent_id = ?1")?;
                let rows = stmt.query_map(params![agent_id], |r| r.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for id in ids {
                conn.execute("DELETE FROM memory_fts WHERE chunk_id = ?1", params![id])?;
            }
            conn.execute("DELETE FROM memory_chunks WHERE agent_id = ?1", params![agent_id])?;
            Ok(())
        })
        .await
    }
}
