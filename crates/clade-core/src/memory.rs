// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target window size and overlap for markdown chunking, in characters.
/// `clade-store`'s indexer windows an agent's markdown files at this
/// granularity before inserting into the full-text index.
pub const CHUNK_TARGET_CHARS: usize = 1_600;
pub const CHUNK_OVERLAP_CHARS: usize = 320;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub id: String,
    pub agent_id: String,
    pub file_path: String,
    pub chunk_text: String,
    pub chunk_start: usize,
    pub chunk_end: usize,
    pub updated_at: DateTime<Utc>,
}

/// Splits `text` into overlapping windows of `CHUNK_TARGET_CHARS`,
/// overlapping by `CHUNK_OVERLAP_CHARS` (§3 "derived from an agent's
/// markdown files via overlapping windowing"). Splits on char boundaries
/// only — `text` may contain multi-byte UTF-8 — and never emits an empty
/// window or one for empty input. The stride is always positive even when
/// overlap is configured larger than the target, so this always terminates.
pub fn window_chunks(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }
    let stride = CHUNK_TARGET_CHARS.saturating_sub(CHUNK_OVERLAP_CHARS).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + CHUNK_TARGET_CHARS).min(len);
        windows.push((start, end));
        if end == len {
            break;
        }
        start += stride;
    }
    windows
}

/// `window_chunks` plus the substring materialization and id assignment
/// `clade-store`'s indexer needs — one [`MemoryChunk`] per window, ids of
/// the form `<agent_id>:<file_path>:<start>`.
pub fn chunk_file(agent_id: &str, file_path: &str, text: &str, now: DateTime<Utc>) -> Vec<MemoryChunk> {
    let chars: Vec<char> = text.chars().collect();
    window_chunks(text)
        .into_iter()
        .map(|(start, end)| MemoryChunk {
            id: format!("{agent_id}:{file_path}:{start}"),
            agent_id: agent_id.to_string(),
            file_path: file_path.to_string(),
            chunk_text: chars[start..end].iter().collect(),
            chunk_start: start,
            chunk_end: end,
            updated_at: now,
        })
        .collect()
}
