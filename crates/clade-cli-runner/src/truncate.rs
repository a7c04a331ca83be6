// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Head/tail truncation for stderr diagnostics — errors and summaries
//! cluster at the end of CLI output, so both ends are kept over the middle.
const OUTPUT_LIMIT_BYTES: usize = 20_000;
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

pub fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        let tail_start = s.len().saturating_sub(OUTPUT_LIMIT_BYTES / 2);
        let tail_str = &s[tail_start..];
        let head_end = (OUTPUT_LIMIT_BYTES / 2).min(s.len());
        let head_str = &s[..head_end];
        let omitted_bytes = s.len() - head_str.len() - tail_str.len();
        return format!("{head_str}\n...[{omitted_bytes} bytes omitted]...\n{tail_str}");
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());
    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}
