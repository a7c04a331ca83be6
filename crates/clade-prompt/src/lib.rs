// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt Assembler (§4.5): composes one system prompt per turn from an
//! agent's soul, its accrued long-term memory, and today's activity log.
use clade_registry::AgentBundle;

/// Last N characters of today's activity log kept when it runs long.
pub const ACTIVITY_LOG_CHAR_BUDGET: usize = 2_000;

/// Builds the composite system prompt for one turn:
/// 1. Trim `soul`; include it first when non-empty.
/// 2. If the agent's memory file exists and differs from the default
///    template placeholder, append a header and its trimmed content.
/// 3. If today's activity log exists, append a header and up to the last
///    [`ACTIVITY_LOG_CHAR_BUDGET`] characters, prefixed with an ellipsis
///    when truncated.
///
/// Sections are joined by a blank line.
pub fn assemble(soul: &str, bundle: &AgentBundle, today: &str) -> String {
    let mut sections = Vec::new();

    let soul = soul.trim();
    if !soul.is_empty() {
        sections.push(soul.to_string());
    }

    if let Some(memory) = read_trimmed(&bundle.memory_path) {
        if memory != clade_registry::DEFAULT_MEMORY_TEMPLATE.trim() {
            sections.push(format!("## Long-Term Memory\n\n{memory}"));
        }
    }

    let activity_path = bundle.todays_activity_log(today);
    if let Some(log) = read_trimmed(&activity_path) {
        let (body, truncated) = tail_chars(&log, ACTIVITY_LOG_CHAR_BUDGET);
        let body = if truncated { format!("…{body}") } else { body };
        sections.push(format!("## Today's Activity Log\n\n{body}"));
    }

    sections.join("\n\n")
}

fn read_trimmed(path: &std::path::Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Returns the last `budget` characters of `s` and whether truncation
/// happened, splitting on a char boundary rather than a byte offset.
fn tail_chars(s: &str, budget: usize) -> (String, bool) {
    let total = s.chars().count();
    if total <= budget {
        return (s.to_string(), false);
    }
    let skip = total - budget;
    (s.chars().skip(skip).collect(), true)
}
