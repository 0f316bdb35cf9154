// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Side effects of a committed (non-tool-call) assistant reply (§4.8 S5):
//! subtask list mutation and auto-load path detection. Both read the reply
//! text the model just produced; neither touches the conversation history.

use std::collections::HashSet;

use crate::plan::{Plan, Subtask};

const SUBTASK_HEADER: &str = "### Subtask Updates ###";
const SUBTASK_FOOTER: &str = "### End of Subtask Updates ###";

/// Scan `reply` for backtick-wrapped identifiers that match a path already
/// known to the plan, returning the newly-referenced ones in first-occurrence
/// order. Unknown backtick spans (a function name, a shell command) are
/// ignored — only spans equal to a known path count as an auto-load request.
pub fn detect_auto_load_paths(reply: &str, known_paths: &HashSet<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut rest = reply;
    while let Some(open) = rest.find('`') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find('`') else { break };
        let candidate = &rest[..close];
        if known_paths.contains(candidate) && seen.insert(candidate.to_string()) {
            found.push(candidate.to_string());
        }
        rest = &rest[close + 1..];
    }
    found
}

/// Apply a `### Subtask Updates ###` ... `### End of Subtask Updates ###`
/// block embedded in `reply`, if present. Each line inside is one of:
/// `+ <title> [uses: a, b]` (add), `- <title>` (remove by exact title), or
/// `x <title>` (mark finished by exact title). A reply with no such block is
/// a no-op — most replies in Planning/Context carry none.
pub fn apply_subtask_updates(plan: &mut Plan, reply: &str) {
    let Some(header_at) = reply.find(SUBTASK_HEADER) else { return };
    let body_start = header_at + SUBTASK_HEADER.len();
    let body = match reply[body_start..].find(SUBTASK_FOOTER) {
        Some(footer_at) => &reply[body_start..body_start + footer_at],
        None => &reply[body_start..],
    };

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("+ ") {
            let (title, uses) = split_title_and_uses(rest);
            plan.subtasks.push(Subtask { title, uses, finished: false });
        } else if let Some(title) = line.strip_prefix("- ") {
            let title = title.trim();
            plan.subtasks.retain(|s| s.title != title);
        } else if let Some(title) = line.strip_prefix("x ") {
            let title = title.trim();
            if let Some(s) = plan.subtasks.iter_mut().find(|s| s.title == title) {
                s.finished = true;
            }
        }
    }
}

fn split_title_and_uses(rest: &str) -> (String, Vec<String>) {
    match rest.find('[') {
        Some(bracket) => {
            let title = rest[..bracket].trim().to_string();
            let inside = rest[bracket + 1..].trim_end_matches(']').trim();
            let uses = inside
                .strip_prefix("uses:")
                .unwrap_or(inside)
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            (title, uses)
        }
        None => (rest.trim().to_string(), Vec::new()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
