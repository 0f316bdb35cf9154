// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Stream Processor (§4.7): consumes provider chunks in arrival order and
//! accumulates the assistant's reply, tool-call deltas, and usage. It does
//! not itself decide tool dispatch — that is the Tell Lifecycle's job once
//! [`StreamOutcome`] is produced.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tell_model::{ResponseEvent, Usage};

/// One in-progress tool call, accumulated across possibly-interleaved deltas
/// keyed by `index` (per [`ResponseEvent::ToolCall`]'s doc).
#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// The result of draining a model response stream to completion.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub current_reply_content: String,
    pub num_tokens: usize,
    pub usage: Usage,
    /// Structured file-edit operations accumulated in arrival order
    /// (`ResponseEvent::Operation`), opaque beyond that ordering.
    pub operations: Vec<serde_json::Value>,
    /// Non-fatal warnings surfaced mid-stream (`ResponseEvent::Error`).
    pub recoverable_errors: Vec<String>,
    pub first_token_at: Option<Instant>,
    pub request_started_at: Instant,
}

impl StreamOutcome {
    pub fn elapsed_to_first_token(&self) -> Option<Duration> {
        self.first_token_at.map(|t| t.duration_since(self.request_started_at))
    }
}

/// Drain `stream` to completion, accumulating text deltas and usage.
/// Returns as soon as the stream yields [`ResponseEvent::Done`] or ends.
pub async fn drain_stream(mut stream: tell_model::provider::ResponseStream, request_started_at: Instant) -> anyhow::Result<StreamOutcome> {
    let mut current_reply_content = String::new();
    let mut usage = Usage::default();
    let mut operations = Vec::new();
    let mut recoverable_errors = Vec::new();
    let mut first_token_at = None;
    let mut pending_calls: HashMap<usize, PendingToolCall> = HashMap::new();

    while let Some(event) = stream.next().await {
        let event = event?;
        match event {
            ResponseEvent::TextDelta(delta) => {
                if first_token_at.is_none() {
                    first_token_at = Some(Instant::now());
                }
                current_reply_content.push_str(&delta);
            }
            ResponseEvent::ToolCall { index, id, name, arguments } => {
                if first_token_at.is_none() {
                    first_token_at = Some(Instant::now());
                }
                let entry = pending_calls.entry(index).or_default();
                if !id.is_empty() {
                    entry.id = id;
                }
                if !name.is_empty() {
                    entry.name = name;
                }
                entry.arguments.push_str(&arguments);
            }
            ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens } => {
                usage = Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens };
            }
            ResponseEvent::Operation(op) => operations.push(op),
            ResponseEvent::Error(msg) => recoverable_errors.push(msg),
            ResponseEvent::Done => break,
        }
    }

    // A streamed tool call arrives as structured deltas rather than inline
    // text; fold the accumulated call back into the reply as the same
    // top-level JSON envelope the parser expects, so the lifecycle can run
    // one parse path regardless of whether the provider streamed text or a
    // native tool-call event.
    if current_reply_content.trim().is_empty() {
        if let Some(call) = pending_calls.into_values().next() {
            let input: serde_json::Value = serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Object(Default::default()));
            current_reply_content = serde_json::json!({
                "plandex_tool_invocation": { "tool_name": call.name, "tool_input": input }
            })
            .to_string();
        }
    }

    let num_tokens = (current_reply_content.len() / 4).max(if current_reply_content.is_empty() { 0 } else { 1 });

    Ok(StreamOutcome { current_reply_content, num_tokens, usage, operations, recoverable_errors, first_token_at, request_started_at })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
