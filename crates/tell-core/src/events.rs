// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Events emitted by the lifecycle during a single turn. A consumer (the
//! out-of-scope HTTP routing layer) subscribes to these to stream a
//! response; the lifecycle itself never assumes anyone is listening.

use crate::plan::Stage;
use tell_tools::ToolRequest;

#[derive(Debug, Clone)]
pub enum TellEvent {
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// The complete text response for the current turn, after streaming
    /// finishes and before a tool call (if any) is parsed out of it.
    TextComplete(String),
    /// The model's output was recognized as a tool invocation.
    ToolCallStarted { call_id: String, request: ToolRequest },
    /// A tool call finished.
    ToolCallFinished { call_id: String, tool_name: String, output: String, is_error: bool },
    /// Current token usage for the in-flight turn.
    TokenUsage { input: u32, output: u32, context_total: usize, cache_read: u32, cache_write: u32 },
    /// The lifecycle moved from one stage to the next.
    StageChanged { from: Stage, to: Stage },
    /// One iteration of the auto-continue loop completed; `iteration` is
    /// 1-based and bounded by the fixed ceiling.
    IterationCompleted { iteration: u32 },
    /// The lifecycle has finished processing the current user turn.
    TurnComplete,
    /// A recoverable error occurred (e.g. a retry is about to happen).
    Error(String),
    /// New auto-load paths were detected in the reply and are awaiting
    /// client confirmation before being added to context (§5).
    AutoLoadPending { paths: Vec<String> },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
