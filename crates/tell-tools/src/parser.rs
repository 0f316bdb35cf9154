// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Detects and validates the in-band MCP tool-call wire format in model
//! output text: `{"plandex_tool_invocation": {"tool_name": ..., "tool_input": {...}}}`.

use serde::Deserialize;
use serde_json::Value;

use crate::registry::ToolRegistry;
use crate::tool::ToolDefinition;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub tool_name: String,
    pub tool_input: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("schema compile error: {0}")]
    SchemaCompile(String),
}

/// Outcome of [`try_parse`]: `(tool_request?, is_tool_call,
/// validation_error?, matched_def?)`.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub request: Option<ToolRequest>,
    pub is_tool_call: bool,
    pub validation_error: Option<String>,
    pub matched: Option<ToolDefinition>,
}

impl ParseOutcome {
    fn not_a_tool_call() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct Envelope {
    plandex_tool_invocation: Invocation,
}

#[derive(Deserialize)]
struct Invocation {
    tool_name: String,
    #[serde(default)]
    tool_input: Option<Value>,
}

/// Step 1 of the contract: distinguish an ordinary reply from a tool call.
/// The whole (trimmed) text must parse as a single JSON object carrying
/// `plandex_tool_invocation.tool_name`; anything else is a normal reply.
fn try_extract(response_text: &str) -> Option<ToolRequest> {
    let trimmed = response_text.trim();
    let envelope: Envelope = serde_json::from_str(trimmed).ok()?;
    let name = envelope.plandex_tool_invocation.tool_name;
    if name.trim().is_empty() {
        return None;
    }
    Some(ToolRequest { tool_name: name, tool_input: envelope.plandex_tool_invocation.tool_input.unwrap_or(Value::Null) })
}

/// Implements §4.5's four-step algorithm.
pub fn try_parse(response_text: &str, tools: &ToolRegistry) -> Result<ParseOutcome, ParseError> {
    let Some(request) = try_extract(response_text) else {
        return Ok(ParseOutcome::not_a_tool_call());
    };

    let Some(def) = tools.get(&request.tool_name).cloned() else {
        let validation_error = Some(format!("tool {:?} not found", request.tool_name));
        return Ok(ParseOutcome { request: Some(request), is_tool_call: true, validation_error, matched: None });
    };

    let Some(schema) = &def.input_schema else {
        return Ok(ParseOutcome { request: Some(request), is_tool_call: true, validation_error: None, matched: Some(def) });
    };

    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
        .map_err(|e| ParseError::SchemaCompile(e.to_string()))?;

    let input = if request.tool_input.is_null() { Value::Object(serde_json::Map::new()) } else { request.tool_input.clone() };

    match validator.validate(&input) {
        Ok(()) => Ok(ParseOutcome { request: Some(request), is_tool_call: true, validation_error: None, matched: Some(def) }),
        Err(e) => Ok(ParseOutcome { request: Some(request), is_tool_call: true, validation_error: Some(e.to_string()), matched: Some(def) }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
