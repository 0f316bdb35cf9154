// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A dynamically-typed tool input value. Modeled as a tagged variant rather
/// than an untyped map so schema validation stays total and the HTTP
/// templater can refuse non-string path parameters without runtime
/// reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Array(Vec<ToolValue>),
    Object(HashMap<String, ToolValue>),
}

impl ToolValue {
    /// The value's string form for URL templating: strings pass through
    /// verbatim, numbers and booleans render with `Display`, and
    /// arrays/objects have no string form (the templater treats this as a
    /// skip-with-warning case).
    pub fn as_template_string(&self) -> Option<String> {
        match self {
            ToolValue::String(s) => Some(s.clone()),
            ToolValue::Number(n) => Some(if n.fract() == 0.0 { format!("{n:.0}") } else { n.to_string() }),
            ToolValue::Boolean(b) => Some(b.to_string()),
            ToolValue::Array(_) | ToolValue::Object(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ToolValue::Number(n) => Some(*n),
            ToolValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// How a [`ToolDefinition`] is dispatched once its input validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionType {
    Http {
        /// May contain `{param}` placeholders substituted from tool input.
        url: String,
        method: HttpMethod,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Predefined {
        function_name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// `POST`/`PUT`/`PATCH` carry unmatched inputs as a JSON body;
    /// `GET`/`DELETE` carry them as query parameters.
    pub fn carries_json_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

/// A tool the model may invoke for a given plan. Unique by `name` within a
/// [`crate::registry::ToolRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema (draft 2020-12) describing `tool_input`. `None` accepts
    /// any input without validation.
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    pub execution: ExecutionType,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_string_number_without_fraction_has_no_decimal() {
        assert_eq!(ToolValue::Number(5.0).as_template_string().unwrap(), "5");
    }

    #[test]
    fn template_string_number_with_fraction_keeps_it() {
        assert_eq!(ToolValue::Number(2.5).as_template_string().unwrap(), "2.5");
    }

    #[test]
    fn template_string_array_is_none() {
        assert!(ToolValue::Array(vec![ToolValue::Number(1.0)]).as_template_string().is_none());
    }

    #[test]
    fn as_number_parses_numeric_string() {
        assert_eq!(ToolValue::String("3".into()).as_number(), Some(3.0));
    }

    #[test]
    fn as_number_rejects_non_numeric_string() {
        assert_eq!(ToolValue::String("abc".into()).as_number(), None);
    }

    #[test]
    fn http_method_body_routing() {
        assert!(HttpMethod::Post.carries_json_body());
        assert!(!HttpMethod::Get.carries_json_body());
        assert!(!HttpMethod::Delete.carries_json_body());
    }

    #[test]
    fn tool_definition_round_trips_through_json() {
        let def = ToolDefinition {
            name: "echoTool".into(),
            description: "echoes input".into(),
            input_schema: Some(serde_json::json!({"type": "object"})),
            output_schema: None,
            execution: ExecutionType::Predefined { function_name: "echoTool".into() },
        };
        let json = serde_json::to_string(&def).unwrap();
        let back: ToolDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "echoTool");
        matches!(back.execution, ExecutionType::Predefined { .. });
    }
}
