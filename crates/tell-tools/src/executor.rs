// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dispatches a validated tool call to its HTTP endpoint or predefined
//! function, bounding latency and response size per §4.6.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use tracing::warn;

use crate::tool::{ExecutionType, HttpMethod, ToolDefinition, ToolValue};

const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("tool {tool}: {message}")]
    Failed { tool: String, message: String },
}

impl ExecError {
    fn new(tool: &str, message: impl Into<String>) -> Self {
        Self::Failed { tool: tool.to_string(), message: message.into() }
    }
}

type PredefinedFn = fn(&HashMap<String, ToolValue>) -> Result<String, String>;

fn predefined_registry() -> &'static HashMap<&'static str, PredefinedFn> {
    static REGISTRY: OnceLock<HashMap<&'static str, PredefinedFn>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, PredefinedFn> = HashMap::new();
        m.insert("echoTool", echo_tool as PredefinedFn);
        m.insert("simpleCalculator", simple_calculator as PredefinedFn);
        m
    })
}

fn echo_tool(inputs: &HashMap<String, ToolValue>) -> Result<String, String> {
    serde_json::to_string(inputs).map_err(|e| e.to_string())
}

fn simple_calculator(inputs: &HashMap<String, ToolValue>) -> Result<String, String> {
    let a = inputs.get("a").and_then(ToolValue::as_number).ok_or("missing or non-numeric `a`")?;
    let b = inputs.get("b").and_then(ToolValue::as_number).ok_or("missing or non-numeric `b`")?;
    let op = inputs.get("operation").and_then(ToolValue::as_str).ok_or("missing `operation`")?;
    let result = match op {
        "add" => a + b,
        "subtract" => a - b,
        "multiply" => a * b,
        "divide" => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            a / b
        }
        other => return Err(format!("unknown operation {other:?}")),
    };
    Ok(format!("{result:.6}"))
}

/// Substitute `{k}` placeholders in `url` with `inputs[k]`'s string form.
/// Non-string values are skipped with a warning; returns the keys consumed
/// by a successful substitution so the caller can exclude them from the
/// body/query set.
fn template_url(url: &str, inputs: &HashMap<String, ToolValue>) -> (String, std::collections::HashSet<String>) {
    let mut result = url.to_string();
    let mut consumed = std::collections::HashSet::new();
    for (key, value) in inputs {
        let placeholder = format!("{{{key}}}");
        if !result.contains(&placeholder) {
            continue;
        }
        match value.as_template_string() {
            Some(s) => {
                result = result.replace(&placeholder, &s);
                consumed.insert(key.clone());
            }
            None => warn!(tool_param = %key, "non-string value cannot be substituted into URL template"),
        }
    }
    if result.contains('{') {
        warn!(url = %result, "unresolved placeholder remains in URL template");
    }
    (result, consumed)
}

fn tool_value_to_json(v: &ToolValue) -> serde_json::Value {
    match v {
        ToolValue::Number(n) => serde_json::json!(n),
        ToolValue::String(s) => serde_json::json!(s),
        ToolValue::Boolean(b) => serde_json::json!(b),
        ToolValue::Array(items) => serde_json::Value::Array(items.iter().map(tool_value_to_json).collect()),
        ToolValue::Object(map) => serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), tool_value_to_json(v))).collect()),
    }
}

pub struct ToolExecutor {
    client: reqwest::Client,
    timeout: Duration,
    max_response_bytes: usize,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, MAX_RESPONSE_BYTES)
    }
}

impl ToolExecutor {
    pub fn new(timeout: Duration, max_response_bytes: usize) -> Self {
        Self { client: reqwest::Client::new(), timeout, max_response_bytes }
    }

    pub async fn execute(&self, def: &ToolDefinition, inputs: HashMap<String, ToolValue>) -> Result<String, ExecError> {
        match &def.execution {
            ExecutionType::Predefined { function_name } => self.execute_predefined(&def.name, function_name, &inputs),
            ExecutionType::Http { url, method, headers } => self.execute_http(&def.name, url, *method, headers, inputs).await,
        }
    }

    fn execute_predefined(&self, tool_name: &str, function_name: &str, inputs: &HashMap<String, ToolValue>) -> Result<String, ExecError> {
        let f = predefined_registry().get(function_name).ok_or_else(|| ExecError::new(tool_name, format!("unknown predefined function {function_name:?}")))?;
        f(inputs).map_err(|e| ExecError::new(tool_name, e))
    }

    async fn execute_http(
        &self,
        tool_name: &str,
        url_template: &str,
        method: HttpMethod,
        headers: &HashMap<String, String>,
        inputs: HashMap<String, ToolValue>,
    ) -> Result<String, ExecError> {
        let (url, consumed) = template_url(url_template, &inputs);
        let remaining: HashMap<&String, &ToolValue> = inputs.iter().filter(|(k, _)| !consumed.contains(*k)).collect();

        let verb = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(verb, &url).timeout(self.timeout);
        for (k, v) in headers {
            builder = builder.header(k, v);
        }

        if method.carries_json_body() {
            let body: serde_json::Map<String, serde_json::Value> = remaining.iter().map(|(k, v)| ((*k).clone(), tool_value_to_json(v))).collect();
            builder = builder.json(&serde_json::Value::Object(body));
        } else if !remaining.is_empty() {
            let query: Vec<(String, String)> = remaining.iter().filter_map(|(k, v)| v.as_template_string().map(|s| ((*k).clone(), s))).collect();
            builder = builder.query(&query);
        }

        let response = builder.send().await.map_err(|e| ExecError::new(tool_name, e.to_string()))?;
        let status = response.status();
        let bytes = read_capped(response, self.max_response_bytes).await.map_err(|e| ExecError::new(tool_name, e.to_string()))?;
        let body_text = String::from_utf8_lossy(&bytes).into_owned();

        if status.is_success() {
            Ok(body_text)
        } else {
            Err(ExecError::new(tool_name, format!("HTTP {status}: {body_text}")))
        }
    }
}

/// Read a response body, truncating at `cap` bytes rather than erroring.
async fn read_capped(response: reqwest::Response, cap: usize) -> Result<Vec<u8>, reqwest::Error> {
    use futures::StreamExt;
    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = cap.saturating_sub(buf.len());
        if remaining == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }
    Ok(buf)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
