// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// The three planning/implementation personas that a Tell turn can be
/// dispatched under. Distinct from the wire-level conversation [`Role`]
/// (system/user/assistant/tool) in `tell-model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Architect,
    Planner,
    Coder,
}

/// A single concrete model endpoint: provider, model name, credentials,
/// sampling and caching knobs. One [`RoleModelConfig`] may list several of
/// these, keyed by input-token tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier — a generic label the core never interprets
    /// beyond routing to a [`tell_model::ModelProvider`] implementation
    /// supplied by the caller. No concrete SDK lives in this crate.
    pub provider: String,
    pub name: String,
    pub api_key_env: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,
    #[serde(default)]
    pub extended_cache_time: bool,
}

/// One tier of a role's model ladder: this config applies when the
/// assembled input is estimated at `up_to_input_tokens` tokens or fewer.
/// `None` means "no upper bound" and must be the last entry considered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVariant {
    pub up_to_input_tokens: Option<u32>,
    pub model: ModelConfig,
    /// Effective max output tokens this variant is allowed to request,
    /// independent of `model.max_tokens` (which bounds the provider call
    /// itself). The lifecycle budgets against this value.
    pub effective_max_tokens: u32,
}

/// Kinds of upstream model failure the fallback matrix can react to.
/// Mirrors the "Upstream failure" bucket of the error taxonomy; validation
/// and not-found errors never trigger a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StreamError,
    Timeout,
    RateLimited,
    ContextWindowExceeded,
    ProviderUnavailable,
}

/// One row of the ordered fallback matrix: "once `retry_count` reaches
/// `min_retry_count` and the failure is (at least) `error_kind`, switch to
/// `replacement` for the next attempt." Rows are evaluated top to bottom;
/// the first match wins. An empty list means plain retry with no
/// substitution, per the documented resolution of the upstream
/// `GetFallbackForModelError` ambiguity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRule {
    pub min_retry_count: u32,
    pub error_kind: ErrorKind,
    pub replacement: ModelConfig,
}

/// The full model ladder + fallback matrix for a single [`Role`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleModelConfig {
    /// Ascending by `up_to_input_tokens` (`None` last). Not enforced by
    /// the type; [`RoleModelConfig::get_for_input_tokens`] tolerates any
    /// order but callers should keep configs sorted for clarity.
    pub variants: Vec<ModelVariant>,
    #[serde(default)]
    pub fallback: Vec<FallbackRule>,
}

impl RoleModelConfig {
    /// The first variant whose `up_to_input_tokens` covers `input_tokens`,
    /// or the final unbounded variant as a catch-all. `None` only when
    /// `variants` is empty.
    pub fn get_for_input_tokens(&self, input_tokens: u32) -> Option<&ModelVariant> {
        self.variants
            .iter()
            .find(|v| v.up_to_input_tokens.map(|cap| input_tokens <= cap).unwrap_or(false))
            .or_else(|| self.variants.iter().find(|v| v.up_to_input_tokens.is_none()))
    }

    pub fn effective_max_tokens(&self, input_tokens: u32) -> Option<u32> {
        self.get_for_input_tokens(input_tokens).map(|v| v.effective_max_tokens)
    }

    /// First fallback rule whose `min_retry_count` is at or below
    /// `retry_count` and whose `error_kind` matches, scanning top to
    /// bottom. `None` means plain retry with no substitution.
    pub fn fallback_for(&self, retry_count: u32, kind: ErrorKind) -> Option<&ModelConfig> {
        self.fallback
            .iter()
            .find(|r| retry_count >= r.min_retry_count && r.error_kind == kind)
            .map(|r| &r.replacement)
    }
}

/// The role → model-ladder map a plan's settings select from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPack {
    #[serde(default)]
    pub roles: HashMap<Role, RoleModelConfig>,
}

impl ModelPack {
    pub fn role(&self, role: Role) -> Option<&RoleModelConfig> {
        self.roles.get(&role)
    }
}

/// L1/L2 cache tuning, deserialized straight into [`tell_cache::CacheConfig`]
/// shape (kept as a distinct config-facing struct so this crate has no
/// dependency on tell-cache's internal representation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_items: usize,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_items: 10_000, default_ttl_secs: 300, cleanup_interval_secs: 60 }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Plan-level RAG toggle and retrieval shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: u32,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_chunk_size_tokens() -> u32 {
    512
}

fn default_top_n() -> usize {
    3
}

impl Default for RagSettings {
    fn default() -> Self {
        Self { enabled: false, chunk_size_tokens: default_chunk_size_tokens(), top_n: default_top_n() }
    }
}

/// Plan-level MCP (tool invocation) toggle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default)]
    pub enabled: bool,
}

/// Lifecycle limits that are knobs rather than fixed invariants. The
/// iteration ceiling (200) is deliberately *not* here: it is a fixed
/// constant, not a configurable value, so it lives as a `const` in
/// `tell-core`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TellSettings {
    #[serde(default = "default_error_retry_limit")]
    pub num_error_retry_limit: u32,
    #[serde(default = "default_fallback_retry_limit")]
    pub num_fallback_retry_limit: u32,
    #[serde(default = "default_tool_http_timeout_secs")]
    pub tool_http_timeout_secs: u64,
    #[serde(default = "default_tool_http_max_response_bytes")]
    pub tool_http_max_response_bytes: usize,
    #[serde(default = "default_client_confirm_deadline_secs")]
    pub client_confirm_deadline_secs: u64,
}

fn default_error_retry_limit() -> u32 {
    3
}
fn default_fallback_retry_limit() -> u32 {
    2
}
fn default_tool_http_timeout_secs() -> u64 {
    15
}
fn default_tool_http_max_response_bytes() -> usize {
    1024 * 1024
}
fn default_client_confirm_deadline_secs() -> u64 {
    30
}

impl Default for TellSettings {
    fn default() -> Self {
        Self {
            num_error_retry_limit: default_error_retry_limit(),
            num_fallback_retry_limit: default_fallback_retry_limit(),
            tool_http_timeout_secs: default_tool_http_timeout_secs(),
            tool_http_max_response_bytes: default_tool_http_max_response_bytes(),
            client_confirm_deadline_secs: default_client_confirm_deadline_secs(),
        }
    }
}

impl TellSettings {
    pub fn tool_http_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_http_timeout_secs)
    }

    pub fn client_confirm_deadline(&self) -> Duration {
        Duration::from_secs(self.client_confirm_deadline_secs)
    }
}

/// Root configuration, assembled by [`crate::load`] from layered YAML files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model_pack: ModelPack,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub rag: RagSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub tell: TellSettings,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
