// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Tell Lifecycle's data model: a Plan's messages, subtasks, files, and
//! settings. Parent→child only — no cycles exist in this graph.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tell_model::Message;
use tell_tools::ToolRegistry;

use crate::assembler::AssemblyRequest;

/// The finite-state classification of what the current Tell turn is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    PlanningContext,
    PlanningTasks,
    Implementation,
}

impl Stage {
    pub fn role(self) -> tell_config::Role {
        match self {
            Stage::PlanningContext => tell_config::Role::Architect,
            Stage::PlanningTasks => tell_config::Role::Planner,
            Stage::Implementation => tell_config::Role::Coder,
        }
    }
}

/// One item in a plan's task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    /// File paths this subtask is scoped to, used by smart-context filtering.
    pub uses: Vec<String>,
    pub finished: bool,
}

/// One of the recognized context-part kinds the Assembler renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextPartKind {
    File,
    DirectoryTree,
    Map,
    Image,
    UrlContent,
}

/// A single unit of assemblable context: a file body, a directory tree
/// rendering, a code map, an image, or fetched URL content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPart {
    pub kind: ContextPartKind,
    /// File path or logical name (e.g. a URL for `UrlContent`).
    pub name: String,
    pub token_estimate: usize,
    pub body: Option<String>,
    pub auto_loaded: bool,
    pub cache_control: bool,
}

/// A plan's current file tree: path → body, plus the set of removed paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFiles {
    pub files: std::collections::HashMap<String, String>,
    pub removed: HashSet<String>,
}

/// Settings carried on a plan: model routing, RAG/MCP toggles, tool
/// registry snapshot. Read once per turn per §5's "stable snapshot" rule.
#[derive(Debug, Clone)]
pub struct PlanSettings {
    pub model_pack: tell_config::ModelPack,
    pub rag: tell_config::RagSettings,
    pub mcp: tell_config::McpSettings,
    pub tools: ToolRegistry,
}

/// A single user-initiated request, identified by a stable Plan ID and
/// branch label. Lives across multiple model turns (tool loop +
/// auto-continue) for the duration of one Tell.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: String,
    pub branch: String,
    pub messages: Vec<Message>,
    pub subtasks: Vec<Subtask>,
    pub context_parts: Vec<ContextPart>,
    pub files: PlanFiles,
    pub activate_paths_ordered: Vec<String>,
}

impl Plan {
    pub fn new(id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            branch: branch.into(),
            messages: Vec::new(),
            subtasks: Vec::new(),
            context_parts: Vec::new(),
            files: PlanFiles::default(),
            activate_paths_ordered: Vec::new(),
        }
    }

    pub fn all_subtasks_complete(&self) -> bool {
        !self.subtasks.is_empty() && self.subtasks.iter().all(|s| s.finished)
    }

    pub fn default_assembly_request(&self, stage: Stage) -> AssemblyRequest {
        AssemblyRequest {
            include_maps: true,
            smart_context_enabled: !self.subtasks.is_empty(),
            include_apply_script: stage == Stage::Implementation,
            base_only: false,
            auto_only: false,
            active_only: !self.activate_paths_ordered.is_empty(),
            activate_paths: self.activate_paths_ordered.iter().cloned().collect(),
            activate_paths_ordered: self.activate_paths_ordered.clone(),
            cache_control: true,
            max_tokens: 0,
            stage,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
