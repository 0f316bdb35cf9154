// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System-prompt construction for a Tell turn. Split into a stable
//! (cacheable) prefix and a volatile suffix so callers can mark the stable
//! half with a cache-control part and leave the iteration/stage banner
//! outside it.

use crate::plan::Stage;

/// Everything needed to build one stage's system prompt.
#[derive(Debug, Default)]
pub struct PromptContext<'a> {
    /// Text appended verbatim after the Guidelines section (e.g. a
    /// project-specific instructions file).
    pub append: Option<&'a str>,
    /// Names of MCP tools currently registered on the plan, rendered as a
    /// catalog so the model knows what it can invoke.
    pub tool_names: &'a [String],
}

impl<'a> PromptContext<'a> {
    /// The stable half: mode instructions, guidelines, tool catalog, and any
    /// appended project instructions. Does not change within a plan's stage.
    pub fn stable_only(&self) -> Self {
        Self { append: self.append, tool_names: self.tool_names }
    }
}

mod guidelines {
    pub fn general() -> &'static str {
        "- Be concise and precise. Use tools instead of guessing at file contents.\n\
         - Re-read the current subtask list before acting; do not restate it unless asked."
    }

    pub fn context_gathering() -> &'static str {
        "- Only request context you do not already have — auto-loaded and active files are provided without asking.\n\
         - Prefer `loadContext` (directory tree, map, or named file) over guessing at project layout.\n\
         - Stop gathering context once you can describe the change with specific file paths."
    }

    pub fn tool_usage() -> &'static str {
        "- Emit a tool call as the sole top-level JSON object in your reply, with no surrounding prose.\n\
         - Wait for the tool result before assuming its output; never fabricate a result.\n\
         - Only call tools listed in the catalog below."
    }

    pub fn task_quality() -> &'static str {
        "- Mark a subtask finished only once its change is actually present in the file plan.\n\
         - Do not invent subtasks beyond what the user's request requires.\n\
         - Preserve existing code structure and style in files you edit."
    }
}

fn build_guidelines_section() -> String {
    format!(
        "## Guidelines\n\n\
         ### General\n{}\n\n\
         ### Context Gathering\n{}\n\n\
         ### Tool Usage\n{}\n\n\
         ### Task Quality\n{}",
        guidelines::general(),
        guidelines::context_gathering(),
        guidelines::tool_usage(),
        guidelines::task_quality(),
    )
}

fn build_tool_catalog_section(tool_names: &[String]) -> String {
    if tool_names.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = tool_names.iter().map(|n| format!("  <tool>{n}</tool>")).collect();
    format!("\n\n## Available Tools\n\n<tool_catalog>\n{}\n</tool_catalog>", entries.join("\n"))
}

fn stage_instructions(stage: Stage) -> &'static str {
    match stage {
        Stage::PlanningContext => {
            "You are gathering context for a coding request. Identify the files, directories, \
             and external resources needed to plan the change. You MUST NOT write or edit files \
             in this stage. Pending files already staged for this plan appear as one-line \
             markers rather than full content — load them explicitly if you need their contents."
        }
        Stage::PlanningTasks => {
            "You are breaking a coding request into an ordered list of subtasks. Each subtask \
             should name the files it uses. Do not write or edit files in this stage; produce \
             the task breakdown only."
        }
        Stage::Implementation => {
            "You are implementing the plan's subtasks in order. Use file-editing tools to apply \
             changes, and mark a subtask finished only after its change is reflected in the file \
             plan. Continue to the next subtask automatically; do not stop to ask for confirmation \
             between subtasks unless a tool call fails."
        }
    }
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::PlanningContext => "planning/context",
        Stage::PlanningTasks => "planning/tasks",
        Stage::Implementation => "implementation",
    }
}

/// Build the system prompt for the given plan stage.
pub fn system_prompt(stage: Stage, ctx: &PromptContext<'_>) -> String {
    let identity = format!("You are Tell, a coding plan engine operating in stage `{}`.", stage_name(stage));
    let tool_catalog_section = build_tool_catalog_section(ctx.tool_names);
    let guidelines_section = build_guidelines_section();
    let append_section = ctx.append.map(|extra| format!("\n\n{extra}")).unwrap_or_default();

    format!(
        "{identity}\n\n{instructions}{tool_catalog_section}\n\n{guidelines_section}{append_section}",
        instructions = stage_instructions(stage),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
