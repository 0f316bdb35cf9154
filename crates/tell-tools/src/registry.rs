// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::tool::ToolDefinition;

/// Error taxonomy for registry operations; variants map directly onto the
/// HTTP status codes the (out-of-scope) boundary would use.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool name must not be empty")]
    MissingName,
    #[error("tool {0:?} already exists")]
    Duplicate(String),
    #[error("tool {0:?} not found")]
    NotFound(String),
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::MissingName => "validation",
            RegistryError::Duplicate(_) => "conflict",
            RegistryError::NotFound(_) => "not_found",
        }
    }
}

/// Per-plan set of tool definitions. A plain `Vec` with linear scan: plans
/// carry at most a handful of tools, so there is no benefit to an indexed
/// map, and the lifecycle only ever reads a stable snapshot at turn start.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: ToolDefinition) -> Result<&ToolDefinition, RegistryError> {
        if def.name.trim().is_empty() {
            return Err(RegistryError::MissingName);
        }
        if self.tools.iter().any(|t| t.name == def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.tools.push(def);
        Ok(self.tools.last().expect("just pushed"))
    }

    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Result<ToolDefinition, RegistryError> {
        let idx = self.tools.iter().position(|t| t.name == name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(self.tools.remove(idx))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
