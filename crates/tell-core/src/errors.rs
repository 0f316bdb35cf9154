// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Tell Lifecycle's error taxonomy (§7). Every variant maps to a `kind()`
//! string so an out-of-scope HTTP boundary can translate it into a status
//! code without matching on the enum itself.

/// The seven error kinds recognized at the Tell boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ResourceExhausted,
    UpstreamFailure,
    Cancellation,
    InternalInvariantBreach,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::InternalInvariantBreach => "internal_invariant_breach",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TellError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("cancelled")]
    Cancellation,

    #[error("internal invariant breach: {0}")]
    InternalInvariantBreach(String),
}

impl TellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TellError::Validation(_) => ErrorKind::Validation,
            TellError::NotFound(_) => ErrorKind::NotFound,
            TellError::Conflict(_) => ErrorKind::Conflict,
            TellError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            TellError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            TellError::Cancellation => ErrorKind::Cancellation,
            TellError::InternalInvariantBreach(_) => ErrorKind::InternalInvariantBreach,
        }
    }
}

impl From<tell_tools::RegistryError> for TellError {
    fn from(e: tell_tools::RegistryError) -> Self {
        match e.kind() {
            "validation" => TellError::Validation(e.to_string()),
            "conflict" => TellError::Conflict(e.to_string()),
            "not_found" => TellError::NotFound(e.to_string()),
            _ => TellError::InternalInvariantBreach(e.to_string()),
        }
    }
}

impl From<tell_tools::ExecError> for TellError {
    fn from(e: tell_tools::ExecError) -> Self {
        TellError::UpstreamFailure(e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
