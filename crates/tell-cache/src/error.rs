// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissCause {
    NotFound,
    Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{operation}: key {key:?} miss ({cause:?})")]
    Miss { operation: &'static str, key: String, cause: MissCause },
    #[error("invalid delete_pattern regex: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl CacheError {
    pub fn miss(operation: &'static str, key: impl Into<String>, cause: MissCause) -> Self {
        Self::Miss { operation, key: key.into(), cause }
    }
}
