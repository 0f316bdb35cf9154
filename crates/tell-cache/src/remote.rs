// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Interface-level extension point for an optional remote (L2) cache layer.
//! Only the in-memory L1 is mandatory; L2 is consulted when configured and
//! is otherwise a silent no-op, never an error source.

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait RemoteCacheLayer: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
    async fn delete(&self, key: &str);
}
