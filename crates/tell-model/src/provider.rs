// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Input modalities a model can accept. Kept deliberately small: this core
/// has no concrete provider SDKs, only a generic streaming interface, so the
/// set of recognized modalities is just enough to drive sanitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModality {
    Text,
    Image,
}

/// A generic streaming-completion interface. Concrete provider wiring
/// (HTTP clients, vendor wire formats, auth) lives outside this core; callers
/// supply an implementation, and tests use [`crate::mock`].
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to callers.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Input modalities supported by this provider/model combination.
    /// Defaults to `[Text]` to be conservative (never send images to an
    /// unknown model).
    fn input_modalities(&self) -> Vec<InputModality> {
        vec![InputModality::Text]
    }

    /// Returns `true` if this model supports image input.
    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }

    /// Returns `true` if this model honors a provider-side prompt-cache
    /// marker on content parts. Defaults to `false`.
    fn supports_cache_control(&self) -> bool {
        false
    }

    /// Query the live endpoint for the actual context window in use, if the
    /// provider exposes such a probe. Default: no probe available.
    async fn probe_context_window(&self) -> Option<u32> {
        None
    }
}
