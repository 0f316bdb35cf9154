// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Retry/fallback bookkeeping for a single Tell (§4.8 "Retries and fallback").
//! Each failed model call increments `num_error_retry`; a per-role fallback
//! matrix may additionally substitute the model config, which increments
//! `num_fallback_retry`. Either counter exceeding its configured limit is
//! terminal.

use tell_config::{ErrorKind, ModelConfig, RoleModelConfig, TellSettings};

use crate::errors::TellError;

#[derive(Debug, Default, Clone, Copy)]
pub struct RetryState {
    pub num_error_retry: u32,
    pub num_fallback_retry: u32,
}

#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// Retry the call with the same model config.
    RetrySame,
    /// Retry the call with a substituted model config.
    RetryWith(ModelConfig),
    /// A limit was exceeded; the Tell must terminate.
    Terminal(TellError),
}

impl RetryState {
    /// Record a failed call and decide the next action.
    pub fn on_failure(&mut self, role_cfg: &RoleModelConfig, tell: &TellSettings, error_kind: ErrorKind) -> RetryOutcome {
        self.num_error_retry += 1;
        if self.num_error_retry > tell.num_error_retry_limit {
            return RetryOutcome::Terminal(TellError::ResourceExhausted(format!(
                "error retry limit ({}) exceeded",
                tell.num_error_retry_limit
            )));
        }

        match role_cfg.fallback_for(self.num_error_retry, error_kind) {
            Some(replacement) => {
                self.num_fallback_retry += 1;
                if self.num_fallback_retry > tell.num_fallback_retry_limit {
                    return RetryOutcome::Terminal(TellError::ResourceExhausted(format!(
                        "fallback retry limit ({}) exceeded",
                        tell.num_fallback_retry_limit
                    )));
                }
                RetryOutcome::RetryWith(replacement.clone())
            }
            None => RetryOutcome::RetrySame,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
