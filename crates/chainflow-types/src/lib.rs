//! Shared types and errors for the chainflow pipeline runner.
//!
//! This crate provides the foundational types used across all other chainflow crates:
//! - `ChainflowError`: unified error taxonomy
//! - `Variables`: the name → text mapping threaded through a run
//! - `StepUsage` / `UsageStats`: per-call and per-run token and cost accounting

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified error type for all chainflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ChainflowError {
    // === Chain Errors ===
    #[error("Invalid chain definition:\n{}", .0.join("\n"))]
    InvalidChain(Vec<String>),

    #[error("Step '{step}' references missing variable '{variable}'")]
    MissingVariable { step: String, variable: String },

    #[error("Step '{step}' has a malformed placeholder '{{{token}}}'")]
    TemplateSyntax { step: String, token: String },

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    // === Backend Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    // === Configuration ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ChainflowError {
    /// Returns `true` if the error came from the generation backend.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            ChainflowError::ProviderError { .. }
                | ChainflowError::RateLimited { .. }
                | ChainflowError::AuthError { .. }
                | ChainflowError::RequestTimeout { .. }
        )
    }

    /// Returns `true` if re-running the chain later may succeed.
    ///
    /// The engine never retries on its own; callers use this to word their
    /// failure message.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainflowError::RateLimited { .. }
            | ChainflowError::RequestTimeout { .. }
            | ChainflowError::StepTimeout { .. } => true,
            ChainflowError::ProviderError { status, .. } => *status == 0 || *status >= 500,
            _ => false,
        }
    }
}

/// A convenience alias for `Result<T, ChainflowError>`.
pub type Result<T> = std::result::Result<T, ChainflowError>;

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// Name of the variable holding the user-supplied seed text.
pub const SEED_VARIABLE: &str = "seed";

/// Named text values available for substitution into templates.
pub type Variables = BTreeMap<String, String>;

/// Create the mapping a run starts from: `{"seed": seed}`.
pub fn seed_variables(seed: impl Into<String>) -> Variables {
    let mut vars = Variables::new();
    vars.insert(SEED_VARIABLE.to_string(), seed.into());
    vars
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Tokens and cost attributed to a single generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl StepUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Aggregate token and cost accounting across every step of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub requests: u32,
}

impl UsageStats {
    /// Fold one call's usage into the running totals.
    pub fn record(&mut self, usage: &StepUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens();
        self.total_cost_usd += usage.cost_usd;
        self.requests += 1;
    }
}
