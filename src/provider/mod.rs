//! Text/embedding provider interface.
//!
//! The provider is an external collaborator reached only through
//! [`Provider::embed`] and [`Provider::generate`]. Scenarios never hold a
//! raw provider; they go through a [`RetryingProvider`], which owns the
//! backoff policy and converts failures into harness errors.

pub mod deterministic;
pub mod retry;

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use deterministic::DeterministicProvider;
pub use retry::{RetryPolicy, RetryingProvider};

/// Raw provider failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {details}")]
    RateLimited { details: String },
    #[error("network failure: {details}")]
    Network { details: String },
    /// Permanent refusal (bad request, content policy); never retried.
    #[error("rejected: {details}")]
    Rejected { details: String },
}

impl ProviderError {
    /// Rate limits and network errors are transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }
}

/// Token accounting returned with every provider response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ProviderUsage {
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for ProviderUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.calls += rhs.calls;
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: ProviderUsage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: ProviderUsage,
}

/// Generation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.0,
        }
    }
}

/// Text/embedding provider.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;
    fn generate(&self, prompt: &str, options: &GenerateOptions)
    -> Result<Generation, ProviderError>;
}

/// Whitespace token count used for usage accounting and context budgets.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
