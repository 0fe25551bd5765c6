//! ECH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::engine::EngineError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for the certification harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("[ECH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ECH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ECH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ECH-1004] unknown scenario: {name}")]
    UnknownScenario { name: String },

    #[error("[ECH-2001] provider transient failure during {operation}: {details}")]
    ProviderTransient {
        operation: &'static str,
        details: String,
    },

    #[error("[ECH-2002] provider retries exhausted for {operation} after {attempts} attempts: {details}")]
    ProviderExhausted {
        operation: &'static str,
        attempts: u32,
        details: String,
    },

    #[error("[ECH-2003] provider rejected {operation}: {details}")]
    ProviderRejected {
        operation: &'static str,
        details: String,
    },

    #[error("[ECH-3001] target engine failure during {operation}: {source}")]
    TargetEngine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("[ECH-3002] invariant violation on {gate}: {details}")]
    InvariantViolation { gate: String, details: String },

    #[error("[ECH-3003] scenario {scenario} exceeded its {budget_ms}ms budget")]
    ScenarioTimeout { scenario: String, budget_ms: u64 },

    #[error("[ECH-4001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ECH-4002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ECH-4900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HarnessError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ECH-1001",
            Self::MissingConfig { .. } => "ECH-1002",
            Self::ConfigParse { .. } => "ECH-1003",
            Self::UnknownScenario { .. } => "ECH-1004",
            Self::ProviderTransient { .. } => "ECH-2001",
            Self::ProviderExhausted { .. } => "ECH-2002",
            Self::ProviderRejected { .. } => "ECH-2003",
            Self::TargetEngine { .. } => "ECH-3001",
            Self::InvariantViolation { .. } => "ECH-3002",
            Self::ScenarioTimeout { .. } => "ECH-3003",
            Self::Serialization { .. } => "ECH-4001",
            Self::Io { .. } => "ECH-4002",
            Self::Runtime { .. } => "ECH-4900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderTransient { .. } | Self::Io { .. })
    }

    /// Configuration-class errors abort the run before any scenario starts.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::UnknownScenario { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap an engine error with the operation that produced it.
    #[must_use]
    pub fn engine(operation: &'static str, source: EngineError) -> Self {
        Self::TargetEngine { operation, source }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<EngineError> for HarnessError {
    fn from(value: EngineError) -> Self {
        Self::TargetEngine {
            operation: "engine",
            source: value,
        }
    }
}
