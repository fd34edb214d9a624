//! DCV-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::registry::codes::ErrorCode;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DcvError>;

/// Top-level error type for the contract-validation engine.
///
/// These are harness-side failures. Contract violations found in the compiler
/// under test are never represented here; they travel as validation failures
/// inside a `TestResult`.
#[derive(Debug, Error)]
pub enum DcvError {
    #[error("[DCV-5008] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DCV-5008] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DCV-5008] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DCV-5009] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DCV-5005] storage failure in {context}: {details}")]
    Storage {
        context: &'static str,
        details: String,
    },

    #[error("[DCV-5010] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DCV-5002] error code {code} is not registered in the catalog")]
    UnregisteredErrorCode { code: ErrorCode },

    #[error("[DCV-5003] dispatch probe {benchmark} failed: {details}")]
    ProbeFailed { benchmark: String, details: String },

    #[error("[DCV-5003] no samples to summarize for {context}")]
    NoSamples { context: &'static str },

    #[error("[DCV-5006] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DCV-5001] runtime failure: {details}")]
    Runtime { details: String },
}

impl DcvError {
    /// Stable registry code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. } => {
                ErrorCode::InvalidConfiguration
            }
            Self::Serialization { .. } => ErrorCode::SerializationFailure,
            Self::Storage { .. } => ErrorCode::StorageFailure,
            Self::Io { .. } => ErrorCode::IoFailure,
            Self::UnregisteredErrorCode { .. } => ErrorCode::UnregisteredErrorCode,
            Self::ProbeFailed { .. } | Self::NoSamples { .. } => ErrorCode::ProbeFailure,
            Self::ChannelClosed { .. } => ErrorCode::WorkerPanicked,
            Self::Runtime { .. } => ErrorCode::InternalError,
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Storage { .. } | Self::ChannelClosed { .. }
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
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DcvError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DcvError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DcvError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
