//! Closed error-code enumeration partitioned into five numeric ranges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which part of the pipeline an error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    IrGeneration,
    SemanticComparison,
    PerformanceContract,
    MetadataContract,
    FrameworkInternal,
}

impl ErrorCategory {
    /// Inclusive numeric range owned by this category.
    #[must_use]
    pub const fn range(self) -> (u16, u16) {
        match self {
            Self::IrGeneration => (1000, 1999),
            Self::SemanticComparison => (2000, 2999),
            Self::PerformanceContract => (3000, 3999),
            Self::MetadataContract => (4000, 4999),
            Self::FrameworkInternal => (5000, 5999),
        }
    }

    #[must_use]
    pub const fn includes(self, numeric: u16) -> bool {
        let (start, end) = self.range();
        numeric >= start && numeric <= end
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IrGeneration => "ir_generation",
            Self::SemanticComparison => "semantic_comparison",
            Self::PerformanceContract => "performance_contract",
            Self::MetadataContract => "metadata_contract",
            Self::FrameworkInternal => "framework_internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable error codes. Assigned numbers are permanent and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ErrorCode {
    // ir_generation
    CompilerInvocationFailed = 1001,
    EmptyIrOutput = 1002,
    CompilerUnavailable = 1003,

    // semantic_comparison
    GoldenMismatch = 2001,
    MissingGoldenReference = 2002,
    DispatchStrategyMismatch = 2003,
    ValidationRuleFailed = 2004,
    QualityGateFailed = 2005,
    UnparseableIr = 2006,

    // performance_contract
    PerformanceRegression = 3001,
    ThresholdViolation = 3002,
    HighVolatility = 3003,
    BaselineRejected = 3004,

    // metadata_contract
    InvalidMetadataFormat = 4001,
    UnknownPerformanceMetric = 4002,
    InvalidThresholdValue = 4003,
    InvalidPlatformSpecification = 4004,
    UnknownDispatchStrategy = 4005,
    InvalidDirectiveValue = 4006,
    DependencyUnsatisfied = 4007,

    // framework_internal
    InternalError = 5001,
    UnregisteredErrorCode = 5002,
    ProbeFailure = 5003,
    TestTimeout = 5004,
    StorageFailure = 5005,
    WorkerPanicked = 5006,
    LifecycleHookFailed = 5007,
    InvalidConfiguration = 5008,
    SerializationFailure = 5009,
    IoFailure = 5010,
}

impl ErrorCode {
    /// Every assigned code, in numeric order.
    pub const ALL: [Self; 30] = [
        Self::CompilerInvocationFailed,
        Self::EmptyIrOutput,
        Self::CompilerUnavailable,
        Self::GoldenMismatch,
        Self::MissingGoldenReference,
        Self::DispatchStrategyMismatch,
        Self::ValidationRuleFailed,
        Self::QualityGateFailed,
        Self::UnparseableIr,
        Self::PerformanceRegression,
        Self::ThresholdViolation,
        Self::HighVolatility,
        Self::BaselineRejected,
        Self::InvalidMetadataFormat,
        Self::UnknownPerformanceMetric,
        Self::InvalidThresholdValue,
        Self::InvalidPlatformSpecification,
        Self::UnknownDispatchStrategy,
        Self::InvalidDirectiveValue,
        Self::DependencyUnsatisfied,
        Self::InternalError,
        Self::UnregisteredErrorCode,
        Self::ProbeFailure,
        Self::TestTimeout,
        Self::StorageFailure,
        Self::WorkerPanicked,
        Self::LifecycleHookFailed,
        Self::InvalidConfiguration,
        Self::SerializationFailure,
        Self::IoFailure,
    ];

    #[must_use]
    pub const fn numeric(self) -> u16 {
        self as u16
    }

    /// Category derived from the numeric range, never stored separately.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self.numeric() {
            1000..=1999 => ErrorCategory::IrGeneration,
            2000..=2999 => ErrorCategory::SemanticComparison,
            3000..=3999 => ErrorCategory::PerformanceContract,
            4000..=4999 => ErrorCategory::MetadataContract,
            _ => ErrorCategory::FrameworkInternal,
        }
    }

    /// Look a code up by its number.
    #[must_use]
    pub fn from_numeric(numeric: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.numeric() == numeric)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DCV-{:04}", self.numeric())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    /// Accepts `DCV-2001`, `dcv-2001` or a bare `2001`.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let digits = trimmed
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("dcv-"))
            .map_or(trimmed, |_| &trimmed[4..]);
        let numeric: u16 = digits
            .parse()
            .map_err(|_| format!("not an error code: {raw:?}"))?;
        Self::from_numeric(numeric).ok_or_else(|| format!("unassigned error code: {raw:?}"))
    }
}
