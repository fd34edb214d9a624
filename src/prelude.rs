//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dispatch_contracts::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DcvError, Result};

// Contracts
pub use crate::contract::model::{
    DispatchStrategy, OptimizationLevel, PerformanceExpectation, PerformanceMetric, Platform,
    TestContract,
};
pub use crate::contract::parser::parse_contract;

// IR
pub use crate::ir::diff::{ComparisonResult, Severity, compare, generate_diff_report};
pub use crate::ir::dispatch::DispatchFeatures;
pub use crate::ir::module::IrModule;

// Performance
pub use crate::perf::baseline::{BaselineKey, BaselineManager, BaselinePolicy};
pub use crate::perf::probe::{DispatchProbe, FnProbe};
pub use crate::perf::stats::{PerformanceMeasurement, StatisticalSummary};
pub use crate::perf::store::{BaselineStore, JsonBaselineStore, MemoryBaselineStore};

// Registry
pub use crate::registry::catalog::ErrorRegistry;
pub use crate::registry::codes::ErrorCode;

// Orchestration
pub use crate::orchestrator::{
    Collaborators, DiscoveredCase, Orchestrator, RunOptions, RunReport, RunSummary, TestResult,
    TestStatus,
};
