//! Measurement, statistics, baseline comparison, and baseline history.

pub mod baseline;
pub mod probe;
pub mod stats;
pub mod store;
pub mod validator;

pub use baseline::{
    BaselineHistory, BaselineKey, BaselineManager, BaselinePolicy, BaselineUpdateResult,
    RegressionAnalysis, TrendAnalysis, TrendDirection, analyze_trend, validate_thresholds,
};
pub use probe::{DispatchProbe, FnProbe, collect_samples, execute_benchmark};
pub use stats::{MetricSnapshot, PerformanceMeasurement, StatisticalSummary, calculate_statistics};
pub use store::{BaselineStore, JsonBaselineStore, MemoryBaselineStore};
pub use validator::{ValidationConfig, ValidationResult, check_expectation, compare_with_baseline};
