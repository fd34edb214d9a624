//! Test contracts and the annotation parser that produces them.

pub mod model;
pub mod parser;

pub use model::{
    ComparisonOperator, DispatchStrategy, ExecutionPolicy, MeasurementConfig, MetricDirection,
    OptimizationLevel, PerformanceExpectation, PerformanceMetric, Platform, PlatformFilter,
    QualityGate, TestContract, TestDependency, ValidationRule,
};
pub use parser::{MetadataParseError, parse_contract};
