//! IR parsing, dispatch-structure detection and semantic comparison.

pub mod diff;
pub mod dispatch;
pub mod module;

pub use diff::{
    ComparisonResult, ComparisonSummary, DifferenceType, IRDifference, Severity, SourceLocation,
    compare, generate_diff_report,
};
pub use dispatch::DispatchFeatures;
pub use module::IrModule;
