//! Error codes, the remediation catalog, and failure reports.

pub mod catalog;
pub mod codes;
pub mod report;

pub use catalog::{ErrorInfo, ErrorRegistry, ErrorSeverity};
pub use codes::{ErrorCategory, ErrorCode};
pub use report::{
    FailureArtifacts, FailureContext, FailureReport, create_failure_report,
    format_failure_report,
};
