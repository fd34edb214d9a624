//! Per-case state, diagnostics, results and the run summary.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::contract::model::{OptimizationLevel, Platform};
use crate::ir::diff::ComparisonResult;
use crate::logger::events::CaseRef;
use crate::logger::jsonl::StatusCounts;
use crate::perf::baseline::{BaselineUpdateResult, TrendAnalysis};
use crate::perf::stats::MetricSnapshot;
use crate::perf::validator::{ExpectationCheck, ValidationResult};
use crate::registry::codes::ErrorCode;
use crate::registry::report::FailureReport;

/// Progress marker for one case; the sequence visited is kept in `state_trail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Discovered,
    Loaded,
    Skipped,
    IrGenerated,
    CompilationFailed,
    Compared,
    PerformanceValidated,
    Aggregated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    ApprovalRequired,
    Skipped,
    FrameworkError,
    Timeout,
}

impl TestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::ApprovalRequired => "approval_required",
            Self::Skipped => "skipped",
            Self::FrameworkError => "framework_error",
            Self::Timeout => "timeout",
        }
    }

    /// Statuses that keep the CI exit code at zero.
    #[must_use]
    pub const fn is_clean(self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Loading,
    IrGeneration,
    GoldenComparison,
    PerformanceValidation,
    ResultAggregation,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Loading => "loading",
            Self::IrGeneration => "ir_generation",
            Self::GoldenComparison => "golden_comparison",
            Self::PerformanceValidation => "performance_validation",
            Self::ResultAggregation => "result_aggregation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl DiagnosticLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub phase: Phase,
    pub level: DiagnosticLevel,
    pub code: Option<ErrorCode>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Metadata,
    Dependency,
    Compilation,
    IrStructure,
    Golden,
    Rule,
    Performance,
    QualityGate,
}

/// One violated contract clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub kind: FailureKind,
    pub code: ErrorCode,
    pub message: String,
}

/// Everything the performance phase produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceOutcome {
    pub sample_count: usize,
    pub snapshot: Option<MetricSnapshot>,
    pub expectations: Vec<ExpectationCheck>,
    pub validation: Option<ValidationResult>,
    pub trend: Option<TrendAnalysis>,
    pub baseline_update: Option<BaselineUpdateResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test: String,
    /// `None` when the case never got as far as a target (metadata errors).
    pub platform: Option<Platform>,
    pub optimization: Option<OptimizationLevel>,
    pub status: TestStatus,
    pub state_trail: Vec<CaseState>,
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<ValidationFailure>,
    /// Harness defect that ended the case, if any.
    pub framework_error: Option<(ErrorCode, String)>,
    pub missing_golden: bool,
    pub comparison: Option<ComparisonResult>,
    pub diff_report: Option<String>,
    pub performance: Option<PerformanceOutcome>,
    pub failure_report: Option<FailureReport>,
    pub rendered_report: Option<String>,
    pub duration: Duration,
}

impl TestResult {
    #[must_use]
    pub fn new(
        test: impl Into<String>,
        platform: Option<Platform>,
        optimization: Option<OptimizationLevel>,
    ) -> Self {
        Self {
            test: test.into(),
            platform,
            optimization,
            status: TestStatus::Passed,
            state_trail: vec![CaseState::Discovered],
            diagnostics: Vec::new(),
            failures: Vec::new(),
            framework_error: None,
            missing_golden: false,
            comparison: None,
            diff_report: None,
            performance: None,
            failure_report: None,
            rendered_report: None,
            duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn state(&self) -> CaseState {
        self.state_trail
            .last()
            .copied()
            .unwrap_or(CaseState::Discovered)
    }

    pub fn enter(&mut self, state: CaseState) {
        self.state_trail.push(state);
    }

    pub fn diagnose(
        &mut self,
        phase: Phase,
        level: DiagnosticLevel,
        code: Option<ErrorCode>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            phase,
            level,
            code,
            message: message.into(),
        });
    }

    /// Record a contract violation and its error diagnostic.
    pub fn fail(&mut self, phase: Phase, kind: FailureKind, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        self.diagnose(phase, DiagnosticLevel::Error, Some(code), message.clone());
        self.failures.push(ValidationFailure { kind, code, message });
    }

    /// Record a harness defect. The first one wins.
    pub fn framework(&mut self, phase: Phase, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        self.diagnose(phase, DiagnosticLevel::Critical, Some(code), message.clone());
        if self.framework_error.is_none() {
            self.framework_error = Some((code, message));
        }
    }

    /// Status implied by what has been recorded so far.
    #[must_use]
    pub fn derive_status(&self) -> TestStatus {
        if self.framework_error.is_some() {
            TestStatus::FrameworkError
        } else if !self.failures.is_empty() {
            TestStatus::Failed
        } else if self.missing_golden {
            TestStatus::ApprovalRequired
        } else {
            TestStatus::Passed
        }
    }

    /// Code that heads the failure report.
    #[must_use]
    pub fn primary_code(&self) -> Option<ErrorCode> {
        match self.status {
            TestStatus::Passed | TestStatus::Skipped => None,
            TestStatus::Timeout => Some(ErrorCode::TestTimeout),
            TestStatus::FrameworkError => Some(
                self.framework_error
                    .as_ref()
                    .map_or(ErrorCode::InternalError, |(code, _)| *code),
            ),
            TestStatus::Failed => Some(
                self.failures
                    .first()
                    .map_or(ErrorCode::InternalError, |f| f.code),
            ),
            TestStatus::ApprovalRequired => Some(ErrorCode::MissingGoldenReference),
        }
    }

    #[must_use]
    pub fn case_ref(&self) -> CaseRef {
        CaseRef {
            test: self.test.clone(),
            platform: self.platform.map(|p| p.as_str().to_string()),
            optimization: self.optimization.map(|o| o.as_str().to_string()),
        }
    }

    /// `name [platform/opt]`, or just the name when untargeted.
    #[must_use]
    pub fn label(&self) -> String {
        match (self.platform, self.optimization) {
            (Some(p), Some(o)) => format!("{} [{p}/{o}]", self.test),
            _ => self.test.clone(),
        }
    }

    /// Ordering key for the final result list.
    #[must_use]
    pub fn sort_key(&self) -> (String, Option<Platform>, Option<OptimizationLevel>) {
        (self.test.clone(), self.platform, self.optimization)
    }
}

/// Per-status totals and the CI exit code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub approval_required: usize,
    pub skipped: usize,
    pub framework_error: usize,
    pub timeout: usize,
}

impl RunSummary {
    #[must_use]
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::ApprovalRequired => summary.approval_required += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::FrameworkError => summary.framework_error += 1,
                TestStatus::Timeout => summary.timeout += 1,
            }
        }
        summary
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.passed + self.skipped == self.total
    }

    /// 0 iff every result is Passed or Skipped.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_clean() { 0 } else { 1 }
    }

    #[must_use]
    pub const fn counts(&self) -> StatusCounts {
        StatusCounts {
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            approval_required: self.approval_required,
            skipped: self.skipped,
            framework_error: self.framework_error,
            timeout: self.timeout,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} results: {} passed, {} failed, {} approval required, {} skipped, {} framework errors, {} timeouts",
            self.total,
            self.passed,
            self.failed,
            self.approval_required,
            self.skipped,
            self.framework_error,
            self.timeout
        )
    }
}
