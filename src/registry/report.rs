//! Forensic failure reports built from catalog entries.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contract::model::{OptimizationLevel, Platform};
use crate::core::errors::Result;
use crate::registry::catalog::{ErrorRegistry, ErrorSeverity};
use crate::registry::codes::{ErrorCategory, ErrorCode};

/// Optional evidence attached to a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureArtifacts {
    pub diff_summary: Option<String>,
    pub performance_metrics: BTreeMap<String, f64>,
    pub contract_violations: Vec<String>,
    pub stack_trace: Option<String>,
    pub debug_artifacts: Vec<String>,
}

impl FailureArtifacts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diff_summary.is_none()
            && self.performance_metrics.is_empty()
            && self.contract_violations.is_empty()
            && self.stack_trace.is_none()
            && self.debug_artifacts.is_empty()
    }
}

/// Where the failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureContext {
    pub test_name: String,
    pub platform: Option<Platform>,
    pub optimization: Option<OptimizationLevel>,
    pub phase: Option<String>,
}

impl FailureContext {
    #[must_use]
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            platform: None,
            optimization: None,
            phase: None,
        }
    }

    #[must_use]
    pub fn target(mut self, platform: Platform, optimization: OptimizationLevel) -> Self {
        self.platform = Some(platform);
        self.optimization = Some(optimization);
        self
    }

    #[must_use]
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

/// Owned report for one failed test and phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub code: ErrorCode,
    pub title: String,
    pub description: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub context: FailureContext,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub artifacts: FailureArtifacts,
    pub remediation: Vec<String>,
    pub documentation: Option<String>,
}

/// Build a report from the catalog entry for `code`.
pub fn create_failure_report(
    registry: &ErrorRegistry,
    code: ErrorCode,
    context: FailureContext,
    message: impl Into<String>,
    artifacts: FailureArtifacts,
) -> Result<FailureReport> {
    let info = registry.get_error_info(code)?;
    Ok(FailureReport {
        code,
        title: info.title.to_string(),
        description: info.description.to_string(),
        category: info.category,
        severity: info.severity,
        context,
        timestamp: Utc::now(),
        message: message.into(),
        artifacts,
        remediation: info.remediation.iter().map(ToString::to_string).collect(),
        documentation: info.documentation.map(str::to_string),
    })
}

/// Render a report as plain text.
///
/// The timestamp is left out so identical failures render identically.
#[must_use]
pub fn format_failure_report(report: &FailureReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{}] {}", report.code, report.title);
    let _ = writeln!(out, "  category: {}", report.category);
    let _ = writeln!(out, "  severity: {}", report.severity);
    let _ = writeln!(out, "  {}", report.description);
    let _ = writeln!(out, "context:");
    let _ = writeln!(out, "  test: {}", report.context.test_name);
    let _ = writeln!(
        out,
        "  platform: {}",
        report
            .context
            .platform
            .map_or("-", Platform::as_str)
    );
    let _ = writeln!(
        out,
        "  optimization: {}",
        report
            .context
            .optimization
            .map_or("-", OptimizationLevel::as_str)
    );
    if let Some(phase) = &report.context.phase {
        let _ = writeln!(out, "  phase: {phase}");
    }
    let _ = writeln!(out, "message:");
    for line in report.message.lines() {
        let _ = writeln!(out, "  {line}");
    }

    let artifacts = &report.artifacts;
    if !artifacts.is_empty() {
        let _ = writeln!(out, "artifacts:");
        if let Some(diff) = &artifacts.diff_summary {
            let _ = writeln!(out, "  diff:");
            for line in diff.lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        if !artifacts.performance_metrics.is_empty() {
            let _ = writeln!(out, "  metrics:");
            for (name, value) in &artifacts.performance_metrics {
                let _ = writeln!(out, "    {name}: {value:.3}");
            }
        }
        if !artifacts.contract_violations.is_empty() {
            let _ = writeln!(out, "  violations:");
            for violation in &artifacts.contract_violations {
                let _ = writeln!(out, "    - {violation}");
            }
        }
        if let Some(trace) = &artifacts.stack_trace {
            let _ = writeln!(out, "  trace:");
            for line in trace.lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        for artifact in &artifacts.debug_artifacts {
            let _ = writeln!(out, "  artifact: {artifact}");
        }
    }

    let _ = writeln!(out, "remediation:");
    for (idx, step) in report.remediation.iter().enumerate() {
        let _ = writeln!(out, "  {}. {step}", idx + 1);
    }
    if let Some(doc) = &report.documentation {
        let _ = writeln!(out, "see: {doc}");
    }
    out
}
