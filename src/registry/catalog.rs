//! Immutable error catalog: code → title, description, severity, remediation.
//!
//! Built once with [`ErrorRegistry::builtin`] and shared behind an `Arc`.
//! Lookups are pure functions of the map and the code.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DcvError, Result};
use crate::registry::codes::{ErrorCategory, ErrorCode};

/// How bad a failure with this code is for the compiler under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Info,
    Minor,
    Major,
    Critical,
}

impl ErrorSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub title: &'static str,
    pub description: &'static str,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub remediation: Vec<&'static str>,
    pub documentation: Option<&'static str>,
}

/// Read-only map from code to entry.
#[derive(Debug, Clone)]
pub struct ErrorRegistry {
    entries: BTreeMap<ErrorCode, ErrorInfo>,
}

impl ErrorRegistry {
    /// The full catalog: every assigned code has an entry.
    #[must_use]
    pub fn builtin() -> Self {
        let entries = ErrorCode::ALL
            .iter()
            .map(|&code| (code, builtin_entry(code)))
            .collect();
        Self { entries }
    }

    /// Registry containing only the given codes.
    #[must_use]
    pub fn with_codes(codes: &[ErrorCode]) -> Self {
        let entries = codes
            .iter()
            .map(|&code| (code, builtin_entry(code)))
            .collect();
        Self { entries }
    }

    /// Builtin catalog minus one code; used to exercise lookup failures.
    #[must_use]
    pub fn without(code: ErrorCode) -> Self {
        let mut registry = Self::builtin();
        registry.entries.remove(&code);
        registry
    }

    /// Catalog lookup. A code without an entry is a harness defect.
    pub fn get_error_info(&self, code: ErrorCode) -> Result<&ErrorInfo> {
        self.entries
            .get(&code)
            .ok_or(DcvError::UnregisteredErrorCode { code })
    }

    #[must_use]
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorInfo> {
        self.entries.values()
    }

    #[must_use]
    pub fn by_category(&self, category: ErrorCategory) -> Vec<&ErrorInfo> {
        self.entries
            .values()
            .filter(|info| info.category == category)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn builtin_entry(code: ErrorCode) -> ErrorInfo {
    use ErrorCode as C;
    use ErrorSeverity as S;

    let (title, description, severity, remediation): (_, _, _, &[&'static str]) = match code {
        C::CompilerInvocationFailed => (
            "Compiler invocation failed",
            "The IR generator exited unsuccessfully while compiling the test source.",
            S::Critical,
            &[
                "Re-run the compiler command by hand on the test source and read its stderr",
                "Check that the [compiler] command template matches the installed toolchain",
                "If the failure is new, bisect recent codegen changes",
            ],
        ),
        C::EmptyIrOutput => (
            "Compiler produced no IR",
            "The IR generator succeeded but wrote nothing to standard output.",
            S::Major,
            &[
                "Confirm the compiler flag that emits textual IR is present in the command template",
                "Check whether the test source compiles to an empty module",
            ],
        ),
        C::CompilerUnavailable => (
            "Compiler not found",
            "The configured compiler executable could not be started.",
            S::Critical,
            &[
                "Install the compiler or fix the first element of [compiler] command",
                "Set DCV_COMPILER_COMMAND to point at a working binary",
            ],
        ),
        C::GoldenMismatch => (
            "Generated IR differs from golden reference",
            "Semantic comparison found breaking or critical differences against the approved IR.",
            S::Major,
            &[
                "Read the diff report to find the first critical or breaking difference",
                "If the change is intended, re-approve the golden reference with `dcv run --approve` after deleting the old file",
                "Otherwise treat this as a codegen regression and bisect",
            ],
        ),
        C::MissingGoldenReference => (
            "Golden reference missing",
            "No approved IR exists for this test, platform and optimization level.",
            S::Info,
            &[
                "Review the generated IR for correctness",
                "Approve it with `dcv run --approve` to store it as the golden reference",
            ],
        ),
        C::DispatchStrategyMismatch => (
            "Dispatch strategy not selected",
            "The generated IR does not contain the structure of the expected dispatch strategy.",
            S::Major,
            &[
                "Inspect the IR for the dispatch construct the contract expects",
                "Check the heuristics that choose between dispatch strategies",
                "If another strategy is acceptable, declare it with `// @fallback-strategy:`",
            ],
        ),
        C::ValidationRuleFailed => (
            "Validation rule failed",
            "A `// @validate:` rule did not hold for the generated IR.",
            S::Major,
            &[
                "Read the rule and the reported detail in the failure report",
                "Fix the codegen or relax the rule if it no longer reflects intent",
            ],
        ),
        C::QualityGateFailed => (
            "Quality gate failed",
            "An aggregate `// @quality-gate:` condition was not met.",
            S::Major,
            &[
                "Check which gate failed and by how much",
                "Collect more samples or fix the underlying differences before relaxing the gate",
            ],
        ),
        C::UnparseableIr => (
            "IR could not be parsed",
            "One side of the comparison contained fragments the structural parser could not read.",
            S::Critical,
            &[
                "Check that the compiler emitted complete textual IR",
                "Look for truncated output or interleaved diagnostics on stdout",
            ],
        ),
        C::PerformanceRegression => (
            "Performance regression",
            "The measured value is significantly worse than the current baseline and outside its confidence interval.",
            S::Major,
            &[
                "Re-run on a quiet machine to rule out noise",
                "Compare the dispatch IR against the previous compiler version",
                "Profile the dispatch path to locate the added cost",
            ],
        ),
        C::ThresholdViolation => (
            "Performance threshold violated",
            "A declared `// @performance:` bound was not satisfied at the required confidence.",
            S::Major,
            &[
                "Check the expected strategy was selected, since the bound assumes it",
                "Re-measure with a thorough performance profile",
            ],
        ),
        C::HighVolatility => (
            "Measurements highly volatile",
            "The coefficient of variation of recent baseline values exceeds the volatility threshold.",
            S::Minor,
            &[
                "Pin the benchmark to an isolated core",
                "Increase warmup and measurement iterations",
            ],
        ),
        C::BaselineRejected => (
            "Baseline promotion rejected",
            "The candidate baseline was a significant regression and was not stored.",
            S::Minor,
            &[
                "Investigate the regression before re-running",
                "The previous baseline remains current",
            ],
        ),
        C::InvalidMetadataFormat => (
            "Malformed annotation",
            "An annotation line starting with `// @` is not of the form `key: value`.",
            S::Major,
            &["Rewrite the line as `// @key: value`"],
        ),
        C::UnknownPerformanceMetric => (
            "Unknown performance metric",
            "A performance annotation names a metric outside the supported set.",
            S::Major,
            &[
                "Use one of: dispatch_overhead_ns, memory_usage_bytes, code_size_bytes, cache_hit_ratio, cache_misses, instruction_count, throughput_ops_per_sec, latency_p50, latency_p95, latency_p99",
            ],
        ),
        C::InvalidThresholdValue => (
            "Invalid threshold value",
            "A performance threshold, tolerance or confidence is not a valid number.",
            S::Major,
            &["Write thresholds as plain numbers, e.g. `dispatch_overhead_ns < 30 ±10% @95%`"],
        ),
        C::InvalidPlatformSpecification => (
            "Invalid platform specification",
            "A platform list names an unknown platform or contradicts the exclude list.",
            S::Major,
            &[
                "Use `all` or a comma list of supported platforms",
                "Remove platforms that appear in both `platforms:` and `exclude-platforms:`",
            ],
        ),
        C::UnknownDispatchStrategy => (
            "Unknown dispatch strategy",
            "A strategy annotation names a strategy outside the supported set.",
            S::Major,
            &[
                "Use one of: static_dispatch, perfect_hash, switch_table, binary_search, linear_search, inline_cache, polymorphic_inline_cache, megamorphic_dispatch, hybrid_dispatch",
            ],
        ),
        C::InvalidDirectiveValue => (
            "Invalid directive value",
            "A recognized annotation key carries a value of the wrong shape.",
            S::Major,
            &["Check the expected value format for the directive in the failure message"],
        ),
        C::DependencyUnsatisfied => (
            "Dependency unsatisfied",
            "A required `depends-on` test does not exist or the dependency graph has a cycle.",
            S::Major,
            &[
                "Check the dependency names match test file stems",
                "Break dependency cycles or mark a dependency optional with a trailing `?`",
            ],
        ),
        C::InternalError => (
            "Internal harness error",
            "The validation engine hit an unexpected condition. This is a harness defect, not a compiler failure.",
            S::Critical,
            &[
                "Re-run with the JSONL event log enabled and attach it to a bug report",
            ],
        ),
        C::UnregisteredErrorCode => (
            "Unregistered error code",
            "A failure referenced an error code with no catalog entry.",
            S::Critical,
            &["Add the missing catalog entry; this is a harness defect"],
        ),
        C::ProbeFailure => (
            "Dispatch probe failed",
            "The benchmark probe itself failed, so no measurement exists. This says nothing about contract compliance.",
            S::Major,
            &[
                "Run the probe outside the harness to reproduce",
                "Check the probe registration for this test",
            ],
        ),
        C::TestTimeout => (
            "Test timed out",
            "The case did not finish within its timeout. Partial results were discarded.",
            S::Major,
            &[
                "Raise `// @timeout:` if the case is legitimately slow",
                "Check for a hung compiler or probe",
            ],
        ),
        C::StorageFailure => (
            "Storage failure",
            "Reading or writing golden or baseline storage failed.",
            S::Major,
            &[
                "Check permissions and free space under the configured paths",
                "Retry; storage failures are often transient",
            ],
        ),
        C::WorkerPanicked => (
            "Worker panicked",
            "A worker thread terminated before returning a result.",
            S::Critical,
            &["Re-run the single case sequentially to capture the panic message"],
        ),
        C::LifecycleHookFailed => (
            "Lifecycle hook failed",
            "A `// @setup:` command exited unsuccessfully.",
            S::Major,
            &["Run the setup command by hand from the test directory"],
        ),
        C::InvalidConfiguration => (
            "Invalid configuration",
            "The configuration file or environment overrides are invalid.",
            S::Major,
            &[
                "Check the config file against the documented sections",
                "Unset DCV_* environment variables to isolate the bad value",
            ],
        ),
        C::SerializationFailure => (
            "Serialization failure",
            "Encoding or decoding persisted JSON failed.",
            S::Major,
            &["Inspect the named file for corruption and restore it from version control"],
        ),
        C::IoFailure => (
            "IO failure",
            "A filesystem operation failed.",
            S::Major,
            &["Check the path in the message exists and is accessible"],
        ),
    };

    ErrorInfo {
        code,
        title,
        description,
        category: code.category(),
        severity,
        remediation: remediation.to_vec(),
        documentation: None,
    }
}
