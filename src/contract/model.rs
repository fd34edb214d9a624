//! Typed test contracts: dispatch strategies, performance expectations, filters,
//! execution policy, validation rules and quality gates.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ir::diff::Severity;

/// Normalize an identifier for table lookup: trimmed, lowercase, `-` → `_`.
pub(crate) fn normalize_ident(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('-', "_")
}

// ──────────────────── platforms ────────────────────

/// Target platforms a contract can be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    LinuxX86_64,
    LinuxAarch64,
    MacosX86_64,
    MacosAarch64,
    WindowsX86_64,
    Wasm32,
}

impl Platform {
    pub const ALL: [Self; 6] = [
        Self::LinuxX86_64,
        Self::LinuxAarch64,
        Self::MacosX86_64,
        Self::MacosAarch64,
        Self::WindowsX86_64,
        Self::Wasm32,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinuxX86_64 => "linux_x86_64",
            Self::LinuxAarch64 => "linux_aarch64",
            Self::MacosX86_64 => "macos_x86_64",
            Self::MacosAarch64 => "macos_aarch64",
            Self::WindowsX86_64 => "windows_x86_64",
            Self::Wasm32 => "wasm32",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_ident(raw).as_str() {
            "linux_x86_64" => Some(Self::LinuxX86_64),
            "linux_aarch64" => Some(Self::LinuxAarch64),
            "macos_x86_64" => Some(Self::MacosX86_64),
            "macos_aarch64" => Some(Self::MacosAarch64),
            "windows_x86_64" => Some(Self::WindowsX86_64),
            "wasm32" => Some(Self::Wasm32),
            _ => None,
        }
    }

    /// Best guess at the platform this process runs on.
    #[must_use]
    pub fn host() -> Self {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("linux", "aarch64") => Self::LinuxAarch64,
            ("macos", "x86_64") => Self::MacosX86_64,
            ("macos", "aarch64") => Self::MacosAarch64,
            ("windows", _) => Self::WindowsX86_64,
            (_, "wasm32") => Self::Wasm32,
            _ => Self::LinuxX86_64,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimization levels of the compiler under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    Debug,
    ReleaseSafe,
    ReleaseFast,
    ReleaseSmall,
}

impl OptimizationLevel {
    pub const ALL: [Self; 4] = [
        Self::Debug,
        Self::ReleaseSafe,
        Self::ReleaseFast,
        Self::ReleaseSmall,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::ReleaseSafe => "release_safe",
            Self::ReleaseFast => "release_fast",
            Self::ReleaseSmall => "release_small",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_ident(raw).as_str() {
            "debug" | "o0" => Some(Self::Debug),
            "release_safe" => Some(Self::ReleaseSafe),
            "release_fast" | "o3" => Some(Self::ReleaseFast),
            "release_small" | "os" => Some(Self::ReleaseSmall),
            _ => None,
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── dispatch strategies ────────────────────

/// Asymptotic lookup cost of a dispatch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    Constant,
    Logarithmic,
    Linear,
    AmortizedConstant,
}

/// How much memory a strategy spends on dispatch infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOverhead {
    None,
    TablePerDispatchSite,
    EntryPerCase,
    CachePerCallSite,
}

/// Expected data-cache behavior of the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLocality {
    Excellent,
    Good,
    Moderate,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedCharacteristics {
    pub complexity: ComplexityClass,
    pub memory_overhead: MemoryOverhead,
    pub cache_locality: CacheLocality,
}

/// Closed set of dispatch strategies a compiler may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    StaticDispatch,
    PerfectHash,
    SwitchTable,
    BinarySearch,
    LinearSearch,
    InlineCache,
    PolymorphicInlineCache,
    MegamorphicDispatch,
    HybridDispatch,
}

impl DispatchStrategy {
    pub const ALL: [Self; 9] = [
        Self::StaticDispatch,
        Self::PerfectHash,
        Self::SwitchTable,
        Self::BinarySearch,
        Self::LinearSearch,
        Self::InlineCache,
        Self::PolymorphicInlineCache,
        Self::MegamorphicDispatch,
        Self::HybridDispatch,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StaticDispatch => "static_dispatch",
            Self::PerfectHash => "perfect_hash",
            Self::SwitchTable => "switch_table",
            Self::BinarySearch => "binary_search",
            Self::LinearSearch => "linear_search",
            Self::InlineCache => "inline_cache",
            Self::PolymorphicInlineCache => "polymorphic_inline_cache",
            Self::MegamorphicDispatch => "megamorphic_dispatch",
            Self::HybridDispatch => "hybrid_dispatch",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_ident(raw).as_str() {
            "static_dispatch" | "static" => Some(Self::StaticDispatch),
            "perfect_hash" => Some(Self::PerfectHash),
            "switch_table" | "switch" => Some(Self::SwitchTable),
            "binary_search" => Some(Self::BinarySearch),
            "linear_search" => Some(Self::LinearSearch),
            "inline_cache" => Some(Self::InlineCache),
            "polymorphic_inline_cache" | "pic" => Some(Self::PolymorphicInlineCache),
            "megamorphic_dispatch" | "megamorphic" => Some(Self::MegamorphicDispatch),
            "hybrid_dispatch" | "hybrid" => Some(Self::HybridDispatch),
            _ => None,
        }
    }

    #[must_use]
    pub const fn expected_characteristics(self) -> ExpectedCharacteristics {
        let (complexity, memory_overhead, cache_locality) = match self {
            Self::StaticDispatch => (
                ComplexityClass::Constant,
                MemoryOverhead::None,
                CacheLocality::Excellent,
            ),
            Self::PerfectHash => (
                ComplexityClass::Constant,
                MemoryOverhead::TablePerDispatchSite,
                CacheLocality::Good,
            ),
            Self::SwitchTable => (
                ComplexityClass::Constant,
                MemoryOverhead::TablePerDispatchSite,
                CacheLocality::Good,
            ),
            Self::BinarySearch => (
                ComplexityClass::Logarithmic,
                MemoryOverhead::None,
                CacheLocality::Moderate,
            ),
            Self::LinearSearch => (
                ComplexityClass::Linear,
                MemoryOverhead::None,
                CacheLocality::Good,
            ),
            Self::InlineCache => (
                ComplexityClass::AmortizedConstant,
                MemoryOverhead::CachePerCallSite,
                CacheLocality::Excellent,
            ),
            Self::PolymorphicInlineCache => (
                ComplexityClass::AmortizedConstant,
                MemoryOverhead::CachePerCallSite,
                CacheLocality::Good,
            ),
            Self::MegamorphicDispatch => (
                ComplexityClass::Constant,
                MemoryOverhead::EntryPerCase,
                CacheLocality::Poor,
            ),
            Self::HybridDispatch => (
                ComplexityClass::AmortizedConstant,
                MemoryOverhead::TablePerDispatchSite,
                CacheLocality::Moderate,
            ),
        };
        ExpectedCharacteristics {
            complexity,
            memory_overhead,
            cache_locality,
        }
    }
}

impl fmt::Display for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── performance expectations ────────────────────

/// Whether a larger metric value is good or bad news.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    LowerIsBetter,
    HigherIsBetter,
}

/// Closed set of measurable metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    DispatchOverheadNs,
    MemoryUsageBytes,
    CodeSizeBytes,
    CacheHitRatio,
    CacheMisses,
    InstructionCount,
    ThroughputOpsPerSec,
    LatencyP50Ns,
    LatencyP95Ns,
    LatencyP99Ns,
}

impl PerformanceMetric {
    pub const ALL: [Self; 10] = [
        Self::DispatchOverheadNs,
        Self::MemoryUsageBytes,
        Self::CodeSizeBytes,
        Self::CacheHitRatio,
        Self::CacheMisses,
        Self::InstructionCount,
        Self::ThroughputOpsPerSec,
        Self::LatencyP50Ns,
        Self::LatencyP95Ns,
        Self::LatencyP99Ns,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DispatchOverheadNs => "dispatch_overhead_ns",
            Self::MemoryUsageBytes => "memory_usage_bytes",
            Self::CodeSizeBytes => "code_size_bytes",
            Self::CacheHitRatio => "cache_hit_ratio",
            Self::CacheMisses => "cache_misses",
            Self::InstructionCount => "instruction_count",
            Self::ThroughputOpsPerSec => "throughput_ops_per_sec",
            Self::LatencyP50Ns => "latency_p50_ns",
            Self::LatencyP95Ns => "latency_p95_ns",
            Self::LatencyP99Ns => "latency_p99_ns",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_ident(raw).as_str() {
            "dispatch_overhead_ns" => Some(Self::DispatchOverheadNs),
            "memory_usage_bytes" => Some(Self::MemoryUsageBytes),
            "code_size_bytes" => Some(Self::CodeSizeBytes),
            "cache_hit_ratio" => Some(Self::CacheHitRatio),
            "cache_misses" => Some(Self::CacheMisses),
            "instruction_count" => Some(Self::InstructionCount),
            "throughput_ops_per_sec" => Some(Self::ThroughputOpsPerSec),
            "latency_p50" | "latency_p50_ns" => Some(Self::LatencyP50Ns),
            "latency_p95" | "latency_p95_ns" => Some(Self::LatencyP95Ns),
            "latency_p99" | "latency_p99_ns" => Some(Self::LatencyP99Ns),
            _ => None,
        }
    }

    #[must_use]
    pub const fn direction(self) -> MetricDirection {
        match self {
            Self::CacheHitRatio | Self::ThroughputOpsPerSec => MetricDirection::HigherIsBetter,
            _ => MetricDirection::LowerIsBetter,
        }
    }
}

impl fmt::Display for PerformanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    ApproxEqual,
    WithinRange,
}

impl ComparisonOperator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::ApproxEqual => "~=",
            Self::WithinRange => "in",
        }
    }
}

/// Default tolerance for `~=` when none is declared.
pub const DEFAULT_APPROX_TOLERANCE_PCT: f64 = 5.0;

/// Default confidence level for performance expectations.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Benchmark shape for one expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub warmup_iterations: u32,
    pub measurement_iterations: u32,
    pub requires_isolation: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl MeasurementConfig {
    #[must_use]
    pub const fn quick() -> Self {
        Self {
            warmup_iterations: 10,
            measurement_iterations: 100,
            requires_isolation: false,
        }
    }

    #[must_use]
    pub const fn standard() -> Self {
        Self {
            warmup_iterations: 100,
            measurement_iterations: 1_000,
            requires_isolation: false,
        }
    }

    #[must_use]
    pub const fn thorough() -> Self {
        Self {
            warmup_iterations: 1_000,
            measurement_iterations: 10_000,
            requires_isolation: true,
        }
    }
}

/// One declared performance bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceExpectation {
    pub metric: PerformanceMetric,
    pub operator: ComparisonOperator,
    /// Threshold, or the lower bound for `WithinRange`.
    pub threshold: f64,
    /// Upper bound, only for `WithinRange`.
    pub upper_bound: Option<f64>,
    /// Tolerance in percent of the threshold.
    pub tolerance_pct: Option<f64>,
    pub confidence_level: f64,
    pub measurement: MeasurementConfig,
}

impl PerformanceExpectation {
    #[must_use]
    pub fn new(metric: PerformanceMetric, operator: ComparisonOperator, threshold: f64) -> Self {
        Self {
            metric,
            operator,
            threshold,
            upper_bound: None,
            tolerance_pct: None,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            measurement: MeasurementConfig::default(),
        }
    }

    /// Evaluate `actual` against this bound, tolerance included.
    #[must_use]
    pub fn is_satisfied_by(&self, actual: f64) -> bool {
        let slack = self.tolerance_pct.unwrap_or(0.0) / 100.0;
        let t = self.threshold;
        match self.operator {
            ComparisonOperator::LessThan => actual < t + t.abs() * slack,
            ComparisonOperator::LessOrEqual => actual <= t + t.abs() * slack,
            ComparisonOperator::GreaterThan => actual > t - t.abs() * slack,
            ComparisonOperator::GreaterOrEqual => actual >= t - t.abs() * slack,
            ComparisonOperator::ApproxEqual => {
                let tol = self.tolerance_pct.unwrap_or(DEFAULT_APPROX_TOLERANCE_PCT) / 100.0;
                (actual - t).abs() <= t.abs() * tol
            }
            ComparisonOperator::WithinRange => {
                let hi = self.upper_bound.unwrap_or(t);
                let span = (hi - t).abs() * slack;
                actual >= t - span && actual <= hi + span
            }
        }
    }

    /// `metric < 30 ±10% @95%` style rendering.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = match (self.operator, self.upper_bound) {
            (ComparisonOperator::WithinRange, Some(hi)) => {
                format!("{} in {}..{}", self.metric, self.threshold, hi)
            }
            _ => format!("{} {} {}", self.metric, self.operator.symbol(), self.threshold),
        };
        if let Some(tol) = self.tolerance_pct {
            out.push_str(&format!(" ±{tol}%"));
        }
        out.push_str(&format!(" @{}%", self.confidence_level * 100.0));
        out
    }
}

// ──────────────────── filters and policy ────────────────────

/// Include/exclude platform sets. An empty include set means every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFilter {
    pub include: BTreeSet<Platform>,
    pub exclude: BTreeSet<Platform>,
}

impl PlatformFilter {
    #[must_use]
    pub fn matches(&self, platform: Platform) -> bool {
        (self.include.is_empty() || self.include.contains(&platform))
            && !self.exclude.contains(&platform)
    }
}

/// Default per-test timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    /// Explicit `timeout:` directive seen; otherwise the run-level default applies.
    pub timeout_declared: bool,
    pub max_retries: u32,
    pub parallel: bool,
    pub requires_isolation: bool,
    pub setup: Vec<String>,
    pub cleanup: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            timeout_declared: false,
            max_retries: 0,
            parallel: true,
            requires_isolation: false,
            setup: Vec::new(),
            cleanup: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

impl ExecutionPolicy {
    /// Whether this case may share the worker pool with others.
    #[must_use]
    pub fn runs_in_pool(&self) -> bool {
        self.parallel && !self.requires_isolation
    }
}

/// Structural assertion over the generated IR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "arg")]
pub enum ValidationRule {
    Contains(String),
    NotContains(String),
    Matches(String),
    MaxFunctions(usize),
    MaxInstructions(usize),
    NoIndirectCalls,
    RequiresDispatchTable,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains(text) => write!(f, "contains {text:?}"),
            Self::NotContains(text) => write!(f, "not_contains {text:?}"),
            Self::Matches(pattern) => write!(f, "matches /{pattern}/"),
            Self::MaxFunctions(n) => write!(f, "max_functions {n}"),
            Self::MaxInstructions(n) => write!(f, "max_instructions {n}"),
            Self::NoIndirectCalls => f.write_str("no_indirect_calls"),
            Self::RequiresDispatchTable => f.write_str("requires_dispatch_table"),
        }
    }
}

/// Aggregate gate evaluated after comparison and performance validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGate {
    MaxDifferences { severity: Severity, limit: usize },
    MaxRegressionPct(f64),
    RequireBaseline,
    MinSamples(usize),
}

impl fmt::Display for QualityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxDifferences { severity, limit } => {
                write!(f, "max_differences {severity} {limit}")
            }
            Self::MaxRegressionPct(pct) => write!(f, "max_regression_pct {pct}"),
            Self::RequireBaseline => f.write_str("require_baseline"),
            Self::MinSamples(n) => write!(f, "min_samples {n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDependency {
    pub test: String,
    pub required: bool,
}

// ──────────────────── contract ────────────────────

/// Parsed, immutable contract for one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestContract {
    pub name: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub test_group: Option<String>,
    pub expected_strategy: Option<DispatchStrategy>,
    pub fallback_strategies: Vec<DispatchStrategy>,
    pub performance: Vec<PerformanceExpectation>,
    /// Declared `performance-profile:`, if any.
    pub measurement_profile: Option<MeasurementConfig>,
    pub platforms: PlatformFilter,
    /// Empty means every optimization level.
    pub optimization_levels: BTreeSet<OptimizationLevel>,
    pub execution: ExecutionPolicy,
    pub validation_rules: Vec<ValidationRule>,
    pub quality_gates: Vec<QualityGate>,
    pub dependencies: Vec<TestDependency>,
}

impl TestContract {
    /// Contract with every field at its default.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            author: None,
            test_group: None,
            expected_strategy: None,
            fallback_strategies: Vec::new(),
            performance: Vec::new(),
            measurement_profile: None,
            platforms: PlatformFilter::default(),
            optimization_levels: BTreeSet::new(),
            execution: ExecutionPolicy::default(),
            validation_rules: Vec::new(),
            quality_gates: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Whether this contract holds for the given target.
    #[must_use]
    pub fn applies_to(&self, platform: Platform, optimization: OptimizationLevel) -> bool {
        self.platforms.matches(platform)
            && (self.optimization_levels.is_empty()
                || self.optimization_levels.contains(&optimization))
    }

    #[must_use]
    pub fn has_performance_expectations(&self) -> bool {
        !self.performance.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_tables_round_trip() {
        for p in Platform::ALL {
            assert_eq!(Platform::parse(p.as_str()), Some(p));
        }
        for o in OptimizationLevel::ALL {
            assert_eq!(OptimizationLevel::parse(o.as_str()), Some(o));
        }
        for s in DispatchStrategy::ALL {
            assert_eq!(DispatchStrategy::parse(s.as_str()), Some(s));
        }
        for m in PerformanceMetric::ALL {
            assert_eq!(PerformanceMetric::parse(m.as_str()), Some(m));
        }
    }

    #[test]
    fn parse_normalizes_case_and_hyphens() {
        assert_eq!(
            DispatchStrategy::parse(" Switch-Table "),
            Some(DispatchStrategy::SwitchTable)
        );
        assert_eq!(
            OptimizationLevel::parse("release-fast"),
            Some(OptimizationLevel::ReleaseFast)
        );
        assert_eq!(Platform::parse("sparc64"), None);
    }

    #[test]
    fn throughput_and_hit_ratio_prefer_higher_values() {
        assert_eq!(
            PerformanceMetric::ThroughputOpsPerSec.direction(),
            MetricDirection::HigherIsBetter
        );
        assert_eq!(
            PerformanceMetric::CacheHitRatio.direction(),
            MetricDirection::HigherIsBetter
        );
        assert_eq!(
            PerformanceMetric::DispatchOverheadNs.direction(),
            MetricDirection::LowerIsBetter
        );
    }

    #[test]
    fn expectation_tolerance_widens_bound() {
        let mut exp = PerformanceExpectation::new(
            PerformanceMetric::DispatchOverheadNs,
            ComparisonOperator::LessThan,
            30.0,
        );
        assert!(exp.is_satisfied_by(29.0));
        assert!(!exp.is_satisfied_by(32.0));
        exp.tolerance_pct = Some(10.0);
        assert!(exp.is_satisfied_by(32.0));
        assert!(!exp.is_satisfied_by(33.5));
    }

    #[test]
    fn approx_and_range_operators() {
        let approx = PerformanceExpectation::new(
            PerformanceMetric::CodeSizeBytes,
            ComparisonOperator::ApproxEqual,
            100.0,
        );
        assert!(approx.is_satisfied_by(104.0));
        assert!(!approx.is_satisfied_by(106.0));

        let mut range = PerformanceExpectation::new(
            PerformanceMetric::LatencyP95Ns,
            ComparisonOperator::WithinRange,
            10.0,
        );
        range.upper_bound = Some(20.0);
        assert!(range.is_satisfied_by(15.0));
        assert!(!range.is_satisfied_by(21.0));
        assert!(!range.is_satisfied_by(9.0));
    }

    #[test]
    fn filter_defaults_to_everything() {
        let contract = TestContract::empty("t");
        for p in Platform::ALL {
            for o in OptimizationLevel::ALL {
                assert!(contract.applies_to(p, o));
            }
        }
    }

    #[test]
    fn filter_honors_include_exclude_and_levels() {
        let mut contract = TestContract::empty("t");
        contract.platforms.exclude.insert(Platform::Wasm32);
        contract
            .optimization_levels
            .insert(OptimizationLevel::ReleaseFast);
        assert!(!contract.applies_to(Platform::Wasm32, OptimizationLevel::ReleaseFast));
        assert!(!contract.applies_to(Platform::LinuxX86_64, OptimizationLevel::Debug));
        assert!(contract.applies_to(Platform::LinuxX86_64, OptimizationLevel::ReleaseFast));
    }

    #[test]
    fn strategies_have_characteristics() {
        assert_eq!(
            DispatchStrategy::BinarySearch
                .expected_characteristics()
                .complexity,
            ComplexityClass::Logarithmic
        );
        assert_eq!(
            DispatchStrategy::MegamorphicDispatch
                .expected_characteristics()
                .cache_locality,
            CacheLocality::Poor
        );
    }
}
