//! `// @key: value` annotation parser.
//!
//! [`parse_contract`] is a pure function of the source text. Any malformed
//! annotation fails the whole contract with a [`MetadataParseError`] carrying
//! the 1-based line number.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::contract::model::{
    ComparisonOperator, DispatchStrategy, MeasurementConfig, OptimizationLevel,
    PerformanceExpectation, PerformanceMetric, Platform, QualityGate, TestContract,
    TestDependency, ValidationRule, normalize_ident,
};
use crate::ir::diff::Severity;
use crate::registry::codes::ErrorCode;

/// Fixed prefix marking an annotation line.
pub const ANNOTATION_PREFIX: &str = "// @";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataParseError {
    #[error("line {line}: malformed annotation {text:?} (expected `// @key: value`)")]
    InvalidMetadataFormat { line: usize, text: String },

    #[error("line {line}: unknown performance metric {metric:?}")]
    UnknownPerformanceMetric { line: usize, metric: String },

    #[error("line {line}: invalid threshold value {value:?}")]
    InvalidThresholdValue { line: usize, value: String },

    #[error("line {line}: invalid platform specification: {details}")]
    InvalidPlatformSpecification { line: usize, details: String },

    #[error("line {line}: unknown dispatch strategy {value:?}")]
    UnknownDispatchStrategy { line: usize, value: String },

    #[error("line {line}: invalid value {value:?} for `{key}` (expected {expected})")]
    InvalidDirectiveValue {
        line: usize,
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl MetadataParseError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMetadataFormat { .. } => ErrorCode::InvalidMetadataFormat,
            Self::UnknownPerformanceMetric { .. } => ErrorCode::UnknownPerformanceMetric,
            Self::InvalidThresholdValue { .. } => ErrorCode::InvalidThresholdValue,
            Self::InvalidPlatformSpecification { .. } => ErrorCode::InvalidPlatformSpecification,
            Self::UnknownDispatchStrategy { .. } => ErrorCode::UnknownDispatchStrategy,
            Self::InvalidDirectiveValue { .. } => ErrorCode::InvalidDirectiveValue,
        }
    }

    #[must_use]
    pub const fn line(&self) -> usize {
        match self {
            Self::InvalidMetadataFormat { line, .. }
            | Self::UnknownPerformanceMetric { line, .. }
            | Self::InvalidThresholdValue { line, .. }
            | Self::InvalidPlatformSpecification { line, .. }
            | Self::UnknownDispatchStrategy { line, .. }
            | Self::InvalidDirectiveValue { line, .. } => *line,
        }
    }
}

type ParseResult<T> = std::result::Result<T, MetadataParseError>;

/// Cheap check used by discovery before a full parse.
#[must_use]
pub fn has_annotations(source: &str) -> bool {
    memchr::memmem::find(source.as_bytes(), ANNOTATION_PREFIX.as_bytes()).is_some()
}

/// Split an annotation line into `(key, value)`.
///
/// Returns `Ok(None)` for lines that are not annotations at all.
pub fn split_annotation(line_no: usize, raw: &str) -> ParseResult<Option<(String, String)>> {
    let Some(body) = raw.trim_start().strip_prefix(ANNOTATION_PREFIX) else {
        return Ok(None);
    };
    let malformed = || MetadataParseError::InvalidMetadataFormat {
        line: line_no,
        text: raw.trim().to_string(),
    };
    let (key, value) = body.split_once(':').ok_or_else(malformed)?;
    let key = key.trim();
    let well_formed = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(malformed());
    }
    Ok(Some((key.to_ascii_lowercase(), value.trim().to_string())))
}

/// Parse every annotation in `source` into a contract named `name`.
pub fn parse_contract(name: &str, source: &str) -> ParseResult<TestContract> {
    let mut builder = ContractBuilder::new(name);
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        if let Some((key, value)) = split_annotation(line_no, raw)? {
            builder.apply(line_no, &key, &value)?;
        }
    }
    builder.finish()
}

// ──────────────────── builder ────────────────────

struct ContractBuilder {
    contract: TestContract,
    include_all: bool,
    include_line: usize,
    exclude_line: usize,
    profile: Option<MeasurementConfig>,
}

impl ContractBuilder {
    fn new(name: &str) -> Self {
        Self {
            contract: TestContract::empty(name),
            include_all: false,
            include_line: 0,
            exclude_line: 0,
            profile: None,
        }
    }

    fn apply(&mut self, line: usize, key: &str, value: &str) -> ParseResult<()> {
        let c = &mut self.contract;
        match key {
            "expected-strategy" => {
                let strategy = parse_strategy(line, value)?;
                if let Some(existing) = c.expected_strategy
                    && existing != strategy
                {
                    return Err(invalid(
                        line,
                        key,
                        value,
                        "a single strategy (conflicts with an earlier expected-strategy)",
                    ));
                }
                c.expected_strategy = Some(strategy);
            }
            "fallback-strategy" | "fallback-strategies" => {
                for part in split_list(value) {
                    let strategy = parse_strategy(line, part)?;
                    if !c.fallback_strategies.contains(&strategy) {
                        c.fallback_strategies.push(strategy);
                    }
                }
            }
            "performance" => c.performance.push(parse_performance(line, value)?),
            "platforms" => {
                let (all, set) = parse_platforms(line, value)?;
                self.include_all |= all;
                c.platforms.include.extend(set);
                self.include_line = line;
            }
            "exclude-platforms" => {
                let (_, set) = parse_platforms(line, value)?;
                c.platforms.exclude.extend(set);
                self.exclude_line = line;
            }
            "optimization-level" | "optimization-levels" => {
                c.optimization_levels
                    .extend(parse_optimization_levels(line, key, value)?);
            }
            "timeout" => {
                c.execution.timeout = parse_duration(value)
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| invalid(line, key, value, "a duration like 30, 30s, 500ms or 2m"))?;
                c.execution.timeout_declared = true;
            }
            "max-retries" => {
                c.execution.max_retries = value
                    .parse()
                    .map_err(|_| invalid(line, key, value, "a non-negative integer"))?;
            }
            "parallel" => c.execution.parallel = parse_bool(line, key, value)?,
            "requires-isolation" => {
                c.execution.requires_isolation = parse_bool(line, key, value)?;
            }
            "setup" => c.execution.setup.push(non_empty(line, key, value)?),
            "cleanup" => c.execution.cleanup.push(non_empty(line, key, value)?),
            "env" => {
                let (k, v) = value
                    .split_once('=')
                    .filter(|(k, _)| !k.trim().is_empty())
                    .ok_or_else(|| invalid(line, key, value, "KEY=VALUE"))?;
                c.execution
                    .env
                    .insert(k.trim().to_string(), v.trim().to_string());
            }
            "depends-on" => {
                for part in split_list(value) {
                    let (test, required) = match part.strip_suffix('?') {
                        Some(optional) => (optional.trim(), false),
                        None => (part, true),
                    };
                    if test.is_empty() {
                        return Err(invalid(line, key, value, "a comma list of test names"));
                    }
                    c.dependencies.push(TestDependency {
                        test: test.to_string(),
                        required,
                    });
                }
            }
            "test-group" => c.test_group = Some(non_empty(line, key, value)?),
            "validate" => c.validation_rules.push(parse_rule(line, value)?),
            "quality-gate" => c.quality_gates.push(parse_gate(line, value)?),
            "performance-profile" => self.profile = Some(parse_profile(line, value)?),
            "description" => {
                let text = value.to_string();
                c.description = Some(match c.description.take() {
                    Some(prev) => format!("{prev} {text}"),
                    None => text,
                });
            }
            "author" => c.author = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self) -> ParseResult<TestContract> {
        let c = &mut self.contract;
        if self.include_all && !c.platforms.exclude.is_empty() {
            return Err(MetadataParseError::InvalidPlatformSpecification {
                line: self.include_line.max(self.exclude_line),
                details: "`platforms: all` cannot be combined with exclude-platforms".to_string(),
            });
        }
        if let Some(overlap) = c.platforms.include.intersection(&c.platforms.exclude).next() {
            return Err(MetadataParseError::InvalidPlatformSpecification {
                line: self.include_line.max(self.exclude_line),
                details: format!("{overlap} is both included and excluded"),
            });
        }
        if let Some(strategy) = c.expected_strategy {
            c.fallback_strategies.retain(|s| *s != strategy);
        }
        if let Some(mut profile) = self.profile {
            if c.execution.requires_isolation {
                profile.requires_isolation = true;
            }
            for expectation in &mut c.performance {
                expectation.measurement = profile;
            }
            c.measurement_profile = Some(profile);
        }
        if c.execution.requires_isolation {
            for expectation in &mut c.performance {
                expectation.measurement.requires_isolation = true;
            }
        }
        Ok(self.contract)
    }
}

// ──────────────────── value parsers ────────────────────

fn invalid(line: usize, key: &str, value: &str, expected: &'static str) -> MetadataParseError {
    MetadataParseError::InvalidDirectiveValue {
        line,
        key: key.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn non_empty(line: usize, key: &str, value: &str) -> ParseResult<String> {
    if value.is_empty() {
        Err(invalid(line, key, value, "a non-empty value"))
    } else {
        Ok(value.to_string())
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_strategy(line: usize, value: &str) -> ParseResult<DispatchStrategy> {
    DispatchStrategy::parse(value).ok_or_else(|| MetadataParseError::UnknownDispatchStrategy {
        line,
        value: value.trim().to_string(),
    })
}

fn parse_bool(line: usize, key: &str, value: &str) -> ParseResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(line, key, value, "true or false")),
    }
}

/// `30`, `30s`, `500ms`, `2m`.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" | "sec" | "secs" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" | "min" => amount.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}

fn parse_platforms(line: usize, value: &str) -> ParseResult<(bool, BTreeSet<Platform>)> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok((true, Platform::ALL.into_iter().collect()));
    }
    let mut set = BTreeSet::new();
    for part in split_list(value) {
        let platform =
            Platform::parse(part).ok_or_else(|| MetadataParseError::InvalidPlatformSpecification {
                line,
                details: format!("unknown platform {part:?}"),
            })?;
        set.insert(platform);
    }
    if set.is_empty() {
        return Err(MetadataParseError::InvalidPlatformSpecification {
            line,
            details: "empty platform list".to_string(),
        });
    }
    Ok((false, set))
}

fn parse_optimization_levels(
    line: usize,
    key: &str,
    value: &str,
) -> ParseResult<BTreeSet<OptimizationLevel>> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(OptimizationLevel::ALL.into_iter().collect());
    }
    let mut set = BTreeSet::new();
    for part in split_list(value) {
        set.insert(OptimizationLevel::parse(part).ok_or_else(|| {
            invalid(line, key, value, "debug, release_safe, release_fast or release_small")
        })?);
    }
    if set.is_empty() {
        return Err(invalid(line, key, value, "at least one optimization level"));
    }
    Ok(set)
}

const OPERATORS: [(&str, ComparisonOperator); 5] = [
    ("<=", ComparisonOperator::LessOrEqual),
    (">=", ComparisonOperator::GreaterOrEqual),
    ("~=", ComparisonOperator::ApproxEqual),
    ("<", ComparisonOperator::LessThan),
    (">", ComparisonOperator::GreaterThan),
];

/// `metric OP threshold [±N%] [@P%]` or `metric in LO..HI [±N%] [@P%]`.
pub fn parse_performance(line: usize, value: &str) -> ParseResult<PerformanceExpectation> {
    let split = OPERATORS
        .iter()
        .find_map(|(symbol, op)| value.find(symbol).map(|pos| (pos, symbol.len(), *op)));

    let (metric_raw, operator, rest) = match split {
        Some((pos, len, op)) => (&value[..pos], op, &value[pos + len..]),
        None => {
            let (lhs, rhs) = value.split_once(" in ").ok_or_else(|| {
                MetadataParseError::InvalidMetadataFormat {
                    line,
                    text: value.to_string(),
                }
            })?;
            (lhs, ComparisonOperator::WithinRange, rhs)
        }
    };

    let metric_raw = metric_raw.trim();
    let metric = PerformanceMetric::parse(metric_raw).ok_or_else(|| {
        MetadataParseError::UnknownPerformanceMetric {
            line,
            metric: metric_raw.to_string(),
        }
    })?;

    let (bound, modifiers) = split_modifiers(rest);
    let bad_threshold = || MetadataParseError::InvalidThresholdValue {
        line,
        value: bound.trim().to_string(),
    };

    let mut expectation = if operator == ComparisonOperator::WithinRange {
        let (lo, hi) = bound.split_once("..").ok_or_else(bad_threshold)?;
        let lo = parse_number(lo).ok_or_else(bad_threshold)?;
        let hi = parse_number(hi).ok_or_else(bad_threshold)?;
        if lo > hi {
            return Err(bad_threshold());
        }
        let mut exp = PerformanceExpectation::new(metric, operator, lo);
        exp.upper_bound = Some(hi);
        exp
    } else {
        let threshold = parse_number(bound).ok_or_else(bad_threshold)?;
        PerformanceExpectation::new(metric, operator, threshold)
    };

    for modifier in modifiers {
        if let Some(tol) = modifier
            .strip_prefix('±')
            .or_else(|| modifier.strip_prefix("+-"))
        {
            let pct = parse_percent(tol)
                .filter(|p| *p >= 0.0)
                .ok_or_else(|| MetadataParseError::InvalidThresholdValue {
                    line,
                    value: modifier.to_string(),
                })?;
            expectation.tolerance_pct = Some(pct);
        } else if let Some(conf) = modifier.strip_prefix('@') {
            let raw = parse_percent(conf).ok_or_else(|| {
                MetadataParseError::InvalidThresholdValue {
                    line,
                    value: modifier.to_string(),
                }
            })?;
            let level = if raw > 1.0 { raw / 100.0 } else { raw };
            if !(level > 0.0 && level < 1.0) {
                return Err(MetadataParseError::InvalidThresholdValue {
                    line,
                    value: modifier.to_string(),
                });
            }
            expectation.confidence_level = level;
        } else {
            return Err(MetadataParseError::InvalidThresholdValue {
                line,
                value: modifier.to_string(),
            });
        }
    }
    Ok(expectation)
}

/// Split `30 ±10% @99%` into `("30 ", ["±10%", "@99%"])`.
fn split_modifiers(rest: &str) -> (&str, Vec<&str>) {
    let start = rest
        .char_indices()
        .find(|(i, c)| *c == '±' || *c == '@' || rest[*i..].starts_with("+-"))
        .map_or(rest.len(), |(i, _)| i);
    let (bound, tail) = rest.split_at(start);
    let mut modifiers = Vec::new();
    let mut cursor = tail.trim();
    while !cursor.is_empty() {
        let next = cursor
            .char_indices()
            .skip(1)
            .find(|(i, c)| *c == '±' || *c == '@' || cursor[*i..].starts_with("+-"))
            .map_or(cursor.len(), |(i, _)| i);
        modifiers.push(cursor[..next].trim());
        cursor = cursor[next..].trim();
    }
    (bound, modifiers)
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_percent(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    parse_number(raw.strip_suffix('%').unwrap_or(raw))
}

/// `validate: KIND [ARG]`.
pub fn parse_rule(line: usize, value: &str) -> ParseResult<ValidationRule> {
    let (kind, arg) = value
        .split_once(char::is_whitespace)
        .map_or((value, ""), |(k, a)| (k, a.trim()));
    let expected = "contains, not_contains, matches, max_functions, max_instructions, no_indirect_calls or requires_dispatch_table";
    let count = |arg: &str| {
        arg.parse::<usize>()
            .map_err(|_| invalid(line, "validate", value, "a non-negative count"))
    };
    let text = |arg: &str| {
        let unquoted = arg
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(arg);
        if unquoted.is_empty() {
            Err(invalid(line, "validate", value, "a non-empty argument"))
        } else {
            Ok(unquoted.to_string())
        }
    };
    match normalize_ident(kind).as_str() {
        "contains" => Ok(ValidationRule::Contains(text(arg)?)),
        "not_contains" => Ok(ValidationRule::NotContains(text(arg)?)),
        "matches" => {
            let pattern = text(arg)?;
            regex::Regex::new(&pattern)
                .map_err(|_| invalid(line, "validate", value, "a valid regular expression"))?;
            Ok(ValidationRule::Matches(pattern))
        }
        "max_functions" => Ok(ValidationRule::MaxFunctions(count(arg)?)),
        "max_instructions" => Ok(ValidationRule::MaxInstructions(count(arg)?)),
        "no_indirect_calls" => Ok(ValidationRule::NoIndirectCalls),
        "requires_dispatch_table" => Ok(ValidationRule::RequiresDispatchTable),
        _ => Err(invalid(line, "validate", value, expected)),
    }
}

/// `quality-gate: KIND [ARGS]`.
pub fn parse_gate(line: usize, value: &str) -> ParseResult<QualityGate> {
    let mut parts = value.split_whitespace();
    let kind = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let bad = |expected| invalid(line, "quality-gate", value, expected);
    match (normalize_ident(kind).as_str(), args.as_slice()) {
        ("max_differences", [severity, limit]) => Ok(QualityGate::MaxDifferences {
            severity: Severity::parse(severity)
                .ok_or_else(|| bad("cosmetic, semantic, breaking or critical"))?,
            limit: limit.parse().map_err(|_| bad("a non-negative count"))?,
        }),
        ("max_regression_pct", [pct]) => parse_percent(pct)
            .filter(|p| *p >= 0.0)
            .map(QualityGate::MaxRegressionPct)
            .ok_or_else(|| bad("a non-negative percentage")),
        ("require_baseline", []) => Ok(QualityGate::RequireBaseline),
        ("min_samples", [n]) => n
            .parse()
            .map(QualityGate::MinSamples)
            .map_err(|_| bad("a non-negative count")),
        _ => Err(bad(
            "max_differences SEVERITY N, max_regression_pct P, require_baseline or min_samples N",
        )),
    }
}

/// Named profile or `warmup=N, iterations=N, isolation=B`.
pub fn parse_profile(line: usize, value: &str) -> ParseResult<MeasurementConfig> {
    let key = "performance-profile";
    match normalize_ident(value).as_str() {
        "quick" => return Ok(MeasurementConfig::quick()),
        "standard" => return Ok(MeasurementConfig::standard()),
        "thorough" => return Ok(MeasurementConfig::thorough()),
        _ => {}
    }
    let expected = "quick, standard, thorough or warmup=N, iterations=N, isolation=B";
    let mut config = MeasurementConfig::standard();
    let mut seen = false;
    for pair in split_list(value) {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| invalid(line, key, value, expected))?;
        let v = v.trim();
        match normalize_ident(k).as_str() {
            "warmup" => {
                config.warmup_iterations =
                    v.parse().map_err(|_| invalid(line, key, value, expected))?;
            }
            "iterations" | "measurement" => {
                config.measurement_iterations = v
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid(line, key, value, expected))?;
            }
            "isolation" => config.requires_isolation = parse_bool(line, key, v)?,
            _ => return Err(invalid(line, key, value, expected)),
        }
        seen = true;
    }
    if seen {
        Ok(config)
    } else {
        Err(invalid(line, key, value, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseResult<TestContract> {
        parse_contract("case", source)
    }

    #[test]
    fn simple_performance_line() {
        let exp = parse_performance(1, "dispatch_overhead_ns < 30").unwrap();
        assert_eq!(exp.metric, PerformanceMetric::DispatchOverheadNs);
        assert_eq!(exp.operator, ComparisonOperator::LessThan);
        assert!((exp.threshold - 30.0).abs() < f64::EPSILON);
        assert!((exp.confidence_level - 0.95).abs() < f64::EPSILON);
        assert_eq!(exp.tolerance_pct, None);
    }

    #[test]
    fn operator_priority_prefers_two_char_forms() {
        let le = parse_performance(1, "code_size_bytes <= 512").unwrap();
        assert_eq!(le.operator, ComparisonOperator::LessOrEqual);
        let ge = parse_performance(1, "throughput_ops_per_sec >= 1e6").unwrap();
        assert_eq!(ge.operator, ComparisonOperator::GreaterOrEqual);
        let approx = parse_performance(1, "memory_usage_bytes ~= 4096").unwrap();
        assert_eq!(approx.operator, ComparisonOperator::ApproxEqual);
    }

    #[test]
    fn tolerance_and_confidence_modifiers() {
        let exp = parse_performance(1, "latency_p99 < 120 ±10% @99%").unwrap();
        assert_eq!(exp.metric, PerformanceMetric::LatencyP99Ns);
        assert_eq!(exp.tolerance_pct, Some(10.0));
        assert!((exp.confidence_level - 0.99).abs() < 1e-12);

        let tight = parse_performance(1, "dispatch_overhead_ns<30+-5%@0.9").unwrap();
        assert_eq!(tight.tolerance_pct, Some(5.0));
        assert!((tight.confidence_level - 0.9).abs() < 1e-12);
    }

    #[test]
    fn range_form() {
        let exp = parse_performance(1, "cache_hit_ratio in 0.8..1.0").unwrap();
        assert_eq!(exp.operator, ComparisonOperator::WithinRange);
        assert_eq!(exp.upper_bound, Some(1.0));
        assert!(matches!(
            parse_performance(1, "cache_hit_ratio in 1.0..0.5"),
            Err(MetadataParseError::InvalidThresholdValue { .. })
        ));
    }

    #[test]
    fn performance_errors_are_specific() {
        assert!(matches!(
            parse_performance(3, "dispatch_speed < 30"),
            Err(MetadataParseError::UnknownPerformanceMetric { line: 3, .. })
        ));
        assert!(matches!(
            parse_performance(3, "dispatch_overhead_ns < fast"),
            Err(MetadataParseError::InvalidThresholdValue { .. })
        ));
        assert!(matches!(
            parse_performance(3, "dispatch_overhead_ns < 30 @150%"),
            Err(MetadataParseError::InvalidThresholdValue { .. })
        ));
    }

    #[test]
    fn full_contract_with_defaults() {
        let source = "\
// @description: switch lowering for dense enums
// @expected-strategy: switch_table
// @performance: dispatch_overhead_ns < 30
// @author: codegen team
fn main() {}
";
        let contract = parse(source).unwrap();
        assert_eq!(contract.name, "case");
        assert_eq!(contract.expected_strategy, Some(DispatchStrategy::SwitchTable));
        assert_eq!(contract.performance.len(), 1);
        assert_eq!(contract.execution.timeout, Duration::from_secs(30));
        assert!(contract.execution.parallel);
        assert!(!contract.execution.timeout_declared);
        assert_eq!(contract.author.as_deref(), Some("codegen team"));
    }

    #[test]
    fn platform_in_both_lists_is_rejected() {
        let source = "// @platforms: linux_x86_64, wasm32\n// @exclude-platforms: wasm32\n";
        assert!(matches!(
            parse(source),
            Err(MetadataParseError::InvalidPlatformSpecification { line: 2, .. })
        ));
    }

    #[test]
    fn all_platforms_with_exclusion_is_rejected() {
        let source = "// @exclude-platforms: wasm32\n// @platforms: all\n";
        assert!(matches!(
            parse(source),
            Err(MetadataParseError::InvalidPlatformSpecification { .. })
        ));
    }

    #[test]
    fn exclusion_alone_is_fine() {
        let contract = parse("// @exclude-platforms: wasm32, windows_x86_64\n").unwrap();
        assert!(contract.platforms.include.is_empty());
        assert!(!contract.platforms.matches(Platform::Wasm32));
        assert!(contract.platforms.matches(Platform::LinuxAarch64));
    }

    #[test]
    fn unknown_platform_is_rejected() {
        assert!(matches!(
            parse("// @platforms: linux_x86_64, amiga\n"),
            Err(MetadataParseError::InvalidPlatformSpecification { .. })
        ));
    }

    #[test]
    fn missing_colon_is_malformed() {
        let err = parse("// @expected-strategy switch_table\n").unwrap_err();
        assert!(matches!(err, MetadataParseError::InvalidMetadataFormat { line: 1, .. }));
        assert_eq!(err.code(), ErrorCode::InvalidMetadataFormat);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let contract = parse("// @reviewed-by: someone\n// @timeout: 500ms\n").unwrap();
        assert_eq!(contract.execution.timeout, Duration::from_millis(500));
        assert!(contract.execution.timeout_declared);
    }

    #[test]
    fn ordinary_comments_are_not_annotations() {
        let contract = parse("// plain comment: with colon\n//@notannotation\n").unwrap();
        assert_eq!(contract, TestContract::empty("case"));
    }

    #[test]
    fn conflicting_strategy_is_rejected_but_repeats_are_fine() {
        assert!(parse("// @expected-strategy: switch_table\n// @expected-strategy: switch\n").is_ok());
        assert!(matches!(
            parse("// @expected-strategy: switch_table\n// @expected-strategy: perfect_hash\n"),
            Err(MetadataParseError::InvalidDirectiveValue { line: 2, .. })
        ));
        assert!(matches!(
            parse("// @expected-strategy: vtable_magic\n"),
            Err(MetadataParseError::UnknownDispatchStrategy { .. })
        ));
    }

    #[test]
    fn execution_policy_directives() {
        let source = "\
// @timeout: 2m
// @max-retries: 3
// @parallel: false
// @requires-isolation: yes
// @setup: mkdir -p /tmp/x
// @cleanup: rm -rf /tmp/x
// @env: DCV_MODE=strict
// @test-group: dispatch
";
        let contract = parse(source).unwrap();
        let exec = &contract.execution;
        assert_eq!(exec.timeout, Duration::from_secs(120));
        assert_eq!(exec.max_retries, 3);
        assert!(!exec.parallel);
        assert!(exec.requires_isolation);
        assert!(!exec.runs_in_pool());
        assert_eq!(exec.setup, vec!["mkdir -p /tmp/x".to_string()]);
        assert_eq!(exec.env.get("DCV_MODE").map(String::as_str), Some("strict"));
        assert_eq!(contract.test_group.as_deref(), Some("dispatch"));
    }

    #[test]
    fn bad_directive_values() {
        assert!(parse("// @timeout: soon\n").is_err());
        assert!(parse("// @timeout: 0\n").is_err());
        assert!(parse("// @parallel: maybe\n").is_err());
        assert!(parse("// @env: NOEQUALS\n").is_err());
        assert!(parse("// @optimization-level: O9\n").is_err());
    }

    #[test]
    fn dependencies_rules_and_gates() {
        let source = "\
// @depends-on: base_case, warm_cache?
// @validate: contains \"switch i32\"
// @validate: max_functions 4
// @validate: no_indirect_calls
// @quality-gate: max_differences semantic 0
// @quality-gate: min_samples 10
";
        let contract = parse(source).unwrap();
        assert_eq!(contract.dependencies.len(), 2);
        assert!(contract.dependencies[0].required);
        assert!(!contract.dependencies[1].required);
        assert_eq!(contract.dependencies[1].test, "warm_cache");
        assert_eq!(
            contract.validation_rules,
            vec![
                ValidationRule::Contains("switch i32".to_string()),
                ValidationRule::MaxFunctions(4),
                ValidationRule::NoIndirectCalls,
            ]
        );
        assert_eq!(
            contract.quality_gates[0],
            QualityGate::MaxDifferences {
                severity: Severity::Semantic,
                limit: 0
            }
        );
        assert!(parse("// @validate: matches (unclosed\n").is_err());
        assert!(parse("// @quality-gate: max_differences fatal 1\n").is_err());
    }

    #[test]
    fn profile_applies_to_all_expectations() {
        let source = "\
// @performance: dispatch_overhead_ns < 30
// @performance-profile: warmup=5, iterations=50
// @performance: code_size_bytes < 1024
";
        let contract = parse(source).unwrap();
        for exp in &contract.performance {
            assert_eq!(exp.measurement.warmup_iterations, 5);
            assert_eq!(exp.measurement.measurement_iterations, 50);
        }
        let thorough = parse("// @performance-profile: thorough\n// @performance: cache_misses < 10\n")
            .unwrap();
        assert!(thorough.performance[0].measurement.requires_isolation);
    }

    #[test]
    fn declared_profile_is_kept_even_when_standard() {
        let standard = parse("// @performance-profile: standard\n// @performance: cache_misses < 10\n")
            .unwrap();
        assert_eq!(standard.measurement_profile, Some(MeasurementConfig::standard()));
        let undeclared = parse("// @performance: cache_misses < 10\n").unwrap();
        assert_eq!(undeclared.measurement_profile, None);
    }

    #[test]
    fn fallback_excludes_expected() {
        let contract = parse(
            "// @expected-strategy: perfect_hash\n// @fallback-strategy: switch_table, perfect_hash, binary_search\n",
        )
        .unwrap();
        assert_eq!(
            contract.fallback_strategies,
            vec![DispatchStrategy::SwitchTable, DispatchStrategy::BinarySearch]
        );
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("2h"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn annotation_detection() {
        assert!(has_annotations("x\n// @timeout: 1\n"));
        assert!(!has_annotations("// regular\n"));
    }
}
