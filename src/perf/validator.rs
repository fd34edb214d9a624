//! Baseline comparison and confidence-aware expectation checks.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::contract::model::{ComparisonOperator, MetricDirection, PerformanceExpectation};
use crate::perf::stats::{StatisticalSummary, summarize, z_for_confidence};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Fractional change treated as significant (0.10 = 10%).
    pub regression_threshold: f64,
    pub direction: MetricDirection,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            regression_threshold: 0.10,
            direction: MetricDirection::LowerIsBetter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub has_baseline: bool,
    pub current_mean: f64,
    pub baseline_mean: Option<f64>,
    /// Signed fractional change of the mean, `(current - baseline) / baseline`.
    pub percentage_change: f64,
    /// Change oriented so that positive is worse.
    pub regression_percentage: f64,
    pub z_score: Option<f64>,
    pub within_confidence_interval: bool,
    pub regression_detected: bool,
    pub improvement_detected: bool,
    pub message: String,
}

impl ValidationResult {
    /// Regression outside the baseline's confidence interval.
    #[must_use]
    pub fn is_significant_regression(&self) -> bool {
        self.regression_detected && !self.within_confidence_interval
    }

    #[must_use]
    pub fn is_significant_improvement(&self) -> bool {
        self.improvement_detected && !self.within_confidence_interval
    }
}

/// Compare a current summary with the baseline snapshot.
#[must_use]
pub fn compare_with_baseline(
    current: &StatisticalSummary,
    baseline: Option<&StatisticalSummary>,
    config: &ValidationConfig,
) -> ValidationResult {
    let Some(base) = baseline else {
        return ValidationResult {
            passed: true,
            has_baseline: false,
            current_mean: current.mean,
            baseline_mean: None,
            percentage_change: 0.0,
            regression_percentage: 0.0,
            z_score: None,
            within_confidence_interval: true,
            regression_detected: false,
            improvement_detected: false,
            message: "no baseline; measurement accepted".to_string(),
        };
    };

    let delta = current.mean - base.mean;
    let percentage_change = if base.mean.abs() < f64::EPSILON {
        if delta.abs() < f64::EPSILON { 0.0 } else { delta.signum() }
    } else {
        delta / base.mean.abs()
    };
    let regression_percentage = match config.direction {
        MetricDirection::LowerIsBetter => percentage_change,
        MetricDirection::HigherIsBetter => -percentage_change,
    };
    let z_score = if base.stddev > 0.0 {
        Some(delta / base.stddev)
    } else if delta.abs() < f64::EPSILON {
        Some(0.0)
    } else {
        None
    };
    let within_confidence_interval = base.contains(current.mean);
    let regression_detected = regression_percentage > config.regression_threshold;
    let improvement_detected = regression_percentage < -config.regression_threshold;
    let passed = !regression_detected || within_confidence_interval;

    let message = if regression_detected && within_confidence_interval {
        format!(
            "{:+.1}% change within baseline 95% CI [{:.3}, {:.3}]; treated as noise",
            percentage_change * 100.0,
            base.ci_lower,
            base.ci_upper
        )
    } else if regression_detected {
        format!(
            "regression of {:.1}% against baseline mean {:.3} (threshold {:.1}%)",
            regression_percentage * 100.0,
            base.mean,
            config.regression_threshold * 100.0
        )
    } else if improvement_detected {
        format!(
            "improvement of {:.1}% against baseline mean {:.3}",
            -regression_percentage * 100.0,
            base.mean
        )
    } else {
        format!("{:+.1}% change against baseline mean {:.3}", percentage_change * 100.0, base.mean)
    };

    ValidationResult {
        passed,
        has_baseline: true,
        current_mean: current.mean,
        baseline_mean: Some(base.mean),
        percentage_change,
        regression_percentage,
        z_score,
        within_confidence_interval,
        regression_detected,
        improvement_detected,
        message,
    }
}

/// Outcome of one declared performance bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationCheck {
    pub expectation: String,
    pub observed: f64,
    /// Value actually compared: the one-sided confidence bound or the mean.
    pub bound_used: f64,
    pub passed: bool,
    pub sample_count: usize,
}

/// Check `expectation` against samples at its confidence level.
///
/// `<`/`<=` use the upper bound `mean + z·sem`, `>`/`>=` the lower bound
/// `mean - z·sem`; `~=` and ranges use the mean.
#[must_use]
pub fn check_expectation(expectation: &PerformanceExpectation, samples: &[f64]) -> Option<ExpectationCheck> {
    let summary = summarize(samples).ok()?;
    let margin = z_for_confidence(expectation.confidence_level) * summary.sem();
    let bound_used = match expectation.operator {
        ComparisonOperator::LessThan | ComparisonOperator::LessOrEqual => summary.mean + margin,
        ComparisonOperator::GreaterThan | ComparisonOperator::GreaterOrEqual => {
            summary.mean - margin
        }
        ComparisonOperator::ApproxEqual | ComparisonOperator::WithinRange => summary.mean,
    };
    Some(ExpectationCheck {
        expectation: expectation.describe(),
        observed: summary.mean,
        bound_used,
        passed: expectation.is_satisfied_by(bound_used),
        sample_count: summary.sample_count,
    })
}
