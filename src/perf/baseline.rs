//! Versioned baseline history with regression-blocks-promotion policy.
//!
//! Writes to one (test, platform, optimization) key are serialized through a
//! per-key lock; unrelated keys never contend. Reads go straight to the store
//! and see the last committed history.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::contract::model::{
    MetricDirection, OptimizationLevel, PerformanceExpectation, PerformanceMetric, Platform,
};
use crate::core::config::BaselineConfig;
use crate::core::errors::Result;
use crate::perf::stats::{PerformanceMeasurement, StatisticalSummary, calculate_statistics};
use crate::perf::store::BaselineStore;
use crate::perf::validator::{ValidationConfig, ValidationResult, compare_with_baseline};

// ──────────────────── data model ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub test: String,
    pub platform: Platform,
    pub optimization: OptimizationLevel,
}

impl BaselineKey {
    #[must_use]
    pub fn new(test: impl Into<String>, platform: Platform, optimization: OptimizationLevel) -> Self {
        Self {
            test: test.into(),
            platform,
            optimization,
        }
    }

    /// Filesystem-safe stem, e.g. `dispatch_basic__linux_x86_64__release_fast`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let test: String = self
            .test
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{test}__{}__{}", self.platform, self.optimization)
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.test, self.platform, self.optimization)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub measurements: Vec<PerformanceMeasurement>,
    pub summary: StatisticalSummary,
}

impl PerformanceBaseline {
    pub fn from_measurements(measurements: Vec<PerformanceMeasurement>) -> Result<Self> {
        let summary = calculate_statistics(&measurements)?;
        Ok(Self {
            measurements,
            summary,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineVersion {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub compiler_version: String,
    pub justification: String,
    pub baseline: PerformanceBaseline,
}

/// Append-only version list for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineHistory {
    pub key: BaselineKey,
    pub versions: Vec<BaselineVersion>,
    pub current_version: Option<u32>,
}

impl BaselineHistory {
    #[must_use]
    pub fn new(key: BaselineKey) -> Self {
        Self {
            key,
            versions: Vec::new(),
            current_version: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&BaselineVersion> {
        let wanted = self.current_version?;
        self.versions.iter().find(|v| v.version == wanted)
    }

    fn next_version(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1
    }

    /// Overhead values of every stored measurement, oldest first.
    #[must_use]
    pub fn overhead_series(&self) -> Vec<f64> {
        self.versions
            .iter()
            .flat_map(|v| v.baseline.measurements.iter().map(|m| m.dispatch_overhead_ns))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineUpdateResult {
    pub updated: bool,
    pub new_version: Option<u32>,
    pub previous_version: Option<u32>,
    pub regression_prevented: bool,
    pub improvement_detected: bool,
    pub change_percentage: Option<f64>,
    pub justification: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
    HighlyVolatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub slope: f64,
    /// Slope per sample divided by the window mean.
    pub normalized_slope: f64,
    pub coefficient_of_variation: f64,
    pub confidence: f64,
    pub window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAnalysis {
    pub validation: ValidationResult,
    pub trend: Option<TrendAnalysis>,
    pub baseline_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdValidationResult {
    pub metric: PerformanceMetric,
    pub rule: String,
    pub threshold: f64,
    pub actual: Option<f64>,
    pub passed: bool,
    /// `(actual - threshold) / threshold * 100`, signed.
    pub deviation_pct: f64,
}

// ──────────────────── policy ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselinePolicy {
    pub regression_threshold: f64,
    pub trend_window: usize,
    pub volatility_threshold: f64,
    pub slope_threshold: f64,
}

impl Default for BaselinePolicy {
    fn default() -> Self {
        Self {
            regression_threshold: 0.10,
            trend_window: 20,
            volatility_threshold: 0.20,
            slope_threshold: 0.01,
        }
    }
}

impl BaselinePolicy {
    #[must_use]
    pub fn from_config(baseline: &BaselineConfig, regression_threshold: f64) -> Self {
        Self {
            regression_threshold,
            trend_window: baseline.trend_window,
            volatility_threshold: baseline.volatility_threshold,
            slope_threshold: baseline.slope_threshold,
        }
    }

    fn validation(&self) -> ValidationConfig {
        ValidationConfig {
            regression_threshold: self.regression_threshold,
            direction: MetricDirection::LowerIsBetter,
        }
    }
}

/// Least-squares trend over the last `policy.trend_window` values.
///
/// Needs at least three values. A coefficient of variation above the
/// volatility threshold overrides the slope verdict.
#[must_use]
pub fn analyze_trend(values: &[f64], policy: &BaselinePolicy) -> Option<TrendAnalysis> {
    let window = policy.trend_window.max(3);
    let recent = &values[values.len().saturating_sub(window)..];
    if recent.len() < 3 {
        return None;
    }
    let n = recent.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = recent.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in recent.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let normalized_slope = if mean_y.abs() > f64::EPSILON { slope / mean_y.abs() } else { 0.0 };
    let variance = recent.iter().map(|y| (y - mean_y).powi(2)).sum::<f64>() / n;
    let coefficient_of_variation = if mean_y.abs() > f64::EPSILON {
        variance.sqrt() / mean_y.abs()
    } else {
        0.0
    };

    let coverage = (n / policy.trend_window.max(1) as f64).min(1.0);
    let (direction, confidence) = if coefficient_of_variation > policy.volatility_threshold {
        (TrendDirection::HighlyVolatile, coverage * 0.5)
    } else if normalized_slope > policy.slope_threshold {
        (TrendDirection::Degrading, coverage)
    } else if normalized_slope < -policy.slope_threshold {
        (TrendDirection::Improving, coverage)
    } else {
        (TrendDirection::Stable, coverage)
    };

    Some(TrendAnalysis {
        direction,
        slope,
        normalized_slope,
        coefficient_of_variation,
        confidence,
        window: recent.len(),
    })
}

/// Apply absolute rules to one measurement.
#[must_use]
pub fn validate_thresholds(
    measurement: &PerformanceMeasurement,
    thresholds: &[PerformanceExpectation],
) -> Vec<ThresholdValidationResult> {
    thresholds
        .iter()
        .map(|rule| {
            let actual = measurement.value(rule.metric);
            let deviation_pct = match actual {
                Some(v) if rule.threshold.abs() > f64::EPSILON => {
                    (v - rule.threshold) / rule.threshold.abs() * 100.0
                }
                _ => 0.0,
            };
            ThresholdValidationResult {
                metric: rule.metric,
                rule: rule.describe(),
                threshold: rule.threshold,
                actual,
                passed: actual.is_some_and(|v| rule.is_satisfied_by(v)),
                deviation_pct,
            }
        })
        .collect()
}

// ──────────────────── manager ────────────────────

/// Single writer of baseline history.
pub struct BaselineManager {
    store: Arc<dyn BaselineStore>,
    policy: BaselinePolicy,
    locks: Mutex<HashMap<BaselineKey, Arc<Mutex<()>>>>,
}

impl BaselineManager {
    #[must_use]
    pub fn new(store: Arc<dyn BaselineStore>, policy: BaselinePolicy) -> Self {
        Self {
            store,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &BaselinePolicy {
        &self.policy
    }

    fn key_lock(&self, key: &BaselineKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Last committed history for `key`.
    pub fn load_history(&self, key: &BaselineKey) -> Result<Option<BaselineHistory>> {
        self.store.load(key)
    }

    /// Summary of the current version, if any.
    pub fn current_summary(&self, key: &BaselineKey) -> Result<Option<StatisticalSummary>> {
        Ok(self
            .store
            .load(key)?
            .and_then(|h| h.current().map(|v| v.baseline.summary)))
    }

    /// Propose `measurements` as the next baseline version.
    pub fn store_baseline_version(
        &self,
        key: &BaselineKey,
        measurements: Vec<PerformanceMeasurement>,
        compiler_version: &str,
    ) -> Result<BaselineUpdateResult> {
        self.store_baseline_version_if(key, measurements, compiler_version, || true)
    }

    /// Like [`Self::store_baseline_version`], but `still_wanted` is checked
    /// under the key lock right before the write; `false` drops the candidate.
    pub fn store_baseline_version_if(
        &self,
        key: &BaselineKey,
        measurements: Vec<PerformanceMeasurement>,
        compiler_version: &str,
        still_wanted: impl FnOnce() -> bool,
    ) -> Result<BaselineUpdateResult> {
        let candidate = PerformanceBaseline::from_measurements(measurements)?;
        let lock = self.key_lock(key);
        let outcome = {
            let _guard = lock.lock();
            self.promote_locked(key, candidate, compiler_version, still_wanted)
        };
        self.release_key_lock(key, &lock);
        outcome
    }

    /// Drop the per-key lock once no other writer holds it.
    fn release_key_lock(&self, key: &BaselineKey, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }

    fn promote_locked(
        &self,
        key: &BaselineKey,
        candidate: PerformanceBaseline,
        compiler_version: &str,
        still_wanted: impl FnOnce() -> bool,
    ) -> Result<BaselineUpdateResult> {
        let mut history = self
            .store
            .load(key)?
            .unwrap_or_else(|| BaselineHistory::new(key.clone()));
        let previous_version = history.current_version;

        let (justification, improvement_detected, change_percentage) = match history.current() {
            None => ("initial baseline".to_string(), false, None),
            Some(current) => {
                let verdict = compare_with_baseline(
                    &candidate.summary,
                    Some(&current.baseline.summary),
                    &self.policy.validation(),
                );
                if !verdict.passed {
                    return Ok(BaselineUpdateResult {
                        updated: false,
                        new_version: None,
                        previous_version,
                        regression_prevented: true,
                        improvement_detected: false,
                        change_percentage: Some(verdict.percentage_change),
                        justification: format!("rejected: {}", verdict.message),
                    });
                }
                let improved = verdict.is_significant_improvement();
                let why = if improved {
                    format!("accepted improvement: {}", verdict.message)
                } else {
                    format!("accepted: {}", verdict.message)
                };
                (why, improved, Some(verdict.percentage_change))
            }
        };

        if !still_wanted() {
            return Ok(BaselineUpdateResult {
                updated: false,
                new_version: None,
                previous_version,
                regression_prevented: false,
                improvement_detected: false,
                change_percentage,
                justification: "cancelled before commit".to_string(),
            });
        }

        let version = history.next_version();
        history.versions.push(BaselineVersion {
            version,
            created_at: Utc::now(),
            compiler_version: compiler_version.to_string(),
            justification: justification.clone(),
            baseline: candidate,
        });
        history.current_version = Some(version);
        self.store.save(&history)?;

        Ok(BaselineUpdateResult {
            updated: true,
            new_version: Some(version),
            previous_version,
            regression_prevented: false,
            improvement_detected,
            change_percentage,
            justification,
        })
    }

    /// Baseline comparison plus trend over the recent stored series.
    pub fn analyze_regression(
        &self,
        key: &BaselineKey,
        current: &StatisticalSummary,
    ) -> Result<RegressionAnalysis> {
        let history = self.store.load(key)?;
        let baseline = history.as_ref().and_then(|h| h.current());
        let validation = compare_with_baseline(
            current,
            baseline.map(|v| &v.baseline.summary),
            &self.policy.validation(),
        );
        let trend = history.as_ref().and_then(|h| {
            let mut series = h.overhead_series();
            series.push(current.mean);
            analyze_trend(&series, &self.policy)
        });
        Ok(RegressionAnalysis {
            validation,
            trend,
            baseline_version: baseline.map(|v| v.version),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::ComparisonOperator;
    use crate::perf::store::MemoryBaselineStore;

    fn key() -> BaselineKey {
        BaselineKey::new("dispatch_basic", Platform::LinuxX86_64, OptimizationLevel::ReleaseFast)
    }

    fn samples(values: &[f64]) -> Vec<PerformanceMeasurement> {
        values
            .iter()
            .copied()
            .map(PerformanceMeasurement::from_overhead)
            .collect()
    }

    fn manager() -> BaselineManager {
        BaselineManager::new(Arc::new(MemoryBaselineStore::default()), BaselinePolicy::default())
    }

    #[test]
    fn key_locks_do_not_accumulate() {
        let mgr = manager();
        for i in 0..20 {
            let k = BaselineKey::new(format!("case_{i}"), Platform::LinuxX86_64, OptimizationLevel::Debug);
            mgr.store_baseline_version(&k, samples(&[100.0]), "1.0").unwrap();
        }
        mgr.store_baseline_version(&key(), samples(&[130.0]), "1.0").unwrap();
        mgr.store_baseline_version(&key(), samples(&[160.0]), "1.0").unwrap();
        assert!(mgr.locks.lock().is_empty());
    }

    #[test]
    fn first_version_is_initial() {
        let mgr = manager();
        let r = mgr.store_baseline_version(&key(), samples(&[100.0]), "1.0").unwrap();
        assert!(r.updated);
        assert_eq!(r.new_version, Some(1));
        assert_eq!(r.justification, "initial baseline");
        assert_eq!(r.previous_version, None);
    }

    #[test]
    fn regression_is_rejected_and_history_unchanged() {
        let mgr = manager();
        mgr.store_baseline_version(&key(), samples(&[100.0]), "1.0").unwrap();
        let before = mgr.load_history(&key()).unwrap();
        let r = mgr.store_baseline_version(&key(), samples(&[120.0]), "1.1").unwrap();
        assert!(!r.updated);
        assert!(r.regression_prevented);
        assert_eq!(r.new_version, None);
        assert_eq!(mgr.load_history(&key()).unwrap(), before);
    }

    #[test]
    fn improvement_is_accepted_and_flagged() {
        let mgr = manager();
        mgr.store_baseline_version(&key(), samples(&[100.0]), "1.0").unwrap();
        let r = mgr.store_baseline_version(&key(), samples(&[70.0]), "1.1").unwrap();
        assert!(r.updated);
        assert!(r.improvement_detected);
        assert_eq!(r.new_version, Some(2));
        let history = mgr.load_history(&key()).unwrap().unwrap();
        assert_eq!(history.current_version, Some(2));
        assert_eq!(history.versions.len(), 2);
    }

    #[test]
    fn stable_candidate_is_accepted() {
        let mgr = manager();
        mgr.store_baseline_version(&key(), samples(&[100.0]), "1.0").unwrap();
        let r = mgr.store_baseline_version(&key(), samples(&[104.0]), "1.1").unwrap();
        assert!(r.updated);
        assert!(!r.improvement_detected);
        assert!(!r.regression_prevented);
    }

    #[test]
    fn cancelled_commit_leaves_history_alone() {
        let mgr = manager();
        let r = mgr
            .store_baseline_version_if(&key(), samples(&[100.0]), "1.0", || false)
            .unwrap();
        assert!(!r.updated);
        assert!(mgr.load_history(&key()).unwrap().is_none());
    }

    #[test]
    fn empty_candidate_is_an_error() {
        assert!(manager().store_baseline_version(&key(), Vec::new(), "1.0").is_err());
    }

    #[test]
    fn trend_directions() {
        let policy = BaselinePolicy::default();
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + f64::from(i) * 2.0).collect();
        assert_eq!(analyze_trend(&rising, &policy).unwrap().direction, TrendDirection::Degrading);
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert_eq!(analyze_trend(&falling, &policy).unwrap().direction, TrendDirection::Improving);
        let flat = vec![100.0; 10];
        let t = analyze_trend(&flat, &policy).unwrap();
        assert_eq!(t.direction, TrendDirection::Stable);
        assert!((t.confidence - 0.5).abs() < 1e-9);
        assert!(analyze_trend(&[1.0, 2.0], &policy).is_none());
    }

    #[test]
    fn volatility_overrides_slope_and_lowers_confidence() {
        let policy = BaselinePolicy::default();
        let noisy: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 50.0 } else { 150.0 }).collect();
        let t = analyze_trend(&noisy, &policy).unwrap();
        assert_eq!(t.direction, TrendDirection::HighlyVolatile);
        assert!(t.confidence <= 0.5);
    }

    #[test]
    fn trend_uses_only_recent_window() {
        let policy = BaselinePolicy {
            trend_window: 5,
            ..BaselinePolicy::default()
        };
        let mut values = vec![500.0, 10.0, 900.0];
        values.extend([100.0; 5]);
        let t = analyze_trend(&values, &policy).unwrap();
        assert_eq!(t.window, 5);
        assert_eq!(t.direction, TrendDirection::Stable);
    }

    #[test]
    fn thresholds_report_signed_deviation() {
        let mut m = PerformanceMeasurement::from_overhead(33.0);
        m.code_size_bytes = 400;
        let rules = vec![
            PerformanceExpectation::new(
                PerformanceMetric::DispatchOverheadNs,
                ComparisonOperator::LessThan,
                30.0,
            ),
            PerformanceExpectation::new(
                PerformanceMetric::CodeSizeBytes,
                ComparisonOperator::LessOrEqual,
                500.0,
            ),
            PerformanceExpectation::new(
                PerformanceMetric::LatencyP99Ns,
                ComparisonOperator::LessThan,
                10.0,
            ),
        ];
        let results = validate_thresholds(&m, &rules);
        assert!(!results[0].passed);
        assert!((results[0].deviation_pct - 10.0).abs() < 1e-9);
        assert!(results[1].passed);
        assert!((results[1].deviation_pct + 20.0).abs() < 1e-9);
        assert!(!results[2].passed);
        assert_eq!(results[2].actual, None);
    }

    #[test]
    fn analysis_reports_regression_against_current() {
        let mgr = manager();
        mgr.store_baseline_version(&key(), samples(&[100.0, 100.0, 100.0]), "1.0").unwrap();
        let current = calculate_statistics(&samples(&[130.0])).unwrap();
        let analysis = mgr.analyze_regression(&key(), &current).unwrap();
        assert_eq!(analysis.baseline_version, Some(1));
        assert!(analysis.validation.is_significant_regression());
        assert!(analysis.trend.is_some());
    }

    #[test]
    fn concurrent_writers_to_one_key_never_double_promote() {
        let mgr = Arc::new(manager());
        mgr.store_baseline_version(&key(), samples(&[100.0]), "1.0").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mgr = Arc::clone(&mgr);
                std::thread::spawn(move || {
                    let value = if i % 2 == 0 { 101.0 } else { 150.0 };
                    mgr.store_baseline_version(&key(), samples(&[value]), "1.1").unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let history = mgr.load_history(&key()).unwrap().unwrap();
        let accepted = results.iter().filter(|r| r.updated).count();
        assert_eq!(history.versions.len(), 1 + accepted);
        let mut versions: Vec<u32> = history.versions.iter().map(|v| v.version).collect();
        versions.dedup();
        assert_eq!(versions.len(), history.versions.len());
        for v in &history.versions {
            assert!(v.baseline.summary.mean < 150.0);
        }
    }
}
