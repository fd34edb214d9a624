//! Measurements, summary statistics and percentile snapshots.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::model::PerformanceMetric;
use crate::core::errors::{DcvError, Result};

/// z for the two-sided 95% interval. Normal approximation regardless of n.
pub const Z_95: f64 = 1.96;

/// One sampled observation. Immutable once taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMeasurement {
    pub dispatch_overhead_ns: f64,
    pub memory_usage_bytes: u64,
    pub code_size_bytes: u64,
    pub cache_misses: u64,
    pub instruction_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_ratio: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMeasurement {
    /// Measurement carrying only a dispatch overhead, stamped now.
    #[must_use]
    pub fn from_overhead(dispatch_overhead_ns: f64) -> Self {
        Self {
            dispatch_overhead_ns,
            memory_usage_bytes: 0,
            code_size_bytes: 0,
            cache_misses: 0,
            instruction_count: 0,
            cache_hit_ratio: None,
            timestamp: Utc::now(),
        }
    }

    /// Per-measurement value of `metric`, if this measurement carries it.
    #[must_use]
    pub fn value(&self, metric: PerformanceMetric) -> Option<f64> {
        match metric {
            PerformanceMetric::DispatchOverheadNs => Some(self.dispatch_overhead_ns),
            PerformanceMetric::MemoryUsageBytes => Some(self.memory_usage_bytes as f64),
            PerformanceMetric::CodeSizeBytes => Some(self.code_size_bytes as f64),
            PerformanceMetric::CacheMisses => Some(self.cache_misses as f64),
            PerformanceMetric::InstructionCount => Some(self.instruction_count as f64),
            PerformanceMetric::CacheHitRatio => self.cache_hit_ratio,
            PerformanceMetric::ThroughputOpsPerSec => {
                (self.dispatch_overhead_ns > 0.0).then(|| 1e9 / self.dispatch_overhead_ns)
            }
            PerformanceMetric::LatencyP50Ns
            | PerformanceMetric::LatencyP95Ns
            | PerformanceMetric::LatencyP99Ns => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub sample_count: usize,
}

impl StatisticalSummary {
    /// Standard error of the mean.
    #[must_use]
    pub fn sem(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.stddev / (self.sample_count as f64).sqrt()
        }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.ci_lower && value <= self.ci_upper
    }

    /// Coefficient of variation, zero for a zero mean.
    #[must_use]
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean.abs() < f64::EPSILON {
            0.0
        } else {
            self.stddev / self.mean.abs()
        }
    }
}

/// Mean, population stddev, min, max and `mean ± 1.96·sd/√n`.
pub fn summarize(values: &[f64]) -> Result<StatisticalSummary> {
    if values.is_empty() {
        return Err(DcvError::NoSamples {
            context: "statistical summary",
        });
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let half_width = Z_95 * stddev / n.sqrt();
    Ok(StatisticalSummary {
        mean,
        stddev,
        min,
        max,
        ci_lower: mean - half_width,
        ci_upper: mean + half_width,
        sample_count: values.len(),
    })
}

/// Summary of the dispatch overhead across measurements.
pub fn calculate_statistics(measurements: &[PerformanceMeasurement]) -> Result<StatisticalSummary> {
    let values: Vec<f64> = measurements.iter().map(|m| m.dispatch_overhead_ns).collect();
    summarize(&values)
}

/// Summary of any per-measurement metric.
pub fn metric_statistics(
    measurements: &[PerformanceMeasurement],
    metric: PerformanceMetric,
) -> Result<StatisticalSummary> {
    let values: Vec<f64> = measurements.iter().filter_map(|m| m.value(metric)).collect();
    summarize(&values)
}

/// Two-sided critical value for confidence `c` (0.95 → 1.96).
#[must_use]
pub fn z_for_confidence(c: f64) -> f64 {
    if (c - 0.95).abs() < 1e-9 {
        return Z_95;
    }
    let c = c.clamp(1e-6, 1.0 - 1e-9);
    inverse_normal_cdf(f64::midpoint(1.0, c))
}

/// Acklam's rational approximation of the standard normal quantile.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const LOW: f64 = 0.024_25;

    if p < LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// Nearest-rank percentile of an ascending slice.
#[must_use]
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

/// Latency percentiles and derived rates over a sample set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub samples: usize,
    pub mean_ns: f64,
    pub p50_ns: f64,
    pub p95_ns: f64,
    pub p99_ns: f64,
    pub throughput_ops_per_sec: f64,
    pub cache_hit_ratio: Option<f64>,
}

impl MetricSnapshot {
    pub fn from_measurements(measurements: &[PerformanceMeasurement]) -> Result<Self> {
        let summary = calculate_statistics(measurements)?;
        let mut sorted: Vec<f64> = measurements.iter().map(|m| m.dispatch_overhead_ns).collect();
        sorted.sort_by(f64::total_cmp);
        let pick = |pct| percentile(&sorted, pct).unwrap_or(summary.mean);
        let ratios: Vec<f64> = measurements.iter().filter_map(|m| m.cache_hit_ratio).collect();
        let cache_hit_ratio = (!ratios.is_empty()).then(|| ratios.iter().sum::<f64>() / ratios.len() as f64);
        Ok(Self {
            samples: measurements.len(),
            mean_ns: summary.mean,
            p50_ns: pick(50.0),
            p95_ns: pick(95.0),
            p99_ns: pick(99.0),
            throughput_ops_per_sec: if summary.mean > 0.0 { 1e9 / summary.mean } else { 0.0 },
            cache_hit_ratio,
        })
    }

    /// Snapshot-level value of `metric`, for metrics that only exist in aggregate.
    #[must_use]
    pub fn value(&self, metric: PerformanceMetric) -> Option<f64> {
        match metric {
            PerformanceMetric::LatencyP50Ns => Some(self.p50_ns),
            PerformanceMetric::LatencyP95Ns => Some(self.p95_ns),
            PerformanceMetric::LatencyP99Ns => Some(self.p99_ns),
            PerformanceMetric::ThroughputOpsPerSec => Some(self.throughput_ops_per_sec),
            PerformanceMetric::CacheHitRatio => self.cache_hit_ratio,
            PerformanceMetric::DispatchOverheadNs => Some(self.mean_ns),
            PerformanceMetric::MemoryUsageBytes
            | PerformanceMetric::CodeSizeBytes
            | PerformanceMetric::CacheMisses
            | PerformanceMetric::InstructionCount => None,
        }
    }
}
