//! Dispatch probes and the warmup-then-measure benchmark loop.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::time::Instant;

use chrono::Utc;

use crate::contract::model::MeasurementConfig;
use crate::core::errors::{DcvError, Result};
use crate::perf::stats::PerformanceMeasurement;

/// Memory deltas at or below zero are reported as this many bytes.
pub const MEMORY_FLOOR_BYTES: u64 = 1;

/// Bytes per cache line, used for the miss proxy.
const CACHE_LINE_BYTES: u64 = 64;

/// Nominal instructions retired per nanosecond, used for the instruction proxy.
const NOMINAL_INSTRUCTIONS_PER_NS: f64 = 3.0;

/// Hardware-style counters a probe may report itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCounters {
    pub cache_misses: u64,
    pub cache_accesses: u64,
    pub instructions: u64,
}

/// One invocation of the dispatch path under test.
pub trait DispatchProbe: Send {
    /// Run the dispatch once. An error means the probe itself broke.
    fn dispatch(&mut self) -> std::result::Result<(), String>;

    fn code_size_bytes(&self) -> Option<u64> {
        None
    }

    /// Counters accumulated since the last call, if the probe has them.
    fn take_counters(&mut self) -> Option<ProbeCounters> {
        None
    }
}

/// Probe backed by a closure.
pub struct FnProbe<F> {
    f: F,
    code_size: Option<u64>,
}

impl<F> FnProbe<F>
where
    F: FnMut() -> std::result::Result<(), String> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f, code_size: None }
    }

    #[must_use]
    pub fn with_code_size(mut self, bytes: u64) -> Self {
        self.code_size = Some(bytes);
        self
    }
}

impl<F> DispatchProbe for FnProbe<F>
where
    F: FnMut() -> std::result::Result<(), String> + Send,
{
    fn dispatch(&mut self) -> std::result::Result<(), String> {
        (self.f)()
    }

    fn code_size_bytes(&self) -> Option<u64> {
        self.code_size
    }
}

fn probe_failed(benchmark: &str, details: String) -> DcvError {
    DcvError::ProbeFailed {
        benchmark: benchmark.to_string(),
        details,
    }
}

fn run_iterations(benchmark: &str, probe: &mut dyn DispatchProbe, iterations: u32) -> Result<()> {
    for _ in 0..iterations {
        probe
            .dispatch()
            .map_err(|details| probe_failed(benchmark, details))?;
    }
    Ok(())
}

/// Warmup (discarded) then a timed measurement phase.
pub fn execute_benchmark(
    name: &str,
    probe: &mut dyn DispatchProbe,
    config: &MeasurementConfig,
) -> Result<PerformanceMeasurement> {
    run_iterations(name, probe, config.warmup_iterations)?;
    measure(name, probe, config)
}

fn measure(
    name: &str,
    probe: &mut dyn DispatchProbe,
    config: &MeasurementConfig,
) -> Result<PerformanceMeasurement> {
    let iterations = config.measurement_iterations.max(1);
    let _ = probe.take_counters();

    let rss_before = read_rss_bytes();
    let start = Instant::now();
    run_iterations(name, probe, iterations)?;
    let elapsed = start.elapsed();
    let rss_after = read_rss_bytes();

    let dispatch_overhead_ns = elapsed.as_nanos() as f64 / f64::from(iterations);
    let memory_usage_bytes = rss_after.saturating_sub(rss_before).max(MEMORY_FLOOR_BYTES);

    let counters = probe.take_counters();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let instruction_proxy = (dispatch_overhead_ns * NOMINAL_INSTRUCTIONS_PER_NS).round() as u64;
    let (cache_misses, instruction_count, cache_hit_ratio) = match counters {
        Some(c) => {
            let ratio = (c.cache_accesses > 0).then(|| {
                1.0 - (c.cache_misses.min(c.cache_accesses) as f64 / c.cache_accesses as f64)
            });
            (c.cache_misses, c.instructions, ratio)
        }
        None => (memory_usage_bytes / CACHE_LINE_BYTES, instruction_proxy, None),
    };

    Ok(PerformanceMeasurement {
        dispatch_overhead_ns,
        memory_usage_bytes,
        code_size_bytes: probe.code_size_bytes().unwrap_or(0),
        cache_misses,
        instruction_count,
        cache_hit_ratio,
        timestamp: Utc::now(),
    })
}

/// `samples` measurements sharing one warmup phase.
pub fn collect_samples(
    name: &str,
    probe: &mut dyn DispatchProbe,
    config: &MeasurementConfig,
    samples: usize,
) -> Result<Vec<PerformanceMeasurement>> {
    if samples == 0 {
        return Err(DcvError::NoSamples {
            context: "benchmark sample collection",
        });
    }
    run_iterations(name, probe, config.warmup_iterations)?;
    (0..samples).map(|_| measure(name, probe, config)).collect()
}

// ──────────────────── RSS reading ────────────────────

/// Current process RSS in bytes from /proc/self/status; 0 elsewhere.
fn read_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        read_rss_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg(target_os = "linux")]
fn read_rss_linux() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map_or(0, |kb| kb * 1024)
}
