//! Drives every (case, platform, optimization) unit through its phases.
//!
//! Units are scheduled in dependency waves. Within a wave, pool-eligible units
//! run on a bounded worker pool and the rest run one at a time afterwards.
//! Each unit runs on its own thread so a timeout abandons only that unit.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded, unbounded};
use parking_lot::Mutex;
use rand::Rng;

use crate::contract::model::{
    MeasurementConfig, OptimizationLevel, PerformanceMetric, Platform, TestContract,
};
use crate::contract::parser::parse_contract;
use crate::core::config::{Config, MissingProbePolicy};
use crate::ir::diff::{compare, generate_diff_report};
use crate::ir::dispatch::DispatchFeatures;
use crate::ir::module::IrModule;
use crate::logger::events::{EventLoggerHandle, RunEvent};
use crate::orchestrator::case::{
    CaseState, DiagnosticLevel, FailureKind, PerformanceOutcome, Phase, RunSummary, TestResult,
    TestStatus,
};
use crate::orchestrator::collaborators::{
    CompilationError, GoldenStore, IrGenerator, IrRequest, LifecycleHooks, ProbeFactory,
};
use crate::orchestrator::discovery::DiscoveredCase;
use crate::orchestrator::rules::{GateInputs, evaluate_gates, evaluate_rules};
use crate::perf::baseline::{BaselineKey, BaselineManager, TrendDirection};
use crate::perf::probe::collect_samples;
use crate::perf::stats::{MetricSnapshot, PerformanceMeasurement, calculate_statistics};
use crate::perf::validator::check_expectation;
use crate::registry::catalog::ErrorRegistry;
use crate::registry::codes::ErrorCode;
use crate::registry::report::{
    FailureArtifacts, FailureContext, create_failure_report, format_failure_report,
};

// ──────────────────── options and wiring ────────────────────

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub platforms: Vec<Platform>,
    pub optimizations: Vec<OptimizationLevel>,
    pub max_workers: usize,
    pub parallel: bool,
    /// For contracts without an explicit `timeout:`.
    pub default_timeout: Duration,
    pub retry_backoff: Duration,
    pub approve_missing_golden: bool,
    pub missing_probe: MissingProbePolicy,
    /// For contracts without a `performance-profile:`.
    pub measurement: MeasurementConfig,
    pub sample_count: usize,
    pub compiler_version: String,
    pub config_hash: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            platforms: vec![Platform::host()],
            optimizations: vec![OptimizationLevel::Debug],
            max_workers: 4,
            parallel: true,
            default_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(250),
            approve_missing_golden: false,
            missing_probe: MissingProbePolicy::Skip,
            measurement: MeasurementConfig::standard(),
            sample_count: 30,
            compiler_version: "unknown".to_string(),
            config_hash: String::new(),
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            platforms: config.targets.platforms.clone(),
            optimizations: config.targets.optimization_levels.clone(),
            max_workers: config.orchestrator.max_workers,
            parallel: config.orchestrator.parallel,
            default_timeout: Duration::from_secs(config.orchestrator.default_timeout_secs),
            retry_backoff: Duration::from_millis(config.orchestrator.retry_backoff_ms),
            approve_missing_golden: config.orchestrator.approve_missing_golden,
            missing_probe: config.orchestrator.missing_probe,
            measurement: MeasurementConfig {
                warmup_iterations: config.performance.warmup_iterations,
                measurement_iterations: config.performance.measurement_iterations,
                requires_isolation: false,
            },
            sample_count: config.performance.sample_count,
            compiler_version: config.compiler.version.clone(),
            config_hash: config.stable_hash().unwrap_or_default(),
        }
    }
}

/// External systems the orchestrator calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn IrGenerator>,
    pub goldens: Arc<dyn GoldenStore>,
    pub probes: Arc<dyn ProbeFactory>,
    pub hooks: Arc<dyn LifecycleHooks>,
}

/// Ordered results of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub results: Vec<TestResult>,
    pub summary: RunSummary,
    pub duration: Duration,
}

/// State shared with unit threads, which may outlive a timed-out wait.
struct Shared {
    options: RunOptions,
    collaborators: Collaborators,
    baselines: Arc<BaselineManager>,
    logger: EventLoggerHandle,
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    registry: Arc<ErrorRegistry>,
}

#[derive(Debug, Clone)]
struct Unit {
    contract: Arc<TestContract>,
    path: PathBuf,
    platform: Platform,
    optimization: OptimizationLevel,
}

type UnitKey = (String, Platform, OptimizationLevel);

impl Unit {
    fn key(&self) -> UnitKey {
        (self.contract.name.clone(), self.platform, self.optimization)
    }

    fn timeout(&self, default: Duration) -> Duration {
        if self.contract.execution.timeout_declared {
            self.contract.execution.timeout
        } else {
            default
        }
    }
}

// ──────────────────── cancellation ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Running,
    Committed,
    Cancelled,
}

/// Arbitrates between a timed-out wait and a unit about to persist results.
#[derive(Debug)]
struct CancelToken {
    state: Mutex<TokenState>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            state: Mutex::new(TokenState::Running),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.state.lock() == TokenState::Cancelled
    }

    /// Unit side: claim the right to persist. False once cancelled.
    fn try_commit(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TokenState::Running => {
                *state = TokenState::Committed;
                true
            }
            TokenState::Committed => true,
            TokenState::Cancelled => false,
        }
    }

    /// Waiter side: false if the unit already committed and must be awaited.
    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TokenState::Running => {
                *state = TokenState::Cancelled;
                true
            }
            TokenState::Cancelled => true,
            TokenState::Committed => false,
        }
    }
}

// ──────────────────── orchestrator ────────────────────

impl Orchestrator {
    #[must_use]
    pub fn new(
        options: RunOptions,
        collaborators: Collaborators,
        registry: Arc<ErrorRegistry>,
        baselines: Arc<BaselineManager>,
        logger: EventLoggerHandle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                collaborators,
                baselines,
                logger,
            }),
            registry,
        }
    }

    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.shared.options
    }

    /// Parse, schedule and execute `cases` over the configured target matrix.
    pub fn run(&self, cases: &[DiscoveredCase]) -> RunReport {
        let started = Instant::now();
        let run_id = new_run_id();
        let options = &self.shared.options;

        let mut done: Vec<TestResult> = Vec::new();
        let mut outcome: HashMap<UnitKey, TestStatus> = HashMap::new();
        let mut parse_failed: HashSet<String> = HashSet::new();
        let mut pending: Vec<Unit> = Vec::new();
        let known: HashSet<&str> = cases.iter().map(|c| c.name.as_str()).collect();

        for case in cases {
            let contract = match parse_contract(&case.name, &case.source) {
                Ok(contract) => Arc::new(contract),
                Err(err) => {
                    let mut result = TestResult::new(&case.name, None, None);
                    result.fail(
                        Phase::Loading,
                        FailureKind::Metadata,
                        err.code(),
                        format!("{}: {err}", case.path.display()),
                    );
                    parse_failed.insert(case.name.clone());
                    done.push(result);
                    continue;
                }
            };
            for &platform in &options.platforms {
                for &optimization in &options.optimizations {
                    if contract.applies_to(platform, optimization) {
                        pending.push(Unit {
                            contract: Arc::clone(&contract),
                            path: case.path.clone(),
                            platform,
                            optimization,
                        });
                    } else {
                        let mut result =
                            TestResult::new(&contract.name, Some(platform), Some(optimization));
                        result.enter(CaseState::Loaded);
                        result.enter(CaseState::Skipped);
                        result.status = TestStatus::Skipped;
                        result.diagnose(
                            Phase::Loading,
                            DiagnosticLevel::Info,
                            None,
                            "contract does not apply to this target",
                        );
                        outcome.insert((contract.name.clone(), platform, optimization), TestStatus::Skipped);
                        done.push(result);
                    }
                }
            }
        }

        self.shared.logger.send(RunEvent::RunStarted {
            run_id: run_id.clone(),
            config_hash: options.config_hash.clone(),
            units: pending.len() + done.len(),
        });

        // Missing required dependencies fail up front.
        pending.retain(|unit| {
            let missing: Vec<&str> = unit
                .contract
                .dependencies
                .iter()
                .filter(|d| d.required && !known.contains(d.test.as_str()))
                .map(|d| d.test.as_str())
                .collect();
            if missing.is_empty() {
                return true;
            }
            let mut result = TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization));
            result.enter(CaseState::Loaded);
            result.fail(
                Phase::Loading,
                FailureKind::Dependency,
                ErrorCode::DependencyUnsatisfied,
                format!("required dependency not found: {}", missing.join(", ")),
            );
            outcome.insert(unit.key(), TestStatus::Failed);
            done.push(result);
            false
        });

        while !pending.is_empty() {
            let pending_keys: HashSet<UnitKey> = pending.iter().map(Unit::key).collect();
            let (ready, blocked): (Vec<Unit>, Vec<Unit>) = pending.into_iter().partition(|unit| {
                unit.contract.dependencies.iter().filter(|d| d.required).all(|d| {
                    !pending_keys.contains(&(d.test.clone(), unit.platform, unit.optimization))
                })
            });
            pending = blocked;

            if ready.is_empty() {
                for unit in pending.drain(..) {
                    let mut result =
                        TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization));
                    result.enter(CaseState::Loaded);
                    result.fail(
                        Phase::Loading,
                        FailureKind::Dependency,
                        ErrorCode::DependencyUnsatisfied,
                        "dependency cycle among required dependencies",
                    );
                    outcome.insert(unit.key(), TestStatus::Failed);
                    done.push(result);
                }
                break;
            }

            let mut runnable = Vec::new();
            for unit in ready {
                let unmet: Vec<String> = unit
                    .contract
                    .dependencies
                    .iter()
                    .filter(|d| d.required)
                    .filter(|d| {
                        parse_failed.contains(&d.test)
                            || outcome
                                .get(&(d.test.clone(), unit.platform, unit.optimization))
                                .is_none_or(|status| *status != TestStatus::Passed)
                    })
                    .map(|d| d.test.clone())
                    .collect();
                if unmet.is_empty() {
                    runnable.push(unit);
                    continue;
                }
                let mut result =
                    TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization));
                result.enter(CaseState::Loaded);
                result.enter(CaseState::Skipped);
                result.status = TestStatus::Skipped;
                result.diagnose(
                    Phase::Loading,
                    DiagnosticLevel::Warning,
                    Some(ErrorCode::DependencyUnsatisfied),
                    format!("skipped: required dependency did not pass: {}", unmet.join(", ")),
                );
                outcome.insert(unit.key(), TestStatus::Skipped);
                done.push(result);
            }

            let (pooled, serial): (Vec<Unit>, Vec<Unit>) = runnable
                .into_iter()
                .partition(|u| options.parallel && u.contract.execution.runs_in_pool());
            let mut wave = self.run_pool(pooled);
            wave.extend(serial.into_iter().map(|unit| self.run_guarded(unit)));
            for result in wave {
                if let (Some(p), Some(o)) = (result.platform, result.optimization) {
                    outcome.insert((result.test.clone(), p, o), result.status);
                }
                done.push(result);
            }
        }

        for result in &mut done {
            self.finalize(result);
        }
        done.sort_by_key(TestResult::sort_key);

        let summary = RunSummary::from_results(&done);
        let duration = started.elapsed();
        self.shared.logger.send(RunEvent::RunCompleted {
            run_id: run_id.clone(),
            counts: summary.counts(),
            duration_ms: millis(duration),
        });

        RunReport {
            run_id,
            results: done,
            summary,
            duration,
        }
    }

    fn run_pool(&self, units: Vec<Unit>) -> Vec<TestResult> {
        if units.is_empty() {
            return Vec::new();
        }
        let workers = self.shared.options.max_workers.clamp(1, units.len());
        let (job_tx, job_rx) = unbounded::<Unit>();
        let (res_tx, res_rx) = unbounded::<TestResult>();
        for unit in units {
            let _ = job_tx.send(unit);
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                scope.spawn(move || {
                    while let Ok(unit) = job_rx.recv() {
                        let _ = res_tx.send(self.run_guarded(unit));
                    }
                });
            }
        });
        drop(res_tx);
        res_rx.iter().collect()
    }

    /// Run one unit on its own thread and enforce its timeout.
    fn run_guarded(&self, unit: Unit) -> TestResult {
        let timeout = unit.timeout(self.shared.options.default_timeout);
        let token = Arc::new(CancelToken::new());
        let (tx, rx) = bounded::<TestResult>(1);
        let started = Instant::now();

        self.shared.logger.send(RunEvent::CaseStarted {
            case: TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization))
                .case_ref(),
        });

        let spawned = {
            let shared = Arc::clone(&self.shared);
            let token = Arc::clone(&token);
            let unit = unit.clone();
            thread::Builder::new()
                .name(format!("dcv-case-{}", unit.contract.name))
                .spawn(move || {
                    let result = execute_unit(&shared, &unit, &token);
                    let _ = tx.send(result);
                })
        };

        let mut result = match spawned {
            Err(err) => {
                let mut r = TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization));
                r.framework(
                    Phase::Loading,
                    ErrorCode::InternalError,
                    format!("failed to spawn case thread: {err}"),
                );
                r.status = TestStatus::FrameworkError;
                r
            }
            Ok(_) => match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Disconnected) => worker_died(&unit),
                Err(RecvTimeoutError::Timeout) => {
                    if token.cancel() {
                        timed_out(&unit, timeout)
                    } else {
                        // Already persisting; its result stands.
                        rx.recv().unwrap_or_else(|_| worker_died(&unit))
                    }
                }
            },
        };
        result.duration = started.elapsed();
        result
    }

    /// Attach the failure report, close the trail, and emit completion events.
    fn finalize(&self, result: &mut TestResult) {
        if result.state() != CaseState::Aggregated {
            if result.status == TestStatus::Passed {
                result.status = result.derive_status();
            }
            result.enter(CaseState::Aggregated);
        }

        if let Some(code) = result.primary_code() {
            let (report_code, rendered) = self.render_report(result, code);
            self.shared.logger.send(RunEvent::FailureReport {
                case: result.case_ref(),
                code: report_code.to_string(),
                rendered: rendered.clone(),
            });
            result.rendered_report = Some(rendered);
        }

        let case = result.case_ref();
        for diag in &result.diagnostics {
            self.shared.logger.send(RunEvent::Diagnostic {
                case: case.clone(),
                phase: diag.phase.as_str().to_string(),
                level: diag.level.as_str().to_string(),
                code: diag.code.map(|c| c.to_string()),
                message: diag.message.clone(),
            });
        }
        self.shared.logger.send(RunEvent::CaseCompleted {
            case,
            status: result.status.as_str().to_string(),
            error_code: result.primary_code().map(|c| c.to_string()),
            duration_ms: millis(result.duration),
        });
    }

    fn render_report(&self, result: &mut TestResult, code: ErrorCode) -> (ErrorCode, String) {
        let mut context = FailureContext::new(&result.test).phase(
            result
                .diagnostics
                .iter()
                .rev()
                .find(|d| d.level >= DiagnosticLevel::Error || d.code == Some(code))
                .map_or(Phase::ResultAggregation, |d| d.phase)
                .as_str(),
        );
        context.platform = result.platform;
        context.optimization = result.optimization;
        let message = report_message(result);
        let artifacts = report_artifacts(result);

        match create_failure_report(&self.registry, code, context.clone(), &message, artifacts.clone()) {
            Ok(report) => {
                let rendered = format_failure_report(&report);
                result.failure_report = Some(report);
                (code, rendered)
            }
            Err(err) => {
                result.framework(Phase::ResultAggregation, ErrorCode::UnregisteredErrorCode, err.to_string());
                result.status = TestStatus::FrameworkError;
                let fallback = ErrorCode::UnregisteredErrorCode;
                match create_failure_report(
                    &self.registry,
                    fallback,
                    context,
                    format!("{err}; original failure: {message}"),
                    artifacts,
                ) {
                    Ok(report) => {
                        let rendered = format_failure_report(&report);
                        result.failure_report = Some(report);
                        (fallback, rendered)
                    }
                    Err(_) => (
                        fallback,
                        format!("[{fallback}] {err}\n  test: {}\n  message: {message}\n", result.label()),
                    ),
                }
            }
        }
    }
}

fn timed_out(unit: &Unit, timeout: Duration) -> TestResult {
    let mut r = TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization));
    r.enter(CaseState::Loaded);
    r.diagnose(
        Phase::ResultAggregation,
        DiagnosticLevel::Critical,
        Some(ErrorCode::TestTimeout),
        format!("timed out after {:.1}s; partial results discarded", timeout.as_secs_f64()),
    );
    r.status = TestStatus::Timeout;
    r
}

fn worker_died(unit: &Unit) -> TestResult {
    let mut r = TestResult::new(&unit.contract.name, Some(unit.platform), Some(unit.optimization));
    r.enter(CaseState::Loaded);
    r.framework(
        Phase::ResultAggregation,
        ErrorCode::WorkerPanicked,
        "case thread exited without a result",
    );
    r.status = TestStatus::FrameworkError;
    r
}

fn report_message(result: &TestResult) -> String {
    match result.status {
        TestStatus::Timeout | TestStatus::ApprovalRequired => result
            .diagnostics
            .iter()
            .rev()
            .find(|d| d.level >= DiagnosticLevel::Warning)
            .map_or_else(|| result.status.to_string(), |d| d.message.clone()),
        TestStatus::FrameworkError => result
            .framework_error
            .as_ref()
            .map_or_else(|| "framework error".to_string(), |(_, m)| m.clone()),
        _ => {
            let messages: Vec<&str> = result.failures.iter().map(|f| f.message.as_str()).collect();
            if messages.is_empty() {
                result.status.to_string()
            } else {
                messages.join("; ")
            }
        }
    }
}

fn report_artifacts(result: &TestResult) -> FailureArtifacts {
    let mut artifacts = FailureArtifacts {
        diff_summary: result.diff_report.clone(),
        contract_violations: result
            .failures
            .iter()
            .map(|f| format!("[{}] {}", f.code, f.message))
            .collect(),
        ..FailureArtifacts::default()
    };
    if let Some(perf) = &result.performance {
        if let Some(snapshot) = &perf.snapshot {
            artifacts.performance_metrics.insert("mean_ns".to_string(), snapshot.mean_ns);
            artifacts.performance_metrics.insert("p95_ns".to_string(), snapshot.p95_ns);
            artifacts.performance_metrics.insert("p99_ns".to_string(), snapshot.p99_ns);
        }
        if let Some(v) = &perf.validation
            && let Some(base) = v.baseline_mean
        {
            artifacts.performance_metrics.insert("baseline_mean_ns".to_string(), base);
            artifacts
                .performance_metrics
                .insert("change_pct".to_string(), v.percentage_change * 100.0);
        }
    }
    if let Some(comparison) = &result.comparison {
        artifacts
            .debug_artifacts
            .push(format!("expected_sha256={}", comparison.summary.expected_sha256));
        artifacts
            .debug_artifacts
            .push(format!("actual_sha256={}", comparison.summary.actual_sha256));
    }
    if let Some((_, message)) = &result.framework_error {
        artifacts.stack_trace = Some(message.clone());
    }
    artifacts
}

fn new_run_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("{}-{suffix:08x}", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ──────────────────── unit execution ────────────────────

fn execute_unit(shared: &Shared, unit: &Unit, token: &CancelToken) -> TestResult {
    let contract = &unit.contract;
    let mut result = TestResult::new(&contract.name, Some(unit.platform), Some(unit.optimization));
    result.enter(CaseState::Loaded);

    let hooks = &shared.collaborators.hooks;
    let execution = &contract.execution;
    if !execution.setup.is_empty()
        && let Err(err) = hooks.setup(&contract.name, &execution.setup, &execution.env)
    {
        result.framework(
            Phase::Loading,
            ErrorCode::LifecycleHookFailed,
            format!("setup failed: {err}"),
        );
    } else {
        run_phases(shared, unit, token, &mut result);
    }

    if !execution.cleanup.is_empty()
        && let Err(err) = hooks.cleanup(&contract.name, &execution.cleanup, &execution.env)
    {
        result.diagnose(
            Phase::ResultAggregation,
            DiagnosticLevel::Warning,
            Some(ErrorCode::LifecycleHookFailed),
            format!("cleanup failed: {err}"),
        );
    }

    result.status = result.derive_status();
    result.enter(CaseState::Aggregated);
    result
}

fn run_phases(shared: &Shared, unit: &Unit, token: &CancelToken, result: &mut TestResult) {
    let Some(ir) = generate_ir(shared, unit, token, result) else {
        return;
    };
    result.enter(CaseState::IrGenerated);

    let contract = &unit.contract;
    let module = IrModule::parse(&ir);
    let features = DispatchFeatures::detect(&module);
    if !module.is_clean() {
        result.diagnose(
            Phase::IrGeneration,
            DiagnosticLevel::Warning,
            Some(ErrorCode::UnparseableIr),
            format!("{} IR fragment(s) could not be parsed", module.issues.len()),
        );
    }

    if let Some(expected) = contract.expected_strategy
        && !features.satisfies(expected)
    {
        match contract
            .fallback_strategies
            .iter()
            .find(|s| features.satisfies(**s))
        {
            Some(fallback) => result.diagnose(
                Phase::IrGeneration,
                DiagnosticLevel::Warning,
                Some(ErrorCode::DispatchStrategyMismatch),
                format!("expected {expected}, accepted fallback {fallback}"),
            ),
            None => {
                let detected: Vec<&str> = features
                    .detected_strategies()
                    .into_iter()
                    .map(|s| s.as_str())
                    .collect();
                result.fail(
                    Phase::IrGeneration,
                    FailureKind::IrStructure,
                    ErrorCode::DispatchStrategyMismatch,
                    format!(
                        "expected {expected}; consistent with [{}]; {}",
                        detected.join(", "),
                        features.describe()
                    ),
                );
            }
        }
    }

    for violation in evaluate_rules(&contract.validation_rules, &ir, &module, &features) {
        result.fail(
            Phase::IrGeneration,
            FailureKind::Rule,
            ErrorCode::ValidationRuleFailed,
            violation,
        );
    }

    if token.is_cancelled() {
        return;
    }

    let goldens = &shared.collaborators.goldens;
    // Written only once the unit commits, together with any baseline.
    let mut approved_golden = false;
    let golden_ok = match goldens.load(&contract.name, unit.platform, unit.optimization) {
        Err(err) => {
            result.framework(Phase::GoldenComparison, err.code(), err.to_string());
            return;
        }
        Ok(None) if shared.options.approve_missing_golden => {
            approved_golden = true;
            true
        }
        Ok(None) => {
            result.missing_golden = true;
            result.diagnose(
                Phase::GoldenComparison,
                DiagnosticLevel::Warning,
                Some(ErrorCode::MissingGoldenReference),
                "no golden reference; review the generated IR and approve it",
            );
            false
        }
        Ok(Some(golden)) => {
            let comparison = compare(&golden, &ir);
            result.enter(CaseState::Compared);
            let equivalent = comparison.equivalent;
            if !equivalent {
                let s = &comparison.summary;
                result.fail(
                    Phase::GoldenComparison,
                    FailureKind::Golden,
                    ErrorCode::GoldenMismatch,
                    format!(
                        "generated IR differs from golden: {} critical, {} breaking, {} semantic, {} cosmetic",
                        s.critical, s.breaking, s.semantic, s.cosmetic
                    ),
                );
                result.diff_report = Some(generate_diff_report(&comparison));
            } else if comparison.summary.total_differences > 0 {
                result.diagnose(
                    Phase::GoldenComparison,
                    DiagnosticLevel::Info,
                    None,
                    format!(
                        "{} non-breaking difference(s) from golden",
                        comparison.summary.total_differences
                    ),
                );
            }
            result.comparison = Some(comparison);
            equivalent
        }
    };

    if golden_ok && result.failures.is_empty() && contract.has_performance_expectations() {
        if token.is_cancelled() {
            return;
        }
        validate_performance(shared, unit, token, result);
    }

    let perf = result.performance.as_ref();
    let inputs = GateInputs {
        comparison: result.comparison.as_ref(),
        performance: perf.and_then(|p| p.validation.as_ref()),
        sample_count: perf.map_or(0, |p| p.sample_count),
    };
    let gate_failures = evaluate_gates(&contract.quality_gates, &inputs);
    for failure in gate_failures {
        result.fail(
            Phase::ResultAggregation,
            FailureKind::QualityGate,
            ErrorCode::QualityGateFailed,
            failure,
        );
    }

    if approved_golden && token.try_commit() {
        match goldens.store(&contract.name, unit.platform, unit.optimization, &ir) {
            Ok(()) => result.diagnose(
                Phase::GoldenComparison,
                DiagnosticLevel::Info,
                Some(ErrorCode::MissingGoldenReference),
                "golden reference approved from generated IR",
            ),
            Err(err) => result.framework(Phase::GoldenComparison, err.code(), err.to_string()),
        }
    }
}

fn generate_ir(
    shared: &Shared,
    unit: &Unit,
    token: &CancelToken,
    result: &mut TestResult,
) -> Option<String> {
    let contract = &unit.contract;
    let request = IrRequest {
        test: &contract.name,
        source: &unit.path,
        platform: unit.platform,
        optimization: unit.optimization,
        env: &contract.execution.env,
    };
    let attempts = contract.execution.max_retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if token.is_cancelled() {
            return None;
        }
        let outcome = shared
            .collaborators
            .generator
            .generate(&request)
            .and_then(|ir| {
                if ir.trim().is_empty() {
                    Err(CompilationError::EmptyOutput)
                } else {
                    Ok(ir)
                }
            });
        match outcome {
            Ok(ir) => return Some(ir),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = backoff(shared.options.retry_backoff, attempt);
                result.diagnose(
                    Phase::IrGeneration,
                    DiagnosticLevel::Info,
                    Some(err.code()),
                    format!("attempt {attempt}/{attempts} failed ({err}); retrying in {}ms", delay.as_millis()),
                );
                thread::sleep(delay);
            }
            Err(err) => {
                result.enter(CaseState::CompilationFailed);
                result.fail(
                    Phase::IrGeneration,
                    FailureKind::Compilation,
                    err.code(),
                    format!("IR generation failed after {attempt} attempt(s): {err}"),
                );
                return None;
            }
        }
    }
}

/// Linear backoff with up to 50% random jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let scaled = base.saturating_mul(attempt);
    let jitter_cap = u64::try_from(scaled.as_millis() / 2).unwrap_or(u64::MAX);
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_cap)
    };
    scaled + Duration::from_millis(jitter)
}

fn validate_performance(shared: &Shared, unit: &Unit, token: &CancelToken, result: &mut TestResult) {
    let contract = &unit.contract;
    let Some(mut probe) = shared
        .collaborators
        .probes
        .create(&contract.name, unit.platform, unit.optimization)
    else {
        match shared.options.missing_probe {
            MissingProbePolicy::Skip => result.diagnose(
                Phase::PerformanceValidation,
                DiagnosticLevel::Warning,
                Some(ErrorCode::ProbeFailure),
                "performance expectations declared but no dispatch probe is registered; skipped",
            ),
            MissingProbePolicy::Error => result.framework(
                Phase::PerformanceValidation,
                ErrorCode::ProbeFailure,
                "performance expectations declared but no dispatch probe is registered",
            ),
        }
        return;
    };

    let mut measurement = contract
        .measurement_profile
        .unwrap_or(shared.options.measurement);
    if contract.execution.requires_isolation {
        measurement.requires_isolation = true;
    }
    let samples = match collect_samples(
        &contract.name,
        probe.as_mut(),
        &measurement,
        shared.options.sample_count,
    ) {
        Ok(samples) => samples,
        Err(err) => {
            result.framework(Phase::PerformanceValidation, err.code(), err.to_string());
            return;
        }
    };

    let mut outcome = PerformanceOutcome {
        sample_count: samples.len(),
        snapshot: MetricSnapshot::from_measurements(&samples).ok(),
        ..PerformanceOutcome::default()
    };

    for expectation in &contract.performance {
        let series = metric_series(&samples, outcome.snapshot.as_ref(), expectation.metric);
        match check_expectation(expectation, &series) {
            Some(check) => {
                if !check.passed {
                    result.fail(
                        Phase::PerformanceValidation,
                        FailureKind::Performance,
                        ErrorCode::ThresholdViolation,
                        format!(
                            "{}: observed {:.3}, compared bound {:.3} over {} samples",
                            check.expectation, check.observed, check.bound_used, check.sample_count
                        ),
                    );
                }
                outcome.expectations.push(check);
            }
            None => result.fail(
                Phase::PerformanceValidation,
                FailureKind::Performance,
                ErrorCode::ThresholdViolation,
                format!("{}: metric was not measured", expectation.describe()),
            ),
        }
    }

    let summary = match calculate_statistics(&samples) {
        Ok(summary) => summary,
        Err(err) => {
            result.framework(Phase::PerformanceValidation, err.code(), err.to_string());
            return;
        }
    };
    let key = BaselineKey::new(&contract.name, unit.platform, unit.optimization);
    let analysis = match shared.baselines.analyze_regression(&key, &summary) {
        Ok(analysis) => analysis,
        Err(err) => {
            result.framework(Phase::PerformanceValidation, err.code(), err.to_string());
            return;
        }
    };
    if !analysis.validation.passed {
        result.fail(
            Phase::PerformanceValidation,
            FailureKind::Performance,
            ErrorCode::PerformanceRegression,
            analysis.validation.message.clone(),
        );
    } else if analysis.validation.is_significant_improvement() {
        result.diagnose(
            Phase::PerformanceValidation,
            DiagnosticLevel::Info,
            None,
            analysis.validation.message.clone(),
        );
    }
    if let Some(trend) = &analysis.trend
        && trend.direction == TrendDirection::HighlyVolatile
    {
        result.diagnose(
            Phase::PerformanceValidation,
            DiagnosticLevel::Warning,
            Some(ErrorCode::HighVolatility),
            format!(
                "coefficient of variation {:.3} over last {} values; trend confidence {:.2}",
                trend.coefficient_of_variation, trend.window, trend.confidence
            ),
        );
    }
    outcome.validation = Some(analysis.validation);
    outcome.trend = analysis.trend;

    if result.failures.is_empty() {
        promote_baseline(shared, &key, samples, token, result, &mut outcome);
    }

    result.performance = Some(outcome);
    result.enter(CaseState::PerformanceValidated);
}

fn promote_baseline(
    shared: &Shared,
    key: &BaselineKey,
    samples: Vec<PerformanceMeasurement>,
    token: &CancelToken,
    result: &mut TestResult,
    outcome: &mut PerformanceOutcome,
) {
    let update = match shared.baselines.store_baseline_version_if(
        key,
        samples,
        &shared.options.compiler_version,
        || token.try_commit(),
    ) {
        Ok(update) => update,
        Err(err) => {
            result.framework(Phase::PerformanceValidation, err.code(), err.to_string());
            return;
        }
    };
    let case = result.case_ref();
    match (update.updated, update.new_version) {
        (true, Some(version)) => {
            result.diagnose(
                Phase::PerformanceValidation,
                DiagnosticLevel::Info,
                None,
                format!("baseline v{version} recorded: {}", update.justification),
            );
            shared.logger.send(RunEvent::BaselinePromoted {
                case,
                version,
                change: update.change_percentage,
                justification: update.justification.clone(),
            });
        }
        _ if update.regression_prevented => {
            result.diagnose(
                Phase::PerformanceValidation,
                DiagnosticLevel::Warning,
                Some(ErrorCode::BaselineRejected),
                update.justification.clone(),
            );
            shared.logger.send(RunEvent::BaselineRejected {
                case,
                change: update.change_percentage,
                justification: update.justification.clone(),
            });
        }
        _ => {}
    }
    outcome.baseline_update = Some(update);
}

/// Per-sample values for `metric`, or the snapshot's single derived value.
fn metric_series(
    samples: &[PerformanceMeasurement],
    snapshot: Option<&MetricSnapshot>,
    metric: PerformanceMetric,
) -> Vec<f64> {
    let per_sample: Vec<f64> = samples.iter().filter_map(|m| m.value(metric)).collect();
    if !per_sample.is_empty() {
        return per_sample;
    }
    snapshot
        .and_then(|s| s.value(metric))
        .into_iter()
        .collect()
}
