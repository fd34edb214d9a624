//! End-to-end orchestration over canned IR and in-memory stores.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{CHAIN_IR, CannedGenerator, Harness, SWITCH_IR, case, options};
use dispatch_contracts::contract::model::{OptimizationLevel, Platform};
use dispatch_contracts::core::config::MissingProbePolicy;
use dispatch_contracts::logger::events::EventLoggerHandle;
use dispatch_contracts::orchestrator::case::{CaseState, DiagnosticLevel, FailureKind, TestStatus};
use dispatch_contracts::orchestrator::collaborators::{GoldenStore, ShellHooks};
use dispatch_contracts::orchestrator::runner::{Collaborators, Orchestrator};
use dispatch_contracts::perf::baseline::{BaselineKey, BaselineManager, BaselinePolicy};
use dispatch_contracts::perf::probe::FnProbe;
use dispatch_contracts::perf::store::BaselineStore;
use dispatch_contracts::registry::catalog::ErrorRegistry;
use dispatch_contracts::registry::codes::ErrorCode;

const SWITCH_CONTRACT: &str = "// @expected-strategy: switch_table\nfn dispatch(k) {}\n";

fn generator(pairs: &[(&str, &str)]) -> Arc<CannedGenerator> {
    let mut g = CannedGenerator::default();
    for (test, ir) in pairs {
        g = g.with(test, ir);
    }
    Arc::new(g)
}

#[test]
fn matching_switch_contract_passes() {
    let harness = Harness::new();
    harness.golden("basic", SWITCH_IR);
    let orch = harness.orchestrator(options(), generator(&[("basic", SWITCH_IR)]));

    let report = orch.run(&[case("basic", SWITCH_CONTRACT)]);
    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Passed, "{:?}", result.diagnostics);
    assert!(result.state_trail.contains(&CaseState::IrGenerated));
    assert!(result.state_trail.contains(&CaseState::Compared));
    assert_eq!(result.state(), CaseState::Aggregated);
    assert!(result.rendered_report.is_none());
    assert!(report.summary.is_clean());
    assert_eq!(report.summary.exit_code(), 0);
}

#[test]
fn switch_expectation_without_switch_is_structure_failure() {
    let harness = Harness::new();
    harness.golden("chain", CHAIN_IR);
    let orch = harness.orchestrator(options(), generator(&[("chain", CHAIN_IR)]));

    let report = orch.run(&[case("chain", SWITCH_CONTRACT)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.failures[0].kind, FailureKind::IrStructure);
    assert_eq!(result.primary_code(), Some(ErrorCode::DispatchStrategyMismatch));
    let rendered = result.rendered_report.as_deref().unwrap();
    assert!(rendered.contains("DCV-2003"), "{rendered}");
    assert_eq!(report.summary.exit_code(), 1);
}

#[test]
fn satisfied_fallback_downgrades_to_warning() {
    let harness = Harness::new();
    harness.golden("chain", CHAIN_IR);
    let orch = harness.orchestrator(options(), generator(&[("chain", CHAIN_IR)]));
    let source = "// @expected-strategy: switch_table\n// @fallback-strategy: linear_search\n";

    let report = orch.run(&[case("chain", source)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Passed);
    assert!(result.diagnostics.iter().any(|d| {
        d.level == DiagnosticLevel::Warning && d.code == Some(ErrorCode::DispatchStrategyMismatch)
    }));
}

#[test]
fn missing_golden_requires_approval_unless_approved() {
    let harness = Harness::new();
    let gen_ = generator(&[("fresh", SWITCH_IR)]);

    let report = harness
        .orchestrator(options(), gen_.clone())
        .run(&[case("fresh", SWITCH_CONTRACT)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::ApprovalRequired);
    assert!(result.missing_golden);
    assert!(result.rendered_report.as_deref().unwrap().contains("DCV-2002"));
    assert!(!report.summary.is_clean());

    let mut approving = options();
    approving.approve_missing_golden = true;
    let report = harness
        .orchestrator(approving, gen_)
        .run(&[case("fresh", SWITCH_CONTRACT)]);
    assert_eq!(report.results[0].status, TestStatus::Passed);
    let stored = harness
        .goldens
        .load("fresh", Platform::LinuxX86_64, OptimizationLevel::Debug)
        .unwrap();
    assert_eq!(stored.as_deref(), Some(SWITCH_IR));
}

#[test]
fn golden_mismatch_carries_diff_report() {
    let harness = Harness::new();
    harness.golden("drift", SWITCH_IR);
    let orch = harness.orchestrator(options(), generator(&[("drift", CHAIN_IR)]));

    let report = orch.run(&[case("drift", "// @description: no strategy pinned\n")]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.primary_code(), Some(ErrorCode::GoldenMismatch));
    assert!(result.diff_report.is_some());
    assert!(!result.comparison.as_ref().unwrap().equivalent);
    let report_struct = result.failure_report.as_ref().unwrap();
    assert!(report_struct.artifacts.diff_summary.is_some());
    assert_eq!(report_struct.artifacts.debug_artifacts.len(), 2);
}

#[test]
fn metadata_error_fails_without_target() {
    let harness = Harness::new();
    let orch = harness.orchestrator(options(), generator(&[]));

    let report = orch.run(&[case("broken", "// @expected-strategy: quantum_dispatch\n")]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.platform, None);
    assert_eq!(result.primary_code(), Some(ErrorCode::UnknownDispatchStrategy));
    assert_eq!(result.failures[0].kind, FailureKind::Metadata);
}

#[test]
fn platform_filter_skips_other_targets() {
    let harness = Harness::new();
    let gen_ = generator(&[("wasm_only", SWITCH_IR)]);
    let orch = harness.orchestrator(options(), gen_.clone());

    let report = orch.run(&[case("wasm_only", "// @platforms: wasm32\n")]);
    assert_eq!(report.results[0].status, TestStatus::Skipped);
    assert!(report.summary.is_clean());
    assert_eq!(gen_.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn matrix_expands_per_optimization_level() {
    let harness = Harness::new();
    harness.golden("basic", SWITCH_IR);
    harness.goldens.insert(
        "basic",
        Platform::LinuxX86_64,
        OptimizationLevel::ReleaseFast,
        SWITCH_IR,
    );
    let mut opts = options();
    opts.optimizations = vec![OptimizationLevel::ReleaseFast, OptimizationLevel::Debug];
    let orch = harness.orchestrator(opts, generator(&[("basic", SWITCH_IR)]));

    let report = orch.run(&[case("basic", SWITCH_CONTRACT)]);
    let levels: Vec<_> = report.results.iter().map(|r| r.optimization).collect();
    assert_eq!(
        levels,
        vec![Some(OptimizationLevel::Debug), Some(OptimizationLevel::ReleaseFast)]
    );
    assert_eq!(report.summary.passed, 2);
}

#[test]
fn failed_required_dependency_skips_dependent() {
    let harness = Harness::new();
    harness.golden("base", CHAIN_IR);
    harness.golden("child", SWITCH_IR);
    let gen_ = generator(&[("base", CHAIN_IR), ("child", SWITCH_IR)]);
    let orch = harness.orchestrator(options(), gen_);

    let report = orch.run(&[
        case("child", "// @expected-strategy: switch_table\n// @depends-on: base\n"),
        case("base", SWITCH_CONTRACT),
    ]);
    let base = &report.results[0];
    let child = &report.results[1];
    assert_eq!(base.test, "base");
    assert_eq!(base.status, TestStatus::Failed);
    assert_eq!(child.status, TestStatus::Skipped);
    assert!(child
        .diagnostics
        .iter()
        .any(|d| d.code == Some(ErrorCode::DependencyUnsatisfied)));
}

#[test]
fn unknown_dependencies_fail_or_are_ignored_by_requiredness() {
    let harness = Harness::new();
    harness.golden("needs", SWITCH_IR);
    harness.golden("wants", SWITCH_IR);
    let orch = harness.orchestrator(options(), generator(&[("needs", SWITCH_IR), ("wants", SWITCH_IR)]));

    let report = orch.run(&[
        case("needs", "// @depends-on: ghost\n"),
        case("wants", "// @depends-on: ghost?\n"),
    ]);
    assert_eq!(report.results[0].status, TestStatus::Failed);
    assert_eq!(report.results[0].primary_code(), Some(ErrorCode::DependencyUnsatisfied));
    assert_eq!(report.results[1].status, TestStatus::Passed);
}

#[test]
fn dependency_cycle_fails_both_cases() {
    let harness = Harness::new();
    let orch = harness.orchestrator(options(), generator(&[("a", SWITCH_IR), ("b", SWITCH_IR)]));
    let report = orch.run(&[case("a", "// @depends-on: b\n"), case("b", "// @depends-on: a\n")]);
    assert!(report.results.iter().all(|r| r.status == TestStatus::Failed));
    assert!(report
        .results
        .iter()
        .all(|r| r.primary_code() == Some(ErrorCode::DependencyUnsatisfied)));
}

#[test]
fn slow_case_times_out() {
    let harness = Harness::new();
    let gen_ = Arc::new(
        CannedGenerator::default()
            .with("slow", SWITCH_IR)
            .slow("slow", Duration::from_millis(1_500)),
    );
    let orch = harness.orchestrator(options(), gen_);

    let report = orch.run(&[case("slow", "// @timeout: 100ms\n")]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Timeout);
    assert_eq!(result.primary_code(), Some(ErrorCode::TestTimeout));
    assert!(result.rendered_report.as_deref().unwrap().contains("DCV-5004"));
    assert!(result.duration < Duration::from_millis(1_500));
}

#[test]
fn transient_compiler_failures_are_retried() {
    let harness = Harness::new();
    harness.golden("flaky", SWITCH_IR);
    let gen_ = Arc::new(CannedGenerator::default().with("flaky", SWITCH_IR).flaky("flaky", 2));
    let orch = harness.orchestrator(options(), gen_.clone());

    let report = orch.run(&[case("flaky", "// @max-retries: 2\n")]);
    assert_eq!(report.results[0].status, TestStatus::Passed);
    assert_eq!(gen_.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn exhausted_retries_fail_compilation() {
    let harness = Harness::new();
    let gen_ = Arc::new(CannedGenerator::default().with("flaky", SWITCH_IR).flaky("flaky", 5));
    let orch = harness.orchestrator(options(), gen_.clone());

    let report = orch.run(&[case("flaky", "// @max-retries: 1\n")]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.primary_code(), Some(ErrorCode::CompilerInvocationFailed));
    assert!(result.state_trail.contains(&CaseState::CompilationFailed));
    assert_eq!(gen_.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn met_performance_expectation_promotes_baseline() {
    let mut harness = Harness::new();
    harness.golden("fast", SWITCH_IR);
    harness
        .probes
        .register("fast", |_, _| Box::new(FnProbe::new(|| Ok(()))));
    let orch = harness.orchestrator(options(), generator(&[("fast", SWITCH_IR)]));
    let source = "// @performance: dispatch_overhead_ns < 1000000\n// @performance-profile: quick\n";

    let report = orch.run(&[case("fast", source)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Passed, "{:?}", result.diagnostics);
    assert!(result.state_trail.contains(&CaseState::PerformanceValidated));
    let perf = result.performance.as_ref().unwrap();
    assert_eq!(perf.sample_count, 5);
    assert!(perf.expectations.iter().all(|c| c.passed));
    let update = perf.baseline_update.as_ref().unwrap();
    assert!(update.updated);
    assert_eq!(update.new_version, Some(1));

    let key = BaselineKey::new("fast", Platform::LinuxX86_64, OptimizationLevel::Debug);
    let history = harness.baselines.load(&key).unwrap().unwrap();
    assert_eq!(history.current_version, Some(1));
}

#[test]
fn violated_expectation_fails_and_keeps_baseline_untouched() {
    let mut harness = Harness::new();
    harness.golden("fast", SWITCH_IR);
    harness
        .probes
        .register("fast", |_, _| Box::new(FnProbe::new(|| Ok(()))));
    let orch = harness.orchestrator(options(), generator(&[("fast", SWITCH_IR)]));
    let source = "// @performance: dispatch_overhead_ns < 0\n// @performance-profile: quick\n";

    let report = orch.run(&[case("fast", source)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.primary_code(), Some(ErrorCode::ThresholdViolation));
    let key = BaselineKey::new("fast", Platform::LinuxX86_64, OptimizationLevel::Debug);
    assert!(harness.baselines.load(&key).unwrap().is_none());
    let metrics = &result.failure_report.as_ref().unwrap().artifacts.performance_metrics;
    assert!(metrics.contains_key("mean_ns"));
}

#[test]
fn missing_probe_follows_policy() {
    let harness = Harness::new();
    harness.golden("unprobed", SWITCH_IR);
    let source = "// @performance: dispatch_overhead_ns < 100\n";

    let report = harness
        .orchestrator(options(), generator(&[("unprobed", SWITCH_IR)]))
        .run(&[case("unprobed", source)]);
    assert_eq!(report.results[0].status, TestStatus::Passed);
    assert!(report.results[0]
        .diagnostics
        .iter()
        .any(|d| d.code == Some(ErrorCode::ProbeFailure)));

    let mut strict = options();
    strict.missing_probe = MissingProbePolicy::Error;
    let report = harness
        .orchestrator(strict, generator(&[("unprobed", SWITCH_IR)]))
        .run(&[case("unprobed", source)]);
    assert_eq!(report.results[0].status, TestStatus::FrameworkError);
    assert_eq!(report.results[0].primary_code(), Some(ErrorCode::ProbeFailure));
}

#[test]
fn rules_and_gates_are_enforced() {
    let harness = Harness::new();
    harness.golden("ruled", &SWITCH_IR.replace("%k", "%key"));
    let orch = harness.orchestrator(options(), generator(&[("ruled", SWITCH_IR)]));
    let source = "\
// @validate: requires_dispatch_table
// @validate: max_functions 1
// @quality-gate: max_differences cosmetic 0
";
    let report = orch.run(&[case("ruled", source)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].kind, FailureKind::QualityGate);
    assert_eq!(result.primary_code(), Some(ErrorCode::QualityGateFailed));

    let report = orch.run(&[case("ruled", "// @validate: not_contains switch\n")]);
    assert_eq!(report.results[0].primary_code(), Some(ErrorCode::ValidationRuleFailed));
}

#[test]
fn unregistered_code_falls_back_to_framework_error() {
    let harness = Harness::new();
    harness.golden("drift", SWITCH_IR);
    let orch = Orchestrator::new(
        options(),
        Collaborators {
            generator: generator(&[("drift", CHAIN_IR)]),
            goldens: harness.goldens.clone(),
            probes: Arc::new(harness.probes.clone()),
            hooks: Arc::new(ShellHooks::default()),
        },
        Arc::new(ErrorRegistry::without(ErrorCode::GoldenMismatch)),
        Arc::new(BaselineManager::new(harness.baselines.clone(), BaselinePolicy::default())),
        EventLoggerHandle::disabled(),
    );

    let report = orch.run(&[case("drift", "// @description: drift\n")]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::FrameworkError);
    let rendered = result.rendered_report.as_deref().unwrap();
    assert!(rendered.contains("DCV-5002"), "{rendered}");
}

#[test]
fn sequential_and_pooled_runs_agree() {
    let harness = Harness::new();
    let names = ["a", "b", "c", "d", "e"];
    let mut g = CannedGenerator::default();
    for name in names {
        harness.golden(name, SWITCH_IR);
        g = g.with(name, SWITCH_IR);
    }
    let g = Arc::new(g);
    let cases: Vec<_> = names.iter().map(|n| case(n, SWITCH_CONTRACT)).collect();

    let pooled = harness.orchestrator(options(), g.clone()).run(&cases);
    let mut serial_opts = options();
    serial_opts.parallel = false;
    let serial = harness.orchestrator(serial_opts, g).run(&cases);

    let order = |r: &dispatch_contracts::orchestrator::runner::RunReport| {
        r.results.iter().map(|x| (x.test.clone(), x.status)).collect::<Vec<_>>()
    };
    assert_eq!(order(&pooled), order(&serial));
    assert_eq!(pooled.summary.passed, 5);
}

#[test]
fn auto_approval_does_not_lift_the_benchmark_timeout() {
    let mut harness = Harness::new();
    harness.probes.register("sluggish", |_, _| {
        Box::new(FnProbe::new(|| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        }))
    });
    let mut approving = options();
    approving.approve_missing_golden = true;
    let orch = harness.orchestrator(approving, generator(&[("sluggish", SWITCH_IR)]));
    let source = "\
// @timeout: 200ms
// @performance: dispatch_overhead_ns < 1e12
// @performance-profile: warmup=0, iterations=1
";

    let report = orch.run(&[case("sluggish", source)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Timeout, "{:?}", result.diagnostics);
    assert_eq!(result.primary_code(), Some(ErrorCode::TestTimeout));
    assert!(result.duration < Duration::from_millis(450), "{:?}", result.duration);

    // The abandoned unit finishes its samples but must not persist anything.
    std::thread::sleep(Duration::from_millis(900));
    let golden = harness
        .goldens
        .load("sluggish", Platform::LinuxX86_64, OptimizationLevel::Debug)
        .unwrap();
    assert!(golden.is_none());
    let key = BaselineKey::new("sluggish", Platform::LinuxX86_64, OptimizationLevel::Debug);
    assert!(harness.baselines.load(&key).unwrap().is_none());
}

#[test]
fn slower_rerun_is_a_regression_and_keeps_the_baseline() {
    const SOURCE: &str = "\
// @performance: dispatch_overhead_ns < 1e12
// @performance-profile: warmup=0, iterations=10
";
    let key = BaselineKey::new("hot_path", Platform::LinuxX86_64, OptimizationLevel::Debug);

    let mut fast = Harness::new();
    fast.golden("hot_path", SWITCH_IR);
    fast.probes
        .register("hot_path", |_, _| Box::new(FnProbe::new(|| Ok(()))));
    let report = fast
        .orchestrator(options(), generator(&[("hot_path", SWITCH_IR)]))
        .run(&[case("hot_path", SOURCE)]);
    assert_eq!(report.results[0].status, TestStatus::Passed, "{:?}", report.results[0].diagnostics);
    assert_eq!(fast.baselines.load(&key).unwrap().unwrap().current_version, Some(1));

    // Same stores, slower probe.
    let mut slow = Harness {
        goldens: fast.goldens.clone(),
        baselines: fast.baselines.clone(),
        probes: Default::default(),
    };
    slow.probes.register("hot_path", |_, _| {
        Box::new(FnProbe::new(|| {
            std::thread::sleep(Duration::from_micros(500));
            Ok(())
        }))
    });
    let report = slow
        .orchestrator(options(), generator(&[("hot_path", SWITCH_IR)]))
        .run(&[case("hot_path", SOURCE)]);
    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.primary_code(), Some(ErrorCode::PerformanceRegression));
    assert_eq!(result.failures[0].kind, FailureKind::Performance);
    assert!(result.rendered_report.as_deref().unwrap().contains("DCV-3001"));
    let perf = result.performance.as_ref().unwrap();
    assert!(!perf.validation.as_ref().unwrap().passed);
    assert!(perf.baseline_update.is_none());

    let history = slow.baselines.load(&key).unwrap().unwrap();
    assert_eq!(history.current_version, Some(1));
    assert_eq!(history.versions.len(), 1);
}
