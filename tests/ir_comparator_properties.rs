//! Property tests for IR comparison, dispatch detection and sample statistics.

use std::fmt::Write as _;

use proptest::prelude::*;

use dispatch_contracts::contract::model::DispatchStrategy;
use dispatch_contracts::ir::diff::{Severity, compare, generate_diff_report};
use dispatch_contracts::ir::dispatch::DispatchFeatures;
use dispatch_contracts::ir::module::IrModule;
use dispatch_contracts::perf::stats::{percentile, summarize};

// ──────────────────── generators ────────────────────

fn switch_ir(reg: &str, cases: usize) -> String {
    let mut ir = format!("define i32 @dispatch(i32 %{reg}) {{\nentry:\n  switch i32 %{reg}, label %default [\n");
    for i in 0..cases {
        let _ = writeln!(ir, "    i32 {i}, label %case{i}");
    }
    ir.push_str("  ]\n");
    for i in 0..cases {
        let _ = writeln!(ir, "case{i}:\n  ret i32 {}", 100 + i);
    }
    ir.push_str("default:\n  ret i32 -1\n}\n");
    ir
}

fn chain_ir(cases: usize) -> String {
    let mut ir = String::from("define i32 @dispatch(i32 %k) {\nentry:\n  br label %test0\n");
    for i in 0..cases {
        let next = if i + 1 == cases {
            "default".to_string()
        } else {
            format!("test{}", i + 1)
        };
        let _ = writeln!(
            ir,
            "test{i}:\n  %c{i} = icmp eq i32 %k, {i}\n  br i1 %c{i}, label %case{i}, label %{next}"
        );
    }
    for i in 0..cases {
        let _ = writeln!(ir, "case{i}:\n  ret i32 {}", 100 + i);
    }
    ir.push_str("default:\n  ret i32 -1\n}\n");
    ir
}

fn arb_register() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,6}".prop_map(|s| format!("r_{s}"))
}

// ──────────────────── property tests ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Comparing any module with itself reports nothing.
    #[test]
    fn self_comparison_is_clean(cases in 1usize..12, reg in arb_register()) {
        let ir = switch_ir(&reg, cases);
        let result = compare(&ir, &ir);
        prop_assert!(result.equivalent);
        prop_assert_eq!(result.summary.total_differences, 0);
        prop_assert_eq!(&result.summary.expected_sha256, &result.summary.actual_sha256);
    }

    /// Consistent register renaming never rises above cosmetic.
    #[test]
    fn register_renames_are_cosmetic(
        cases in 1usize..12,
        a in arb_register(),
        b in arb_register(),
    ) {
        let result = compare(&switch_ir(&a, cases), &switch_ir(&b, cases));
        prop_assert!(result.equivalent);
        prop_assert!(result.differences.iter().all(|d| d.severity == Severity::Cosmetic));
    }

    /// A different number of switch arms is never equivalent.
    #[test]
    fn added_arm_breaks_equivalence(cases in 1usize..12) {
        let result = compare(&switch_ir("k", cases), &switch_ir("k", cases + 1));
        prop_assert!(!result.equivalent);
        prop_assert!(result.count_at_least(Severity::Breaking) > 0);
    }

    /// Per-severity counts always add up, and equivalence follows them.
    #[test]
    fn summary_counts_add_up(cases in 1usize..8, extra in 0usize..3, chain in any::<bool>()) {
        let actual = if chain { chain_ir(cases + extra) } else { switch_ir("v", cases + extra) };
        let result = compare(&switch_ir("k", cases), &actual);
        let s = &result.summary;
        prop_assert_eq!(s.total_differences, s.cosmetic + s.semantic + s.breaking + s.critical);
        prop_assert_eq!(s.total_differences, result.differences.len());
        prop_assert_eq!(result.equivalent, s.critical == 0 && s.breaking == 0);
    }

    /// The rendered report depends only on its inputs.
    #[test]
    fn diff_report_is_deterministic(cases in 1usize..8, extra in 1usize..4) {
        let expected = switch_ir("k", cases);
        let actual = chain_ir(cases + extra);
        let first = generate_diff_report(&compare(&expected, &actual));
        let second = generate_diff_report(&compare(&expected, &actual));
        prop_assert_eq!(first, second);
    }

    /// Switch lowering and compare chains are told apart structurally.
    #[test]
    fn strategies_are_detected_from_shape(cases in 2usize..16) {
        let switch = DispatchFeatures::detect(&IrModule::parse(&switch_ir("k", cases)));
        prop_assert!(switch.satisfies(DispatchStrategy::SwitchTable));
        prop_assert!(!switch.satisfies(DispatchStrategy::LinearSearch));
        prop_assert_eq!(switch.switch_cases, cases);

        let chain = DispatchFeatures::detect(&IrModule::parse(&chain_ir(cases)));
        prop_assert!(chain.satisfies(DispatchStrategy::LinearSearch));
        prop_assert!(!chain.satisfies(DispatchStrategy::SwitchTable));
    }

    /// Mean sits between the extremes and the interval brackets the mean.
    #[test]
    fn summary_bounds_hold(values in prop::collection::vec(0.1f64..1.0e6, 1..64)) {
        let s = summarize(&values).unwrap();
        let eps = 1e-9 * s.max.abs().max(1.0);
        prop_assert!(s.min <= s.mean + eps && s.mean <= s.max + eps);
        prop_assert!(s.ci_lower <= s.mean + eps && s.mean <= s.ci_upper + eps);
        prop_assert!(s.stddev >= 0.0);
        prop_assert_eq!(s.sample_count, values.len());
    }

    /// Percentiles are monotone in their rank.
    #[test]
    fn percentiles_are_monotone(mut values in prop::collection::vec(0.0f64..1.0e6, 1..64)) {
        values.sort_by(f64::total_cmp);
        let p50 = percentile(&values, 50.0).unwrap();
        let p95 = percentile(&values, 95.0).unwrap();
        let p99 = percentile(&values, 99.0).unwrap();
        prop_assert!(p50 <= p95 && p95 <= p99);
        prop_assert!(p99 <= values[values.len() - 1]);
    }
}
