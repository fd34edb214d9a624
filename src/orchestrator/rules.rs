//! Structural validation rules and aggregate quality gates.

#![allow(missing_docs)]

use regex::Regex;

use crate::contract::model::{QualityGate, ValidationRule};
use crate::ir::diff::ComparisonResult;
use crate::ir::dispatch::DispatchFeatures;
use crate::ir::module::IrModule;
use crate::perf::validator::ValidationResult;

/// Messages for every rule `ir` violates, in declaration order.
#[must_use]
pub fn evaluate_rules(
    rules: &[ValidationRule],
    ir: &str,
    module: &IrModule,
    features: &DispatchFeatures,
) -> Vec<String> {
    rules
        .iter()
        .filter_map(|rule| check_rule(rule, ir, module, features).err())
        .collect()
}

fn check_rule(
    rule: &ValidationRule,
    ir: &str,
    module: &IrModule,
    features: &DispatchFeatures,
) -> Result<(), String> {
    match rule {
        ValidationRule::Contains(text) => {
            if ir.contains(text.as_str()) {
                Ok(())
            } else {
                Err(format!("rule `{rule}`: text not found in generated IR"))
            }
        }
        ValidationRule::NotContains(text) => match ir.find(text.as_str()) {
            None => Ok(()),
            Some(offset) => {
                let line = ir[..offset].matches('\n').count() + 1;
                Err(format!("rule `{rule}`: forbidden text present at line {line}"))
            }
        },
        ValidationRule::Matches(pattern) => match Regex::new(pattern) {
            Ok(re) if re.is_match(ir) => Ok(()),
            Ok(_) => Err(format!("rule `{rule}`: no match in generated IR")),
            Err(err) => Err(format!("rule `{rule}`: pattern does not compile: {err}")),
        },
        ValidationRule::MaxFunctions(limit) => {
            let defined = module.defined_functions();
            if defined <= *limit {
                Ok(())
            } else {
                Err(format!("rule `{rule}`: {defined} functions defined"))
            }
        }
        ValidationRule::MaxInstructions(limit) => {
            let count = module.instruction_count();
            if count <= *limit {
                Ok(())
            } else {
                Err(format!("rule `{rule}`: {count} instructions"))
            }
        }
        ValidationRule::NoIndirectCalls => {
            if features.indirect_calls == 0 {
                Ok(())
            } else {
                Err(format!(
                    "rule `{rule}`: {} indirect call(s) present",
                    features.indirect_calls
                ))
            }
        }
        ValidationRule::RequiresDispatchTable => {
            if features.has_dispatch_table() {
                Ok(())
            } else {
                Err(format!("rule `{rule}`: no switch, indirectbr or function table found"))
            }
        }
    }
}

/// What the gates look at. Absent phases make their gates vacuous.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateInputs<'a> {
    pub comparison: Option<&'a ComparisonResult>,
    /// `None` when the performance phase did not run.
    pub performance: Option<&'a ValidationResult>,
    pub sample_count: usize,
}

/// Messages for every failed gate, in declaration order.
#[must_use]
pub fn evaluate_gates(gates: &[QualityGate], inputs: &GateInputs<'_>) -> Vec<String> {
    gates
        .iter()
        .filter_map(|gate| check_gate(gate, inputs).err())
        .collect()
}

fn check_gate(gate: &QualityGate, inputs: &GateInputs<'_>) -> Result<(), String> {
    match gate {
        QualityGate::MaxDifferences { severity, limit } => {
            let count = inputs
                .comparison
                .map_or(0, |c| c.count_at_least(*severity));
            if count <= *limit {
                Ok(())
            } else {
                Err(format!("gate `{gate}`: {count} differences at or above {severity}"))
            }
        }
        QualityGate::MaxRegressionPct(max_pct) => match inputs.performance {
            Some(v) if v.regression_percentage * 100.0 > *max_pct => Err(format!(
                "gate `{gate}`: regression of {:.2}%",
                v.regression_percentage * 100.0
            )),
            _ => Ok(()),
        },
        QualityGate::RequireBaseline => match inputs.performance {
            Some(v) if !v.has_baseline => {
                Err(format!("gate `{gate}`: no baseline existed for comparison"))
            }
            _ => Ok(()),
        },
        QualityGate::MinSamples(min) => {
            if inputs.performance.is_none() || inputs.sample_count >= *min {
                Ok(())
            } else {
                Err(format!("gate `{gate}`: only {} samples collected", inputs.sample_count))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::diff::{Severity, compare};
    use crate::perf::stats::summarize;
    use crate::perf::validator::{ValidationConfig, compare_with_baseline};

    const IR: &str = "\
@vtable = global [2 x ptr] [ptr @a, ptr @b]

define i32 @dispatch(i32 %k) {
entry:
  switch i32 %k, label %d [
    i32 0, label %a
  ]
a:
  ret i32 1
d:
  ret i32 0
}
";

    fn eval(rules: &[ValidationRule]) -> Vec<String> {
        let module = IrModule::parse(IR);
        let features = DispatchFeatures::detect(&module);
        evaluate_rules(rules, IR, &module, &features)
    }

    #[test]
    fn satisfied_rules_produce_nothing() {
        let rules = vec![
            ValidationRule::Contains("switch i32".to_string()),
            ValidationRule::NotContains("indirectbr".to_string()),
            ValidationRule::Matches(r"define i32 @\w+".to_string()),
            ValidationRule::MaxFunctions(1),
            ValidationRule::NoIndirectCalls,
            ValidationRule::RequiresDispatchTable,
        ];
        assert!(eval(&rules).is_empty());
    }

    #[test]
    fn violations_are_reported_in_order() {
        let rules = vec![
            ValidationRule::Contains("call".to_string()),
            ValidationRule::NotContains("switch".to_string()),
            ValidationRule::MaxInstructions(1),
        ];
        let violations = eval(&rules);
        assert_eq!(violations.len(), 3);
        assert!(violations[0].starts_with("rule `contains"));
        assert!(violations[1].contains("line 5"));
        assert!(violations[2].contains("instructions"));
    }

    #[test]
    fn gates_are_vacuous_without_inputs() {
        let gates = vec![
            QualityGate::MaxDifferences {
                severity: Severity::Cosmetic,
                limit: 0,
            },
            QualityGate::MaxRegressionPct(1.0),
            QualityGate::RequireBaseline,
            QualityGate::MinSamples(100),
        ];
        assert!(evaluate_gates(&gates, &GateInputs::default()).is_empty());
    }

    #[test]
    fn gates_fail_on_real_inputs() {
        let comparison = compare(IR, &IR.replace("%k", "%key"));
        let current = summarize(&[130.0]).unwrap();
        let baseline = summarize(&[100.0]).unwrap();
        let perf = compare_with_baseline(&current, Some(&baseline), &ValidationConfig::default());
        let no_base = compare_with_baseline(&current, None, &ValidationConfig::default());

        let diff_gate = [QualityGate::MaxDifferences {
            severity: Severity::Cosmetic,
            limit: 0,
        }];
        let with_diff = GateInputs {
            comparison: Some(&comparison),
            ..GateInputs::default()
        };
        assert_eq!(evaluate_gates(&diff_gate, &with_diff).len(), 1);

        let perf_inputs = GateInputs {
            comparison: None,
            performance: Some(&perf),
            sample_count: 3,
        };
        let gates = [QualityGate::MaxRegressionPct(10.0), QualityGate::MinSamples(5)];
        assert_eq!(evaluate_gates(&gates, &perf_inputs).len(), 2);

        let baseline_less = GateInputs {
            performance: Some(&no_base),
            ..perf_inputs
        };
        assert_eq!(evaluate_gates(&[QualityGate::RequireBaseline], &baseline_less).len(), 1);
    }
}
