//! Structural dispatch features of an IR module and the per-strategy predicates.

#![allow(missing_docs)]

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::contract::model::DispatchStrategy;
use crate::ir::module::{IrFunction, IrModule};

/// Counts of dispatch-relevant constructs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchFeatures {
    pub switches: usize,
    pub switch_cases: usize,
    pub indirect_branches: usize,
    pub indirect_calls: usize,
    pub direct_calls: usize,
    pub ordered_compares: usize,
    pub equality_compares: usize,
    pub conditional_branches: usize,
    pub function_tables: usize,
    pub table_accesses: usize,
    pub cache_globals: usize,
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s=])(?:tail |musttail |notail )?(?:call|invoke)\b.*?([@%])[-\w$.]+\(")
            .expect("call regex")
    })
}

fn icmp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bicmp (eq|ne|[su](?:lt|le|gt|ge))\b").expect("icmp regex"))
}

impl DispatchFeatures {
    /// Features of every defined function in the module.
    #[must_use]
    pub fn detect(module: &IrModule) -> Self {
        let tables: Vec<&str> = module
            .globals
            .values()
            .filter(|g| g.is_function_table())
            .map(|g| g.name.as_str())
            .collect();
        let mut features = Self {
            function_tables: tables.len(),
            cache_globals: module.globals.values().filter(|g| g.is_cache()).count(),
            ..Self::default()
        };
        for function in module.functions.values() {
            features.absorb(&Self::of_function(function, &tables));
        }
        features
    }

    #[must_use]
    pub fn from_text(ir: &str) -> Self {
        Self::detect(&IrModule::parse(ir))
    }

    /// Instruction-level features of one function. `tables` names the
    /// module's function-pointer table globals.
    #[must_use]
    pub fn of_function(function: &IrFunction, tables: &[&str]) -> Self {
        let mut f = Self::default();
        for inst in function.instructions() {
            let text = inst.text.as_str();
            if text.starts_with("switch ") {
                f.switches += 1;
                f.switch_cases += text.matches(", label ").count().saturating_sub(1);
            } else if text.starts_with("indirectbr ") {
                f.indirect_branches += 1;
            } else if text.starts_with("br i1 ") {
                f.conditional_branches += 1;
            }
            if let Some(caps) = call_re().captures(text) {
                if caps.get(1).is_some_and(|m| m.as_str() == "%") {
                    f.indirect_calls += 1;
                } else {
                    f.direct_calls += 1;
                }
            }
            for caps in icmp_re().captures_iter(text) {
                match caps.get(1).map(|m| m.as_str()) {
                    Some("eq" | "ne") => f.equality_compares += 1,
                    Some(_) => f.ordered_compares += 1,
                    None => {}
                }
            }
            if tables
                .iter()
                .any(|table| references_global(text, table))
            {
                f.table_accesses += 1;
            }
        }
        f
    }

    fn absorb(&mut self, other: &Self) {
        self.switches += other.switches;
        self.switch_cases += other.switch_cases;
        self.indirect_branches += other.indirect_branches;
        self.indirect_calls += other.indirect_calls;
        self.direct_calls += other.direct_calls;
        self.ordered_compares += other.ordered_compares;
        self.equality_compares += other.equality_compares;
        self.conditional_branches += other.conditional_branches;
        self.table_accesses += other.table_accesses;
    }

    /// Any construct that selects a target at run time.
    #[must_use]
    pub fn has_dispatch_construct(&self) -> bool {
        self.switches > 0 || self.indirect_branches > 0 || self.indirect_calls > 0
    }

    #[must_use]
    pub fn has_dispatch_table(&self) -> bool {
        self.switches > 0 || self.indirect_branches > 0 || self.function_tables > 0
    }

    fn uses_table(&self) -> bool {
        self.function_tables > 0 && self.table_accesses > 0
    }

    fn uses_cache(&self) -> bool {
        self.cache_globals > 0 && self.equality_compares > 0
    }

    fn uses_search(&self) -> bool {
        self.switches == 0 && (self.ordered_compares >= 2 || self.equality_compares >= 2)
    }

    /// Whether the structure is consistent with `strategy`.
    #[must_use]
    pub fn satisfies(&self, strategy: DispatchStrategy) -> bool {
        match strategy {
            DispatchStrategy::StaticDispatch => {
                self.switches == 0 && self.indirect_branches == 0 && self.indirect_calls == 0
            }
            DispatchStrategy::SwitchTable => self.switches > 0 || self.indirect_branches > 0,
            DispatchStrategy::PerfectHash => self.uses_table(),
            DispatchStrategy::BinarySearch => self.switches == 0 && self.ordered_compares >= 2,
            DispatchStrategy::LinearSearch => {
                self.switches == 0 && self.ordered_compares == 0 && self.equality_compares >= 2
            }
            DispatchStrategy::InlineCache => self.uses_cache(),
            DispatchStrategy::PolymorphicInlineCache => {
                self.cache_globals > 0 && self.equality_compares >= 2
            }
            DispatchStrategy::MegamorphicDispatch => {
                self.indirect_calls > 0 && !self.uses_table() && self.cache_globals == 0
            }
            DispatchStrategy::HybridDispatch => {
                let families = [
                    self.switches > 0 || self.indirect_branches > 0,
                    self.uses_table(),
                    self.uses_search(),
                    self.uses_cache(),
                ];
                families.iter().filter(|present| **present).count() >= 2
            }
        }
    }

    /// Every strategy the structure is consistent with.
    #[must_use]
    pub fn detected_strategies(&self) -> Vec<DispatchStrategy> {
        DispatchStrategy::ALL
            .into_iter()
            .filter(|s| self.satisfies(*s))
            .collect()
    }

    /// One-line human summary used in failure messages.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "switches={} cases={} indirectbr={} indirect_calls={} direct_calls={} \
             ordered_cmp={} eq_cmp={} cond_br={} tables={} table_accesses={} caches={}",
            self.switches,
            self.switch_cases,
            self.indirect_branches,
            self.indirect_calls,
            self.direct_calls,
            self.ordered_compares,
            self.equality_compares,
            self.conditional_branches,
            self.function_tables,
            self.table_accesses,
            self.cache_globals
        )
    }
}

fn references_global(text: &str, name: &str) -> bool {
    let needle = format!("@{name}");
    text.match_indices(&needle).any(|(pos, _)| {
        text[pos + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-')))
    })
}
