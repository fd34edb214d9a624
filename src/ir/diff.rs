//! Severity-classified semantic diff between two IR texts.
//!
//! Severity is a fixed function of [`DifferenceType`]:
//!
//! | type | severity |
//! |---|---|
//! | whitespace, register_naming, metadata | cosmetic |
//! | instruction_order, type_definition | semantic |
//! | basic_block_structure, constant_value | breaking |
//! | function_signature, dispatch_table_presence, unparseable | critical |
//!
//! A result is equivalent iff it has no breaking or critical differences.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Write as _};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ir::dispatch::DispatchFeatures;
use crate::ir::module::{IrFunction, IrInstruction, IrModule};

// ──────────────────── severity and type ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Cosmetic,
    Semantic,
    Breaking,
    Critical,
}

impl Severity {
    pub const ALL: [Self; 4] = [Self::Cosmetic, Self::Semantic, Self::Breaking, Self::Critical];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cosmetic => "cosmetic",
            Self::Semantic => "semantic",
            Self::Breaking => "breaking",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cosmetic" => Some(Self::Cosmetic),
            "semantic" => Some(Self::Semantic),
            "breaking" => Some(Self::Breaking),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Breaking and critical differences break equivalence.
    #[must_use]
    pub const fn blocks_equivalence(self) -> bool {
        matches!(self, Self::Breaking | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceType {
    Whitespace,
    InstructionOrder,
    RegisterNaming,
    FunctionSignature,
    BasicBlockStructure,
    DispatchTablePresence,
    TypeDefinition,
    ConstantValue,
    Metadata,
    Unparseable,
}

impl DifferenceType {
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Whitespace | Self::RegisterNaming | Self::Metadata => Severity::Cosmetic,
            Self::InstructionOrder | Self::TypeDefinition => Severity::Semantic,
            Self::BasicBlockStructure | Self::ConstantValue => Severity::Breaking,
            Self::FunctionSignature | Self::DispatchTablePresence | Self::Unparseable => {
                Severity::Critical
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Whitespace => "whitespace",
            Self::InstructionOrder => "instruction_order",
            Self::RegisterNaming => "register_naming",
            Self::FunctionSignature => "function_signature",
            Self::BasicBlockStructure => "basic_block_structure",
            Self::DispatchTablePresence => "dispatch_table_presence",
            Self::TypeDefinition => "type_definition",
            Self::ConstantValue => "constant_value",
            Self::Metadata => "metadata",
            Self::Unparseable => "unparseable",
        }
    }
}

impl fmt::Display for DifferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── differences ────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub function: Option<String>,
    pub block: Option<String>,
    pub expected_line: Option<usize>,
    pub actual_line: Option<usize>,
}

impl SourceLocation {
    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(function) = &self.function {
            let _ = write!(out, "@{function}");
        }
        if let Some(block) = &self.block {
            let _ = write!(out, " %{block}");
        }
        match (self.expected_line, self.actual_line) {
            (Some(e), Some(a)) => {
                let _ = write!(out, " (expected line {e}, actual line {a})");
            }
            (Some(e), None) => {
                let _ = write!(out, " (expected line {e})");
            }
            (None, Some(a)) => {
                let _ = write!(out, " (actual line {a})");
            }
            (None, None) => {}
        }
        if out.is_empty() {
            "module".to_string()
        } else {
            out.trim_start().to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IRDifference {
    pub severity: Severity,
    pub difference_type: DifferenceType,
    pub location: SourceLocation,
    pub expected: String,
    pub actual: String,
    pub description: String,
}

impl IRDifference {
    /// Severity comes from the type; it cannot be chosen separately.
    #[must_use]
    pub fn new(
        difference_type: DifferenceType,
        location: SourceLocation,
        expected: impl Into<String>,
        actual: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            severity: difference_type.severity(),
            difference_type,
            location,
            expected: expected.into(),
            actual: actual.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_differences: usize,
    pub cosmetic: usize,
    pub semantic: usize,
    pub breaking: usize,
    pub critical: usize,
    pub functions_compared: usize,
    pub expected_sha256: String,
    pub actual_sha256: String,
}

impl ComparisonSummary {
    #[must_use]
    pub const fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Cosmetic => self.cosmetic,
            Severity::Semantic => self.semantic,
            Severity::Breaking => self.breaking,
            Severity::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub equivalent: bool,
    pub differences: Vec<IRDifference>,
    pub summary: ComparisonSummary,
}

impl ComparisonResult {
    /// Derive `equivalent` and the summary counts from the differences.
    #[must_use]
    pub fn from_differences(
        differences: Vec<IRDifference>,
        functions_compared: usize,
        expected_sha256: String,
        actual_sha256: String,
    ) -> Self {
        let mut summary = ComparisonSummary {
            total_differences: differences.len(),
            functions_compared,
            expected_sha256,
            actual_sha256,
            ..ComparisonSummary::default()
        };
        for diff in &differences {
            match diff.severity {
                Severity::Cosmetic => summary.cosmetic += 1,
                Severity::Semantic => summary.semantic += 1,
                Severity::Breaking => summary.breaking += 1,
                Severity::Critical => summary.critical += 1,
            }
        }
        Self {
            equivalent: summary.critical == 0 && summary.breaking == 0,
            differences,
            summary,
        }
    }

    /// Differences at or above `severity`.
    #[must_use]
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.differences
            .iter()
            .filter(|d| d.severity >= severity)
            .count()
    }

    /// Most severe difference, if any.
    #[must_use]
    pub fn worst(&self) -> Option<&IRDifference> {
        self.differences.iter().max_by_key(|d| d.severity)
    }
}

#[must_use]
pub fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

// ──────────────────── compare ────────────────────

/// Compare expected IR against actual IR.
#[must_use]
pub fn compare(expected_ir: &str, actual_ir: &str) -> ComparisonResult {
    let expected = IrModule::parse(expected_ir);
    let actual = IrModule::parse(actual_ir);
    let mut diffs = Vec::new();

    compare_parse_health(&expected, &actual, &mut diffs);
    let functions_compared = compare_functions(&expected, &actual, &mut diffs);
    compare_globals(&expected, &actual, &mut diffs);
    compare_types(&expected, &actual, &mut diffs);
    compare_metadata(&expected, &actual, &mut diffs);

    if diffs.is_empty() && expected_ir != actual_ir {
        diffs.push(IRDifference::new(
            DifferenceType::Whitespace,
            SourceLocation::default(),
            String::new(),
            String::new(),
            "inputs differ only in formatting, comments or debug attachments",
        ));
    }

    ComparisonResult::from_differences(
        diffs,
        functions_compared,
        sha256_hex(expected_ir),
        sha256_hex(actual_ir),
    )
}

fn compare_parse_health(expected: &IrModule, actual: &IrModule, diffs: &mut Vec<IRDifference>) {
    if expected.is_clean() && actual.is_clean() {
        return;
    }
    let first = |module: &IrModule| {
        module
            .issues
            .first()
            .map(|i| format!("line {}: {} ({})", i.line, i.text, i.reason))
            .unwrap_or_default()
    };
    diffs.push(IRDifference::new(
        DifferenceType::Unparseable,
        SourceLocation {
            expected_line: expected.issues.first().map(|i| i.line),
            actual_line: actual.issues.first().map(|i| i.line),
            ..SourceLocation::default()
        },
        first(expected),
        first(actual),
        format!(
            "unparseable fragments: {} in expected, {} in actual",
            expected.issues.len(),
            actual.issues.len()
        ),
    ));
}

fn set_mismatch<'a>(
    expected: impl Iterator<Item = &'a String>,
    actual: impl Iterator<Item = &'a String>,
) -> Option<(Vec<&'a str>, Vec<&'a str>)> {
    let e: BTreeSet<&str> = expected.map(String::as_str).collect();
    let a: BTreeSet<&str> = actual.map(String::as_str).collect();
    if e == a {
        return None;
    }
    Some((e.difference(&a).copied().collect(), a.difference(&e).copied().collect()))
}

fn describe_sets(kind: &str, missing: &[&str], extra: &[&str]) -> String {
    let mut text = format!("{kind} set differs");
    if !missing.is_empty() {
        let _ = write!(text, "; missing: {}", missing.join(", "));
    }
    if !extra.is_empty() {
        let _ = write!(text, "; unexpected: {}", extra.join(", "));
    }
    text
}

fn compare_functions(expected: &IrModule, actual: &IrModule, diffs: &mut Vec<IRDifference>) -> usize {
    if let Some((missing, extra)) =
        set_mismatch(expected.functions.keys(), actual.functions.keys())
    {
        diffs.push(IRDifference::new(
            DifferenceType::FunctionSignature,
            SourceLocation::default(),
            format!("{} functions", expected.functions.len()),
            format!("{} functions", actual.functions.len()),
            describe_sets("function", &missing, &extra),
        ));
    }

    let tables = |module: &IrModule| -> Vec<String> {
        module
            .globals
            .values()
            .filter(|g| g.is_function_table())
            .map(|g| g.name.clone())
            .collect()
    };
    let expected_tables = tables(expected);
    let actual_tables = tables(actual);
    let expected_table_refs: Vec<&str> = expected_tables.iter().map(String::as_str).collect();
    let actual_table_refs: Vec<&str> = actual_tables.iter().map(String::as_str).collect();
    let expected_types = expected.type_names();
    let actual_types = actual.type_names();

    let mut compared = 0;
    for (name, e) in &expected.functions {
        let Some(a) = actual.functions.get(name) else {
            continue;
        };
        compared += 1;
        let ctx = FunctionPair {
            expected: e,
            actual: a,
            expected_types: &expected_types,
            actual_types: &actual_types,
        };
        ctx.compare(&expected_table_refs, &actual_table_refs, diffs);
    }
    compared
}

struct FunctionPair<'a> {
    expected: &'a IrFunction,
    actual: &'a IrFunction,
    expected_types: &'a BTreeSet<&'a str>,
    actual_types: &'a BTreeSet<&'a str>,
}

impl FunctionPair<'_> {
    fn location(&self) -> SourceLocation {
        SourceLocation {
            function: Some(self.expected.name.clone()),
            block: None,
            expected_line: Some(self.expected.line),
            actual_line: Some(self.actual.line),
        }
    }

    fn compare(&self, expected_tables: &[&str], actual_tables: &[&str], diffs: &mut Vec<IRDifference>) {
        let (e, a) = (self.expected, self.actual);
        if e.is_declaration != a.is_declaration {
            diffs.push(IRDifference::new(
                DifferenceType::FunctionSignature,
                self.location(),
                e.signature.clone(),
                a.signature.clone(),
                "declaration/definition mismatch",
            ));
            return;
        }

        let expected_canon = CanonicalFunction::build(e, self.expected_types);
        let actual_canon = CanonicalFunction::build(a, self.actual_types);

        let mut renamed = false;
        if e.signature != a.signature {
            if expected_canon.signature == actual_canon.signature {
                renamed = true;
            } else {
                diffs.push(IRDifference::new(
                    DifferenceType::FunctionSignature,
                    self.location(),
                    e.signature.clone(),
                    a.signature.clone(),
                    "function signature changed",
                ));
            }
        }

        let fe = DispatchFeatures::of_function(e, expected_tables);
        let fa = DispatchFeatures::of_function(a, actual_tables);
        let shape = |f: &DispatchFeatures| (f.switches > 0, f.indirect_branches > 0, f.indirect_calls > 0);
        if shape(&fe) != shape(&fa) {
            diffs.push(IRDifference::new(
                DifferenceType::DispatchTablePresence,
                self.location(),
                fe.describe(),
                fa.describe(),
                "dispatch infrastructure differs",
            ));
        }

        if e.is_declaration {
            self.push_rename(renamed, diffs);
            return;
        }

        if e.blocks.len() != a.blocks.len() {
            diffs.push(IRDifference::new(
                DifferenceType::BasicBlockStructure,
                self.location(),
                format!("{} blocks", e.blocks.len()),
                format!("{} blocks", a.blocks.len()),
                "basic block count differs",
            ));
            return;
        }

        let raw_equal = e.blocks.iter().zip(&a.blocks).all(|(x, y)| {
            x.label == y.label
                && x.instructions
                    .iter()
                    .map(|i| &i.text)
                    .eq(y.instructions.iter().map(|i| &i.text))
        });
        if raw_equal {
            self.push_rename(renamed, diffs);
            return;
        }
        if expected_canon.blocks == actual_canon.blocks {
            self.push_rename(true, diffs);
            return;
        }
        self.push_rename(renamed, diffs);

        for (idx, (eb, ab)) in e.blocks.iter().zip(&a.blocks).enumerate() {
            let raw_e: Vec<&str> = eb.instructions.iter().map(|i| i.text.as_str()).collect();
            let raw_a: Vec<&str> = ab.instructions.iter().map(|i| i.text.as_str()).collect();
            if eb.label == ab.label && raw_e == raw_a {
                continue;
            }
            let (canon_label_e, canon_e) = &expected_canon.blocks[idx];
            let (canon_label_a, canon_a) = &actual_canon.blocks[idx];
            let location = SourceLocation {
                function: Some(e.name.clone()),
                block: Some(eb.label.clone()),
                expected_line: Some(eb.line),
                actual_line: Some(ab.line),
            };
            if canon_label_e == canon_label_a && canon_e == canon_a {
                diffs.push(IRDifference::new(
                    DifferenceType::RegisterNaming,
                    location,
                    eb.label.clone(),
                    ab.label.clone(),
                    "block differs only in value or label names",
                ));
            } else if same_multiset(&raw_e, &raw_a) || same_multiset(canon_e, canon_a) {
                diffs.push(IRDifference::new(
                    DifferenceType::InstructionOrder,
                    location,
                    raw_e.join("; "),
                    raw_a.join("; "),
                    "same instructions in a different order",
                ));
            } else {
                let pos = canon_e
                    .iter()
                    .zip(canon_a.iter())
                    .position(|(x, y)| x != y)
                    .unwrap_or_else(|| canon_e.len().min(canon_a.len()));
                let pick = |insts: &[IrInstruction]| {
                    insts
                        .get(pos)
                        .map_or_else(|| "<end of block>".to_string(), |i| i.text.clone())
                };
                let mut location = location;
                location.expected_line = eb.instructions.get(pos).map_or(Some(eb.line), |i| Some(i.line));
                location.actual_line = ab.instructions.get(pos).map_or(Some(ab.line), |i| Some(i.line));
                diffs.push(IRDifference::new(
                    DifferenceType::BasicBlockStructure,
                    location,
                    pick(&eb.instructions),
                    pick(&ab.instructions),
                    format!(
                        "instruction {} differs ({} vs {} instructions)",
                        pos + 1,
                        raw_e.len(),
                        raw_a.len()
                    ),
                ));
            }
        }
    }

    fn push_rename(&self, renamed: bool, diffs: &mut Vec<IRDifference>) {
        if renamed {
            diffs.push(IRDifference::new(
                DifferenceType::RegisterNaming,
                self.location(),
                self.expected.signature.clone(),
                self.actual.signature.clone(),
                "function differs only in value or label names",
            ));
        }
    }
}

fn same_multiset<S: AsRef<str>>(a: &[S], b: &[S]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut x: Vec<&str> = a.iter().map(AsRef::as_ref).collect();
    let mut y: Vec<&str> = b.iter().map(AsRef::as_ref).collect();
    x.sort_unstable();
    y.sort_unstable();
    x == y
}

// ──────────────────── canonical names ────────────────────

fn local_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%[-\w$.]+").expect("local name regex"))
}

/// Function with local values and labels renamed in order of first use.
struct CanonicalFunction {
    signature: String,
    blocks: Vec<(String, Vec<String>)>,
}

impl CanonicalFunction {
    fn build(function: &IrFunction, types: &BTreeSet<&str>) -> Self {
        let mut names: HashMap<String, String> = HashMap::new();
        let mut rename = |text: &str| -> String {
            local_re()
                .replace_all(text, |caps: &regex::Captures<'_>| {
                    let token = &caps[0];
                    if types.contains(token) {
                        return token.to_string();
                    }
                    let next = names.len();
                    names
                        .entry(token.to_string())
                        .or_insert_with(|| format!("%v{next}"))
                        .clone()
                })
                .into_owned()
        };
        let signature = rename(&function.signature);
        let blocks = function
            .blocks
            .iter()
            .map(|block| {
                let label = rename(&format!("%{}", block.label));
                let insts = block.instructions.iter().map(|i| rename(&i.text)).collect();
                (label, insts)
            })
            .collect();
        Self { signature, blocks }
    }
}

// ──────────────────── module-level collections ────────────────────

fn compare_globals(expected: &IrModule, actual: &IrModule, diffs: &mut Vec<IRDifference>) {
    let infra = |m: &IrModule| -> Vec<String> {
        m.globals
            .values()
            .filter(|g| g.is_function_table() || g.is_cache())
            .map(|g| g.name.clone())
            .collect()
    };
    let plain = |m: &IrModule| -> Vec<String> {
        m.globals
            .values()
            .filter(|g| !(g.is_function_table() || g.is_cache()))
            .map(|g| g.name.clone())
            .collect()
    };
    let (ei, ai) = (infra(expected), infra(actual));
    if let Some((missing, extra)) = set_mismatch(ei.iter(), ai.iter()) {
        diffs.push(IRDifference::new(
            DifferenceType::DispatchTablePresence,
            SourceLocation::default(),
            ei.join(", "),
            ai.join(", "),
            describe_sets("dispatch table/cache global", &missing, &extra),
        ));
    }
    let (ep, ap) = (plain(expected), plain(actual));
    if let Some((missing, extra)) = set_mismatch(ep.iter(), ap.iter()) {
        diffs.push(IRDifference::new(
            DifferenceType::ConstantValue,
            SourceLocation::default(),
            format!("{} globals", ep.len()),
            format!("{} globals", ap.len()),
            describe_sets("global", &missing, &extra),
        ));
    }
    for (name, e) in &expected.globals {
        if let Some(a) = actual.globals.get(name)
            && e.value != a.value
        {
            diffs.push(IRDifference::new(
                DifferenceType::ConstantValue,
                SourceLocation {
                    function: None,
                    block: None,
                    expected_line: Some(e.line),
                    actual_line: Some(a.line),
                },
                e.value.clone(),
                a.value.clone(),
                format!("value of @{name} changed"),
            ));
        }
    }
}

fn compare_types(expected: &IrModule, actual: &IrModule, diffs: &mut Vec<IRDifference>) {
    if let Some((missing, extra)) = set_mismatch(expected.types.keys(), actual.types.keys()) {
        diffs.push(IRDifference::new(
            DifferenceType::TypeDefinition,
            SourceLocation::default(),
            format!("{} types", expected.types.len()),
            format!("{} types", actual.types.len()),
            describe_sets("type", &missing, &extra),
        ));
    }
    for (name, e) in &expected.types {
        if let Some(a) = actual.types.get(name)
            && e.body != a.body
        {
            diffs.push(IRDifference::new(
                DifferenceType::TypeDefinition,
                SourceLocation {
                    function: None,
                    block: None,
                    expected_line: Some(e.line),
                    actual_line: Some(a.line),
                },
                e.body.clone(),
                a.body.clone(),
                format!("definition of {name} changed"),
            ));
        }
    }
}

fn compare_metadata(expected: &IrModule, actual: &IrModule, diffs: &mut Vec<IRDifference>) {
    if let Some((missing, extra)) = set_mismatch(expected.metadata.keys(), actual.metadata.keys()) {
        diffs.push(IRDifference::new(
            DifferenceType::Metadata,
            SourceLocation::default(),
            format!("{} metadata entries", expected.metadata.len()),
            format!("{} metadata entries", actual.metadata.len()),
            describe_sets("metadata", &missing, &extra),
        ));
    }
    for (key, e) in &expected.metadata {
        if let Some(a) = actual.metadata.get(key)
            && e != a
        {
            diffs.push(IRDifference::new(
                DifferenceType::Metadata,
                SourceLocation::default(),
                e.clone(),
                a.clone(),
                format!("metadata {key} changed"),
            ));
        }
    }
}

// ──────────────────── report ────────────────────

/// Deterministic text rendering, most severe differences first.
#[must_use]
pub fn generate_diff_report(result: &ComparisonResult) -> String {
    let s = &result.summary;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "IR comparison: {}",
        if result.equivalent { "EQUIVALENT" } else { "NOT EQUIVALENT" }
    );
    let _ = writeln!(out, "expected sha256: {}", s.expected_sha256);
    let _ = writeln!(out, "actual sha256:   {}", s.actual_sha256);
    let _ = writeln!(
        out,
        "differences: {} (critical {}, breaking {}, semantic {}, cosmetic {})",
        s.total_differences, s.critical, s.breaking, s.semantic, s.cosmetic
    );

    let mut ordered: Vec<&IRDifference> = result.differences.iter().collect();
    ordered.sort_by(|a, b| b.severity.cmp(&a.severity));
    for diff in ordered {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "[{}] {} at {}",
            diff.severity,
            diff.difference_type,
            diff.location.render()
        );
        let _ = writeln!(out, "  {}", diff.description);
        if !diff.expected.is_empty() || !diff.actual.is_empty() {
            let _ = writeln!(out, "  - expected: {}", diff.expected);
            let _ = writeln!(out, "  + actual:   {}", diff.actual);
        }
    }
    out
}
