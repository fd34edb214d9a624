//! Structural parse of textual IR into functions, globals, types and metadata.
//!
//! Parsing never fails. Lines that fit no known shape are collected as
//! [`ParseIssue`]s and the rest of the module is still returned.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrInstruction {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrBlock {
    pub label: String,
    pub line: usize,
    pub instructions: Vec<IrInstruction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrFunction {
    pub name: String,
    /// Header without the body brace and attribute-group references.
    pub signature: String,
    pub is_declaration: bool,
    pub line: usize,
    pub blocks: Vec<IrBlock>,
}

impl IrFunction {
    pub fn instructions(&self) -> impl Iterator<Item = &IrInstruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrGlobal {
    pub name: String,
    pub value: String,
    pub line: usize,
}

impl IrGlobal {
    /// Array of pointers, or a name that says jump/dispatch/vtable table.
    #[must_use]
    pub fn is_function_table(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        let array_of_ptr = self.value.contains(" x ptr]") || self.value.contains(" x ptr ]");
        array_of_ptr
            || name.contains("dispatch_table")
            || name.contains("jump_table")
            || name.contains("vtable")
    }

    #[must_use]
    pub fn is_cache(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        name.contains("cache") || name.ends_with("_ic") || name.contains(".ic.")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrTypeDef {
    pub name: String,
    pub body: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseIssue {
    pub line: usize,
    pub text: String,
    pub reason: &'static str,
}

/// Parsed IR module. Collections are keyed by name for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IrModule {
    pub functions: BTreeMap<String, IrFunction>,
    pub globals: BTreeMap<String, IrGlobal>,
    pub types: BTreeMap<String, IrTypeDef>,
    pub metadata: BTreeMap<String, String>,
    pub issues: Vec<ParseIssue>,
}

impl IrModule {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Parser::default().run(text)
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    #[must_use]
    pub fn defined_functions(&self) -> usize {
        self.functions.values().filter(|f| !f.is_declaration).count()
    }

    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.functions.values().map(IrFunction::instruction_count).sum()
    }

    #[must_use]
    pub fn type_names(&self) -> BTreeSet<&str> {
        self.types.keys().map(String::as_str).collect()
    }
}

// ──────────────────── line handling ────────────────────

/// Drop a `;` comment, respecting double-quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quote = !in_quote,
            ';' if !in_quote => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attachment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*![A-Za-z_][\w.]*\s+!\d+").expect("attachment regex"))
}

fn attribute_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s#\d+").expect("attribute ref regex"))
}

/// Remove `, !dbg !12` style metadata attachments from an instruction.
fn strip_attachments(line: &str) -> String {
    attachment_re().replace_all(line, "").into_owned()
}

fn bracket_delta(line: &str) -> i32 {
    let mut depth = 0;
    let mut in_quote = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            '[' | '{' if !in_quote => depth += 1,
            ']' | '}' if !in_quote => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// `@name` → `name` for `define`/`declare` headers.
fn function_name(header: &str) -> Option<String> {
    let at = header.find('@')?;
    let rest = &header[at + 1..];
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(quoted[..end].to_string());
    }
    let end = rest.find('(')?;
    let name = rest[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn block_label(line: &str) -> Option<&str> {
    let label = line.strip_suffix(':')?;
    let ok = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '$'));
    ok.then_some(label)
}

// ──────────────────── parser ────────────────────

#[derive(Default)]
struct Parser {
    module: IrModule,
    current: Option<IrFunction>,
    pending: Option<(usize, String)>,
}

impl Parser {
    fn run(mut self, text: &str) -> IrModule {
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let stripped = strip_comment(raw).trim();
            if stripped.is_empty() {
                continue;
            }

            // Continuation of a multi-line construct such as a switch case list.
            if let Some((start, mut buffer)) = self.pending.take() {
                buffer.push(' ');
                buffer.push_str(stripped);
                if bracket_delta(&buffer) > 0 {
                    self.pending = Some((start, buffer));
                } else {
                    self.logical_line(start, &collapse_whitespace(&buffer));
                }
                continue;
            }

            let opens_body = stripped.starts_with("define ");
            if !opens_body && bracket_delta(stripped) > 0 {
                self.pending = Some((line_no, stripped.to_string()));
                continue;
            }
            self.logical_line(line_no, &collapse_whitespace(stripped));
        }

        if let Some((line, text)) = self.pending.take() {
            self.issue(line, text, "unterminated bracket");
        }
        if let Some(function) = self.current.take() {
            let line = function.line;
            let name = function.name.clone();
            self.issue(line, format!("define @{name}"), "unterminated function body");
            self.module.functions.insert(name, function);
        }
        self.module
    }

    fn issue(&mut self, line: usize, text: String, reason: &'static str) {
        self.module.issues.push(ParseIssue { line, text, reason });
    }

    fn logical_line(&mut self, line_no: usize, line: &str) {
        if self.current.is_some() {
            self.body_line(line_no, line);
        } else {
            self.top_level_line(line_no, line);
        }
    }

    fn body_line(&mut self, line_no: usize, line: &str) {
        let Some(function) = self.current.as_mut() else {
            return;
        };
        if line == "}" {
            if let Some(done) = self.current.take() {
                self.module.functions.insert(done.name.clone(), done);
            }
            return;
        }
        if let Some(label) = block_label(line) {
            function.blocks.push(IrBlock {
                label: label.to_string(),
                line: line_no,
                instructions: Vec::new(),
            });
            return;
        }
        if function.blocks.is_empty() {
            function.blocks.push(IrBlock {
                label: "entry".to_string(),
                line: line_no,
                instructions: Vec::new(),
            });
        }
        if let Some(block) = function.blocks.last_mut() {
            block.instructions.push(IrInstruction {
                text: strip_attachments(line),
                line: line_no,
            });
        }
    }

    fn top_level_line(&mut self, line_no: usize, line: &str) {
        if line.starts_with("define ") {
            let Some(header) = line.strip_suffix('{').map(str::trim_end) else {
                self.issue(line_no, line.to_string(), "function definition without body");
                return;
            };
            let Some(name) = function_name(header) else {
                self.issue(line_no, line.to_string(), "function definition without name");
                return;
            };
            self.current = Some(IrFunction {
                name,
                signature: normalize_header(header),
                is_declaration: false,
                line: line_no,
                blocks: Vec::new(),
            });
        } else if line.starts_with("declare ") {
            match function_name(line) {
                Some(name) => {
                    self.module.functions.insert(
                        name.clone(),
                        IrFunction {
                            name,
                            signature: normalize_header(line),
                            is_declaration: true,
                            line: line_no,
                            blocks: Vec::new(),
                        },
                    );
                }
                None => self.issue(line_no, line.to_string(), "declaration without name"),
            }
        } else if line.starts_with('@') {
            match line.split_once('=') {
                Some((name, value)) => {
                    let name = name.trim().trim_start_matches('@').to_string();
                    self.module.globals.insert(
                        name.clone(),
                        IrGlobal {
                            name,
                            value: strip_attachments(value.trim()),
                            line: line_no,
                        },
                    );
                }
                None => self.issue(line_no, line.to_string(), "global without initializer"),
            }
        } else if line.starts_with('%') && line.contains("= type") {
            if let Some((name, body)) = line.split_once("= type") {
                let name = name.trim().to_string();
                self.module.types.insert(
                    name.clone(),
                    IrTypeDef {
                        name,
                        body: body.trim().to_string(),
                        line: line_no,
                    },
                );
            }
        } else if line.starts_with('!') {
            let (key, value) = line.split_once('=').unwrap_or((line, ""));
            self.module
                .metadata
                .insert(key.trim().to_string(), value.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("attributes ") {
            let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
            self.module
                .metadata
                .insert(format!("attributes {}", key.trim()), value.trim().to_string());
        } else if line.starts_with("target ") || line.starts_with("source_filename") {
            let (key, value) = line.split_once('=').unwrap_or((line, ""));
            self.module
                .metadata
                .insert(key.trim().to_string(), value.trim().to_string());
        } else if line.starts_with("module asm") {
            self.module
                .metadata
                .entry("module asm".to_string())
                .or_default()
                .push_str(line);
        } else {
            self.issue(line_no, line.to_string(), "unrecognized top-level line");
        }
    }
}

fn normalize_header(header: &str) -> String {
    collapse_whitespace(&attribute_ref_re().replace_all(header, ""))
}
