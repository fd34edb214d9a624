//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use dispatch_contracts::contract::model::{OptimizationLevel, Platform};
use dispatch_contracts::contract::parser::parse_contract;
use dispatch_contracts::core::config::Config;
use dispatch_contracts::core::errors::DcvError;
use dispatch_contracts::ir::diff::{compare, generate_diff_report};
use dispatch_contracts::logger::events::{EventLoggerConfig, EventLoggerHandle, spawn_event_logger};
use dispatch_contracts::logger::jsonl::JsonlConfig;
use dispatch_contracts::orchestrator::case::{TestResult, TestStatus};
use dispatch_contracts::orchestrator::collaborators::{
    CommandIrGenerator, FsGoldenStore, ProbeRegistry, ShellHooks,
};
use dispatch_contracts::orchestrator::discovery::discover;
use dispatch_contracts::orchestrator::runner::{Collaborators, Orchestrator, RunOptions, RunReport};
use dispatch_contracts::perf::baseline::{BaselineKey, BaselineManager, BaselinePolicy};
use dispatch_contracts::registry::catalog::ErrorRegistry;
use dispatch_contracts::registry::codes::ErrorCode;

/// Dispatch Contract Validator: checks compiler dispatch lowering against annotated contracts.
#[derive(Debug, Parser)]
#[command(
    name = "dcv",
    author,
    version,
    about = "Dispatch Contract Validator",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Discover annotated tests and validate them across the target matrix.
    Run(RunArgs),
    /// Parse one test source and print its contract.
    Parse(ParseArgs),
    /// Semantically compare two IR files.
    Diff(DiffArgs),
    /// Show the catalog entry for an error code.
    Explain(ExplainArgs),
    /// Inspect stored performance baselines.
    Baseline(BaselineArgs),
    /// View the effective configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Test files or directories (falls back to configured discovery roots when omitted).
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
    /// Restrict to these platforms (repeatable).
    #[arg(long = "platform", value_name = "PLATFORM", value_parser = parse_platform)]
    platforms: Vec<Platform>,
    /// Restrict to these optimization levels (repeatable).
    #[arg(long = "opt", value_name = "LEVEL", value_parser = parse_optimization)]
    optimizations: Vec<OptimizationLevel>,
    /// Worker pool size.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
    /// Run every case serially.
    #[arg(long)]
    sequential: bool,
    /// Store generated IR as the golden reference when none exists.
    #[arg(long)]
    approve: bool,
}

#[derive(Debug, Clone, Args)]
struct ParseArgs {
    /// Annotated test source.
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct DiffArgs {
    /// Reference IR.
    #[arg(value_name = "EXPECTED")]
    expected: PathBuf,
    /// Candidate IR.
    #[arg(value_name = "ACTUAL")]
    actual: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ExplainArgs {
    /// Code such as `DCV-2001` or `2001`.
    #[arg(value_name = "CODE", value_parser = parse_error_code)]
    code: ErrorCode,
}

#[derive(Debug, Clone, Args)]
struct BaselineArgs {
    #[command(subcommand)]
    command: BaselineCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum BaselineCommand {
    /// Print the version history of one baseline.
    Show(BaselineShowArgs),
}

#[derive(Debug, Clone, Args)]
struct BaselineShowArgs {
    /// Test name as reported by `dcv run`.
    #[arg(value_name = "TEST")]
    test: String,
    #[arg(long, value_name = "PLATFORM", value_parser = parse_platform)]
    platform: Option<Platform>,
    #[arg(long = "opt", value_name = "LEVEL", value_parser = parse_optimization)]
    optimization: Option<OptimizationLevel>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Validation ran and found problems.
    #[error("{0}")]
    Failed(String),
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Failed(_) => 1,
            Self::User(_) => 2,
            Self::Runtime(_) | Self::Io(_) => 3,
            Self::Json(_) => 4,
        }
    }
}

impl From<DcvError> for CliError {
    fn from(err: DcvError) -> Self {
        match err {
            DcvError::InvalidConfig { .. }
            | DcvError::MissingConfig { .. }
            | DcvError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_validation(cli, args),
        Command::Parse(args) => run_parse(cli, args),
        Command::Diff(args) => run_diff(cli, args),
        Command::Explain(args) => run_explain(cli, args),
        Command::Baseline(args) => match &args.command {
            BaselineCommand::Show(show) => run_baseline_show(cli, show),
        },
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn parse_platform(raw: &str) -> Result<Platform, String> {
    Platform::parse(raw).ok_or_else(|| format!("unknown platform: {raw}"))
}

fn parse_optimization(raw: &str) -> Result<OptimizationLevel, String> {
    OptimizationLevel::parse(raw).ok_or_else(|| format!("unknown optimization level: {raw}"))
}

fn parse_error_code(raw: &str) -> Result<ErrorCode, String> {
    raw.parse()
}

// ──────────────────── run ────────────────────

fn run_validation(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_run_overrides(&mut config, args);

    let roots = if args.paths.is_empty() {
        config.discovery.roots.clone()
    } else {
        args.paths.clone()
    };
    let cases = discover(&roots, &config.discovery.extensions, config.discovery.max_depth)?;
    if cases.is_empty() {
        return Err(CliError::User(format!(
            "no annotated test sources found under {}",
            roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let (logger, logger_join) = match spawn_event_logger(EventLoggerConfig::new(JsonlConfig::at(
        config.paths.jsonl_log.clone(),
    ))) {
        Ok((handle, join)) => (handle, Some(join)),
        Err(err) => {
            eprintln!("[{}] event log disabled: {err}", err.code());
            (EventLoggerHandle::disabled(), None)
        }
    };

    let store = config.open_baseline_store()?;
    let policy = BaselinePolicy::from_config(&config.baseline, config.performance.regression_threshold);
    let collaborators = Collaborators {
        generator: Arc::new(CommandIrGenerator::new(config.compiler.command.clone())),
        goldens: Arc::new(FsGoldenStore::new(config.paths.golden_dir.clone())),
        probes: Arc::new(ProbeRegistry::default()),
        hooks: Arc::new(ShellHooks::default()),
    };
    let orchestrator = Orchestrator::new(
        RunOptions::from_config(&config),
        collaborators,
        Arc::new(ErrorRegistry::builtin()),
        Arc::new(BaselineManager::new(store, policy)),
        logger.clone(),
    );

    let report = orchestrator.run(&cases);

    logger.shutdown();
    if let Some(join) = logger_join {
        let _ = join.join();
    }

    match output_mode(cli) {
        OutputMode::Human => print_report_human(&report),
        OutputMode::Json => print_report_json(&report)?,
    }

    if report.summary.is_clean() {
        Ok(())
    } else {
        Err(CliError::Failed(report.summary.to_string()))
    }
}

fn apply_run_overrides(config: &mut Config, args: &RunArgs) {
    if !args.platforms.is_empty() {
        config.targets.platforms.clone_from(&args.platforms);
    }
    if !args.optimizations.is_empty() {
        config.targets.optimization_levels.clone_from(&args.optimizations);
    }
    if let Some(workers) = args.workers {
        config.orchestrator.max_workers = workers.max(1);
    }
    if args.sequential {
        config.orchestrator.parallel = false;
    }
    if args.approve {
        config.orchestrator.approve_missing_golden = true;
    }
}

fn status_tag(status: TestStatus) -> colored::ColoredString {
    match status {
        TestStatus::Passed => "PASS".green().bold(),
        TestStatus::Failed => "FAIL".red().bold(),
        TestStatus::ApprovalRequired => "APPROVE".yellow().bold(),
        TestStatus::Skipped => "SKIP".dimmed(),
        TestStatus::FrameworkError => "ERROR".magenta().bold(),
        TestStatus::Timeout => "TIMEOUT".red(),
    }
}

fn print_report_human(report: &RunReport) {
    for result in &report.results {
        println!(
            "{:>8}  {}  ({})",
            status_tag(result.status),
            result.label(),
            format_duration(result.duration)
        );
    }

    let failing: Vec<&TestResult> = report
        .results
        .iter()
        .filter(|r| r.rendered_report.is_some())
        .collect();
    if !failing.is_empty() {
        println!();
        for result in failing {
            println!("{}", format!("── {} ──", result.label()).bold());
            if let Some(rendered) = &result.rendered_report {
                println!("{rendered}");
            }
        }
    }

    println!();
    let line = report.summary.to_string();
    if report.summary.is_clean() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
    println!("run {} finished in {}", report.run_id, format_duration(report.duration));
}

fn print_report_json(report: &RunReport) -> Result<(), CliError> {
    for result in &report.results {
        write_json_line(&json!({
            "type": "result",
            "test": result.test,
            "platform": result.platform,
            "optimization": result.optimization,
            "status": result.status,
            "error_code": result.primary_code().map(|c| c.to_string()),
            "duration_ms": u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            "diagnostics": result.diagnostics,
            "failures": result.failures,
            "report": result.rendered_report,
        }))?;
    }
    write_json_line(&json!({
        "type": "summary",
        "run_id": report.run_id,
        "summary": report.summary,
        "exit_code": report.summary.exit_code(),
    }))
}

// ──────────────────── parse / diff / explain ────────────────────

fn run_parse(cli: &Cli, args: &ParseArgs) -> Result<(), CliError> {
    let source = read_file(&args.file)?;
    let name = args
        .file
        .file_stem()
        .map_or_else(|| args.file.display().to_string(), |s| s.to_string_lossy().into_owned());
    let contract = parse_contract(&name, &source)
        .map_err(|err| CliError::Failed(format!("[{}] {err}", err.code())))?;

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&contract)?),
        OutputMode::Human => {
            println!("{}", contract.name.bold());
            if let Some(description) = &contract.description {
                println!("  description: {description}");
            }
            if let Some(strategy) = contract.expected_strategy {
                println!("  expected strategy: {strategy}");
            }
            if !contract.fallback_strategies.is_empty() {
                let names: Vec<String> =
                    contract.fallback_strategies.iter().map(ToString::to_string).collect();
                println!("  fallbacks: {}", names.join(", "));
            }
            for expectation in &contract.performance {
                println!("  performance: {}", expectation.describe());
            }
            for rule in &contract.validation_rules {
                println!("  rule: {rule}");
            }
            for gate in &contract.quality_gates {
                println!("  gate: {gate}");
            }
            for dep in &contract.dependencies {
                let kind = if dep.required { "requires" } else { "after" };
                println!("  {kind}: {}", dep.test);
            }
            println!(
                "  timeout: {}s, retries: {}, parallel: {}",
                contract.execution.timeout.as_secs(),
                contract.execution.max_retries,
                contract.execution.parallel
            );
            Ok(())
        }
    }
}

fn run_diff(cli: &Cli, args: &DiffArgs) -> Result<(), CliError> {
    let expected = read_file(&args.expected)?;
    let actual = read_file(&args.actual)?;
    let result = compare(&expected, &actual);

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&result)?)?,
        OutputMode::Human => print!("{}", generate_diff_report(&result)),
    }

    if result.equivalent {
        Ok(())
    } else {
        Err(CliError::Failed(format!(
            "IR not equivalent: {} difference(s), {} breaking or worse",
            result.summary.total_differences,
            result.summary.breaking + result.summary.critical
        )))
    }
}

fn run_explain(cli: &Cli, args: &ExplainArgs) -> Result<(), CliError> {
    let registry = ErrorRegistry::builtin();
    let info = registry.get_error_info(args.code)?;

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&json!({
            "code": info.code.to_string(),
            "title": info.title,
            "description": info.description,
            "category": info.category.as_str(),
            "severity": info.severity.as_str(),
            "remediation": info.remediation,
            "documentation": info.documentation,
        })),
        OutputMode::Human => {
            println!("{} {}", format!("[{}]", info.code).bold(), info.title);
            println!("  category: {}  severity: {}", info.category, info.severity);
            println!("  {}", info.description);
            if !info.remediation.is_empty() {
                println!("  remediation:");
                for (i, step) in info.remediation.iter().enumerate() {
                    println!("    {}. {step}", i + 1);
                }
            }
            if let Some(doc) = info.documentation {
                println!("  docs: {doc}");
            }
            Ok(())
        }
    }
}

// ──────────────────── baseline / config ────────────────────

fn run_baseline_show(cli: &Cli, args: &BaselineShowArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let platform = args.platform.unwrap_or_else(Platform::host);
    let optimization = args
        .optimization
        .or_else(|| config.targets.optimization_levels.first().copied())
        .unwrap_or(OptimizationLevel::Debug);
    let key = BaselineKey::new(&args.test, platform, optimization);

    let policy = BaselinePolicy::from_config(&config.baseline, config.performance.regression_threshold);
    let manager = BaselineManager::new(config.open_baseline_store()?, policy);
    let Some(history) = manager.load_history(&key)? else {
        return Err(CliError::User(format!("no baseline recorded for {key}")));
    };

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&history)?),
        OutputMode::Human => {
            println!("{}", key.to_string().bold());
            for version in &history.versions {
                let current = if history.current_version == Some(version.version) {
                    "*".green().bold()
                } else {
                    " ".normal()
                };
                let s = &version.baseline.summary;
                println!(
                    "{current} v{:<3} {}  mean {:.2}ns ±{:.2}  n={}  compiler {}",
                    version.version,
                    version.created_at.format("%Y-%m-%d %H:%M:%S"),
                    s.mean,
                    s.stddev,
                    s.sample_count,
                    version.compiler_version
                );
                println!("         {}", version.justification.dimmed());
            }
            Ok(())
        }
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let command = args.command.clone().unwrap_or(ConfigCommand::Show);
    match command {
        ConfigCommand::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => write_json_line(&json!({ "path": path }))?,
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Json => write_json_line(&serde_json::to_value(&config)?)?,
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|err| CliError::Runtime(format!("failed to render config: {err}")))?;
                    print!("{rendered}");
                }
            }
            Ok(())
        }
        ConfigCommand::Validate => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;
            match output_mode(cli) {
                OutputMode::Human => println!("{} (hash {hash})", "config ok".green()),
                OutputMode::Json => write_json_line(&json!({ "valid": true, "hash": hash }))?,
            }
            Ok(())
        }
    }
}

// ──────────────────── helpers ────────────────────

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|err| CliError::User(format!("cannot read {}: {err}", path.display())))
}

fn format_duration(duration: std::time::Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DCV_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
