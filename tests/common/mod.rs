#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dispatch_contracts::contract::model::{OptimizationLevel, Platform};
use dispatch_contracts::logger::events::EventLoggerHandle;
use dispatch_contracts::orchestrator::collaborators::{
    CompilationError, IrGenerator, IrRequest, MemoryGoldenStore, ProbeRegistry, ShellHooks,
};
use dispatch_contracts::orchestrator::discovery::DiscoveredCase;
use dispatch_contracts::orchestrator::runner::{Collaborators, Orchestrator, RunOptions};
use dispatch_contracts::perf::baseline::{BaselineManager, BaselinePolicy};
use dispatch_contracts::perf::store::{BaselineStore, MemoryBaselineStore};
use dispatch_contracts::registry::catalog::ErrorRegistry;

// ──────────────────── CLI harness ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dcv") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dcv.exe" } else { "dcv" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dcv binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("dcv-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .envs(env.iter().copied())
        .env("DCV_OUTPUT_FORMAT", "human")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute dcv command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

pub fn write_file(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, body).expect("write fixture");
}

// ──────────────────── IR fixtures ────────────────────

pub const SWITCH_IR: &str = "\
define i32 @dispatch(i32 %k) {
entry:
  switch i32 %k, label %d [
    i32 0, label %a
    i32 1, label %b
  ]
a:
  ret i32 10
b:
  ret i32 20
d:
  ret i32 0
}
";

pub const CHAIN_IR: &str = "\
define i32 @dispatch(i32 %k) {
entry:
  %c0 = icmp eq i32 %k, 0
  br i1 %c0, label %a, label %n1
n1:
  %c1 = icmp eq i32 %k, 1
  br i1 %c1, label %b, label %d
a:
  ret i32 10
b:
  ret i32 20
d:
  ret i32 0
}
";

// ──────────────────── in-process orchestration ────────────────────

/// Generator that serves canned IR per test name.
#[derive(Default)]
pub struct CannedGenerator {
    ir: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    failures_before_success: HashMap<String, usize>,
    pub calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn with(mut self, test: &str, ir: &str) -> Self {
        self.ir.insert(test.to_string(), ir.to_string());
        self
    }

    pub fn slow(mut self, test: &str, delay: Duration) -> Self {
        self.delays.insert(test.to_string(), delay);
        self
    }

    pub fn flaky(mut self, test: &str, failures: usize) -> Self {
        self.failures_before_success.insert(test.to_string(), failures);
        self
    }
}

impl IrGenerator for CannedGenerator {
    fn generate(&self, request: &IrRequest<'_>) -> Result<String, CompilationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(request.test) {
            std::thread::sleep(*delay);
        }
        if let Some(failures) = self.failures_before_success.get(request.test)
            && call < *failures
        {
            return Err(CompilationError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "transient failure".to_string(),
            });
        }
        self.ir
            .get(request.test)
            .cloned()
            .ok_or(CompilationError::EmptyOutput)
    }
}

pub fn case(name: &str, source: &str) -> DiscoveredCase {
    DiscoveredCase::new(name, format!("/virtual/{name}.jan"), source)
}

pub fn options() -> RunOptions {
    RunOptions {
        platforms: vec![Platform::LinuxX86_64],
        optimizations: vec![OptimizationLevel::Debug],
        max_workers: 2,
        default_timeout: Duration::from_secs(10),
        retry_backoff: Duration::from_millis(1),
        sample_count: 5,
        ..RunOptions::default()
    }
}

pub struct Harness {
    pub goldens: Arc<MemoryGoldenStore>,
    pub baselines: Arc<MemoryBaselineStore>,
    pub probes: ProbeRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            goldens: Arc::new(MemoryGoldenStore::default()),
            baselines: Arc::new(MemoryBaselineStore::default()),
            probes: ProbeRegistry::default(),
        }
    }

    pub fn golden(&self, test: &str, ir: &str) {
        self.goldens
            .insert(test, Platform::LinuxX86_64, OptimizationLevel::Debug, ir);
    }

    pub fn orchestrator(&self, options: RunOptions, generator: Arc<dyn IrGenerator>) -> Orchestrator {
        let store: Arc<dyn BaselineStore> = self.baselines.clone();
        Orchestrator::new(
            options,
            Collaborators {
                generator,
                goldens: self.goldens.clone(),
                probes: Arc::new(self.probes.clone()),
                hooks: Arc::new(ShellHooks::default()),
            },
            Arc::new(ErrorRegistry::builtin()),
            Arc::new(BaselineManager::new(store, BaselinePolicy::default())),
            EventLoggerHandle::disabled(),
        )
    }
}
