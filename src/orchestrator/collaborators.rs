//! Seams to the outside world: compiler, golden references, probes, hooks.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::contract::model::{OptimizationLevel, Platform};
use crate::core::errors::{DcvError, Result};
use crate::perf::probe::DispatchProbe;
use crate::registry::codes::ErrorCode;

/// Stderr kept in a compilation error.
const MAX_STDERR_CHARS: usize = 4000;

// ──────────────────── IR generation ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("compiler {program:?} could not be started: {details}")]
    Unavailable { program: String, details: String },

    #[error("compiler exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("compiler produced no IR")]
    EmptyOutput,
}

impl CompilationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable { .. } => ErrorCode::CompilerUnavailable,
            Self::Failed { .. } => ErrorCode::CompilerInvocationFailed,
            Self::EmptyOutput => ErrorCode::EmptyIrOutput,
        }
    }

    /// Only a compiler that ran and failed is worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One IR-generation request.
#[derive(Debug, Clone, Copy)]
pub struct IrRequest<'a> {
    pub test: &'a str,
    pub source: &'a Path,
    pub platform: Platform,
    pub optimization: OptimizationLevel,
    pub env: &'a BTreeMap<String, String>,
}

pub trait IrGenerator: Send + Sync {
    fn generate(&self, request: &IrRequest<'_>) -> std::result::Result<String, CompilationError>;
}

/// Runs the configured argv template and captures stdout as IR.
#[derive(Debug, Clone)]
pub struct CommandIrGenerator {
    argv: Vec<String>,
}

impl CommandIrGenerator {
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// The argv with placeholders filled in for `request`.
    #[must_use]
    pub fn render(&self, request: &IrRequest<'_>) -> Vec<String> {
        let source = request.source.to_string_lossy();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{source}", &source)
                    .replace("{platform}", request.platform.as_str())
                    .replace("{opt}", request.optimization.as_str())
            })
            .collect()
    }
}

impl IrGenerator for CommandIrGenerator {
    fn generate(&self, request: &IrRequest<'_>) -> std::result::Result<String, CompilationError> {
        let argv = self.render(request);
        let Some((program, args)) = argv.split_first() else {
            return Err(CompilationError::Unavailable {
                program: String::new(),
                details: "empty compiler command".to_string(),
            });
        };
        let output = Command::new(program)
            .args(args)
            .envs(request.env)
            .output()
            .map_err(|err| CompilationError::Unavailable {
                program: program.clone(),
                details: if err.kind() == ErrorKind::NotFound {
                    "not found on PATH".to_string()
                } else {
                    err.to_string()
                },
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompilationError::Failed {
                status: output.status.to_string(),
                stderr: stderr.chars().take(MAX_STDERR_CHARS).collect(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ──────────────────── golden references ────────────────────

pub trait GoldenStore: Send + Sync {
    fn load(&self, test: &str, platform: Platform, optimization: OptimizationLevel)
    -> Result<Option<String>>;
    fn store(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
        ir: &str,
    ) -> Result<()>;
}

/// `root/<test>/<platform>-<opt>.ll`
#[derive(Debug, Clone)]
pub struct FsGoldenStore {
    root: PathBuf,
}

impl FsGoldenStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn path_for(&self, test: &str, platform: Platform, optimization: OptimizationLevel) -> PathBuf {
        self.root
            .join(test)
            .join(format!("{platform}-{optimization}.ll"))
    }
}

impl GoldenStore for FsGoldenStore {
    fn load(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
    ) -> Result<Option<String>> {
        let path = self.path_for(test, platform, optimization);
        match fs::read_to_string(&path) {
            Ok(ir) => Ok(Some(ir)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(DcvError::io(&path, err)),
        }
    }

    fn store(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
        ir: &str,
    ) -> Result<()> {
        let path = self.path_for(test, platform, optimization);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| DcvError::io(parent, err))?;
        }
        fs::write(&path, ir).map_err(|err| DcvError::io(&path, err))
    }
}

type GoldenKey = (String, Platform, OptimizationLevel);

#[derive(Debug, Default)]
pub struct MemoryGoldenStore {
    entries: Mutex<HashMap<GoldenKey, String>>,
}

impl MemoryGoldenStore {
    pub fn insert(&self, test: &str, platform: Platform, optimization: OptimizationLevel, ir: &str) {
        self.entries
            .lock()
            .insert((test.to_string(), platform, optimization), ir.to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl GoldenStore for MemoryGoldenStore {
    fn load(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
    ) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .get(&(test.to_string(), platform, optimization))
            .cloned())
    }

    fn store(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
        ir: &str,
    ) -> Result<()> {
        self.insert(test, platform, optimization, ir);
        Ok(())
    }
}

// ──────────────────── probes ────────────────────

pub trait ProbeFactory: Send + Sync {
    fn create(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
    ) -> Option<Box<dyn DispatchProbe>>;
}

pub type ProbeBuilder =
    Arc<dyn Fn(Platform, OptimizationLevel) -> Box<dyn DispatchProbe> + Send + Sync>;

/// Probe builders keyed by test name.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    builders: HashMap<String, ProbeBuilder>,
}

impl ProbeRegistry {
    pub fn register<F>(&mut self, test: impl Into<String>, builder: F)
    where
        F: Fn(Platform, OptimizationLevel) -> Box<dyn DispatchProbe> + Send + Sync + 'static,
    {
        self.builders.insert(test.into(), Arc::new(builder));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl ProbeFactory for ProbeRegistry {
    fn create(
        &self,
        test: &str,
        platform: Platform,
        optimization: OptimizationLevel,
    ) -> Option<Box<dyn DispatchProbe>> {
        self.builders
            .get(test)
            .map(|build| build(platform, optimization))
    }
}

// ──────────────────── lifecycle hooks ────────────────────

pub trait LifecycleHooks: Send + Sync {
    fn setup(
        &self,
        test: &str,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::result::Result<(), String>;
    fn cleanup(
        &self,
        test: &str,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::result::Result<(), String>;
}

/// Runs each hook command through the platform shell, stopping at the first failure.
#[derive(Debug, Clone, Default)]
pub struct ShellHooks {
    working_dir: Option<PathBuf>,
}

impl ShellHooks {
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    fn run_all(
        &self,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::result::Result<(), String> {
        for command in commands {
            let mut cmd = shell_command(command);
            cmd.envs(env);
            if let Some(dir) = &self.working_dir {
                cmd.current_dir(dir);
            }
            let output = cmd
                .output()
                .map_err(|err| format!("`{command}` could not be started: {err}"))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(format!(
                    "`{command}` exited with {}: {}",
                    output.status,
                    stderr.trim()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

impl LifecycleHooks for ShellHooks {
    fn setup(
        &self,
        _test: &str,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::result::Result<(), String> {
        self.run_all(commands, env)
    }

    fn cleanup(
        &self,
        _test: &str,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::result::Result<(), String> {
        self.run_all(commands, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::probe::FnProbe;

    fn request<'a>(source: &'a Path, env: &'a BTreeMap<String, String>) -> IrRequest<'a> {
        IrRequest {
            test: "dispatch_basic",
            source,
            platform: Platform::Wasm32,
            optimization: OptimizationLevel::ReleaseSmall,
            env,
        }
    }

    #[test]
    fn argv_placeholders_are_substituted() {
        let generator = CommandIrGenerator::new(vec![
            "janus".to_string(),
            "--target={platform}".to_string(),
            "-O".to_string(),
            "{opt}".to_string(),
            "{source}".to_string(),
        ]);
        let env = BTreeMap::new();
        let argv = generator.render(&request(Path::new("cases/a.jan"), &env));
        assert_eq!(
            argv,
            vec!["janus", "--target=wasm32", "-O", "release_small", "cases/a.jan"]
        );
    }

    #[test]
    fn missing_compiler_is_unavailable() {
        let generator =
            CommandIrGenerator::new(vec!["dcv-no-such-compiler-7d1f".to_string(), "{source}".to_string()]);
        let env = BTreeMap::new();
        let err = generator
            .generate(&request(Path::new("a.jan"), &env))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CompilerUnavailable);
        assert!(!err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn compiler_stdout_and_env_are_captured() {
        let generator = CommandIrGenerator::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo \"; $DCV_MARK {platform}\"".to_string(),
            "{source}".to_string(),
        ]);
        let mut env = BTreeMap::new();
        env.insert("DCV_MARK".to_string(), "marked".to_string());
        let ir = generator.generate(&request(Path::new("a.jan"), &env)).unwrap();
        assert_eq!(ir.trim(), "; marked wasm32");
    }

    #[cfg(unix)]
    #[test]
    fn failing_compiler_is_retryable_invocation_failure() {
        let generator = CommandIrGenerator::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo broken >&2; exit 3".to_string(),
            "{source}".to_string(),
        ]);
        let env = BTreeMap::new();
        let err = generator
            .generate(&request(Path::new("a.jan"), &env))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CompilerInvocationFailed);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn fs_golden_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsGoldenStore::new(tmp.path());
        let (p, o) = (Platform::LinuxX86_64, OptimizationLevel::Debug);
        assert_eq!(store.load("t", p, o).unwrap(), None);
        store.store("t", p, o, "define void @f() {\n  ret void\n}\n").unwrap();
        assert!(tmp.path().join("t").join("linux_x86_64-debug.ll").exists());
        assert!(store.load("t", p, o).unwrap().unwrap().contains("@f"));
        assert_eq!(store.load("t", p, OptimizationLevel::ReleaseFast).unwrap(), None);
    }

    #[test]
    fn memory_golden_store_is_keyed_by_target() {
        let store = MemoryGoldenStore::default();
        store.insert("t", Platform::Wasm32, OptimizationLevel::Debug, "a");
        assert_eq!(
            store.load("t", Platform::Wasm32, OptimizationLevel::Debug).unwrap(),
            Some("a".to_string())
        );
        assert_eq!(store.load("t", Platform::Wasm32, OptimizationLevel::ReleaseFast).unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn probe_registry_builds_per_test() {
        let mut probes = ProbeRegistry::default();
        probes.register("t", |_, _| Box::new(FnProbe::new(|| Ok(()))));
        assert!(probes.create("t", Platform::Wasm32, OptimizationLevel::Debug).is_some());
        assert!(probes.create("other", Platform::Wasm32, OptimizationLevel::Debug).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn shell_hooks_stop_at_first_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let hooks = ShellHooks::in_dir(tmp.path());
        let env = BTreeMap::new();
        let commands = vec![
            "touch first".to_string(),
            "exit 7".to_string(),
            "touch never".to_string(),
        ];
        let err = hooks.setup("t", &commands, &env).unwrap_err();
        assert!(err.contains("exit 7"));
        assert!(tmp.path().join("first").exists());
        assert!(!tmp.path().join("never").exists());
        assert!(hooks.cleanup("t", &["true".to_string()], &env).is_ok());
    }
}
