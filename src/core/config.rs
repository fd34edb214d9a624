//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contract::model::{OptimizationLevel, Platform};
use crate::core::errors::{DcvError, Result};

/// Full DCV configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub discovery: DiscoveryConfig,
    pub targets: TargetsConfig,
    pub performance: PerformanceConfig,
    pub baseline: BaselineConfig,
    pub compiler: CompilerConfig,
    pub paths: PathsConfig,
}

/// What to do when a contract declares performance bounds but no probe exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingProbePolicy {
    /// Record a warning and skip the performance phase.
    #[default]
    Skip,
    /// Treat the case as a framework error.
    Error,
}

impl MissingProbePolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineBackend {
    #[default]
    Json,
    Sqlite,
}

impl BaselineBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Scheduling and per-case policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_workers: usize,
    /// When false every case runs on the calling thread in order.
    pub parallel: bool,
    /// Applied to contracts without an explicit `timeout:` directive.
    pub default_timeout_secs: u64,
    /// Base delay before an IR-generation retry; jitter is added on top.
    pub retry_backoff_ms: u64,
    /// Store missing golden references instead of reporting ApprovalRequired.
    pub approve_missing_golden: bool,
    pub missing_probe: MissingProbePolicy,
}

/// Where test sources are found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub roots: Vec<PathBuf>,
    /// File extensions (without dot) considered test sources.
    pub extensions: Vec<String>,
    pub max_depth: usize,
}

/// Run matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetsConfig {
    pub platforms: Vec<Platform>,
    pub optimization_levels: Vec<OptimizationLevel>,
}

/// Benchmark sizing and regression policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    pub warmup_iterations: u32,
    pub measurement_iterations: u32,
    /// Measurements collected per case.
    pub sample_count: usize,
    pub regression_threshold: f64,
    pub confidence_level: f64,
}

/// Baseline history analysis and storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaselineConfig {
    pub trend_window: usize,
    pub volatility_threshold: f64,
    pub slope_threshold: f64,
    pub backend: BaselineBackend,
}

/// Compiler under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Argv template; `{source}`, `{platform}` and `{opt}` are substituted.
    pub command: Vec<String>,
    /// Recorded with every baseline version.
    pub version: String,
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub golden_dir: PathBuf,
    pub baseline_dir: PathBuf,
    pub sqlite_db: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            parallel: true,
            default_timeout_secs: 30,
            retry_backoff_ms: 250,
            approve_missing_golden: false,
            missing_probe: MissingProbePolicy::Skip,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("tests/dispatch")],
            extensions: vec!["jan".to_string()],
            max_depth: 8,
        }
    }
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            platforms: vec![Platform::host()],
            optimization_levels: vec![OptimizationLevel::Debug, OptimizationLevel::ReleaseFast],
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: 100,
            measurement_iterations: 1000,
            sample_count: 30,
            regression_threshold: 0.10,
            confidence_level: 0.95,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            trend_window: 20,
            volatility_threshold: 0.20,
            slope_threshold: 0.01,
            backend: BaselineBackend::Json,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "janus".to_string(),
                "build".to_string(),
                "--emit=llvm-ir".to_string(),
                "--target={platform}".to_string(),
                "--mode={opt}".to_string(),
                "{source}".to_string(),
            ],
            version: "unknown".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[DCV-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("dcv").join("config.toml");
        let data = home_dir.join(".local").join("share").join("dcv");
        Self {
            config_file: cfg,
            golden_dir: data.join("golden"),
            baseline_dir: data.join("baselines"),
            sqlite_db: data.join("baselines.sqlite3"),
            jsonl_log: data.join("runs.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DcvError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DcvError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for run logs.
    ///
    /// FNV-1a over canonical JSON, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Store implied by `baseline.backend`.
    pub fn open_baseline_store(&self) -> Result<std::sync::Arc<dyn crate::perf::BaselineStore>> {
        match self.baseline.backend {
            BaselineBackend::Json => Ok(std::sync::Arc::new(crate::perf::JsonBaselineStore::new(
                self.paths.baseline_dir.clone(),
            ))),
            #[cfg(feature = "sqlite")]
            BaselineBackend::Sqlite => Ok(std::sync::Arc::new(
                crate::perf::store::SqliteBaselineStore::open(&self.paths.sqlite_db)?,
            )),
            #[cfg(not(feature = "sqlite"))]
            BaselineBackend::Sqlite => Err(DcvError::InvalidConfig {
                details: "baseline.backend = \"sqlite\" requires the sqlite feature".to_string(),
            }),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        // orchestrator
        env.usize("DCV_ORCHESTRATOR_MAX_WORKERS", &mut self.orchestrator.max_workers)?;
        env.bool("DCV_ORCHESTRATOR_PARALLEL", &mut self.orchestrator.parallel)?;
        env.u64(
            "DCV_ORCHESTRATOR_DEFAULT_TIMEOUT_SECS",
            &mut self.orchestrator.default_timeout_secs,
        )?;
        env.u64(
            "DCV_ORCHESTRATOR_RETRY_BACKOFF_MS",
            &mut self.orchestrator.retry_backoff_ms,
        )?;
        env.bool(
            "DCV_ORCHESTRATOR_APPROVE_MISSING_GOLDEN",
            &mut self.orchestrator.approve_missing_golden,
        )?;
        if let Some(raw) = env.get("DCV_ORCHESTRATOR_MISSING_PROBE") {
            self.orchestrator.missing_probe =
                MissingProbePolicy::parse(&raw).ok_or_else(|| env_error(
                    "DCV_ORCHESTRATOR_MISSING_PROBE",
                    &raw,
                    "expected skip|error",
                ))?;
        }

        // discovery
        if let Some(raw) = env.get("DCV_DISCOVERY_ROOTS") {
            self.discovery.roots = env::split_paths(&raw).collect();
        }
        if let Some(raw) = env.get("DCV_DISCOVERY_EXTENSIONS") {
            self.discovery.extensions = split_list(&raw)
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect();
        }
        env.usize("DCV_DISCOVERY_MAX_DEPTH", &mut self.discovery.max_depth)?;

        // targets
        if let Some(raw) = env.get("DCV_TARGETS_PLATFORMS") {
            self.targets.platforms = split_list(&raw)
                .map(|item| {
                    Platform::parse(item).ok_or_else(|| {
                        env_error("DCV_TARGETS_PLATFORMS", item, "unknown platform")
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = env.get("DCV_TARGETS_OPTIMIZATION_LEVELS") {
            self.targets.optimization_levels = split_list(&raw)
                .map(|item| {
                    OptimizationLevel::parse(item).ok_or_else(|| {
                        env_error(
                            "DCV_TARGETS_OPTIMIZATION_LEVELS",
                            item,
                            "unknown optimization level",
                        )
                    })
                })
                .collect::<Result<_>>()?;
        }

        // performance
        env.u32(
            "DCV_PERFORMANCE_WARMUP_ITERATIONS",
            &mut self.performance.warmup_iterations,
        )?;
        env.u32(
            "DCV_PERFORMANCE_MEASUREMENT_ITERATIONS",
            &mut self.performance.measurement_iterations,
        )?;
        env.usize("DCV_PERFORMANCE_SAMPLE_COUNT", &mut self.performance.sample_count)?;
        env.f64(
            "DCV_PERFORMANCE_REGRESSION_THRESHOLD",
            &mut self.performance.regression_threshold,
        )?;
        env.f64(
            "DCV_PERFORMANCE_CONFIDENCE_LEVEL",
            &mut self.performance.confidence_level,
        )?;

        // baseline
        env.usize("DCV_BASELINE_TREND_WINDOW", &mut self.baseline.trend_window)?;
        env.f64(
            "DCV_BASELINE_VOLATILITY_THRESHOLD",
            &mut self.baseline.volatility_threshold,
        )?;
        env.f64("DCV_BASELINE_SLOPE_THRESHOLD", &mut self.baseline.slope_threshold)?;
        if let Some(raw) = env.get("DCV_BASELINE_BACKEND") {
            self.baseline.backend = BaselineBackend::parse(&raw)
                .ok_or_else(|| env_error("DCV_BASELINE_BACKEND", &raw, "expected json|sqlite"))?;
        }

        // compiler
        if let Some(raw) = env.get("DCV_COMPILER_COMMAND") {
            self.compiler.command = raw.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = env.get("DCV_COMPILER_VERSION") {
            self.compiler.version = raw;
        }

        // paths
        for (name, slot) in [
            ("DCV_PATHS_GOLDEN_DIR", &mut self.paths.golden_dir),
            ("DCV_PATHS_BASELINE_DIR", &mut self.paths.baseline_dir),
            ("DCV_PATHS_SQLITE_DB", &mut self.paths.sqlite_db),
            ("DCV_PATHS_JSONL_LOG", &mut self.paths.jsonl_log),
        ] {
            if let Some(raw) = env.get(name) {
                *slot = PathBuf::from(raw);
            }
        }

        Ok(())
    }

    /// Strip trailing slashes and `.` components so roots compare equal.
    fn normalize_paths(&mut self) {
        for path in &mut self.discovery.roots {
            *path = normalize_syntactic(path);
        }
        for ext in &mut self.discovery.extensions {
            *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        }
        self.targets.platforms.sort_unstable();
        self.targets.platforms.dedup();
        self.targets.optimization_levels.sort_unstable();
        self.targets.optimization_levels.dedup();
    }

    fn validate(&self) -> Result<()> {
        if self.orchestrator.max_workers == 0 {
            return Err(invalid("orchestrator.max_workers must be >= 1"));
        }
        if self.orchestrator.default_timeout_secs == 0 {
            return Err(invalid("orchestrator.default_timeout_secs must be >= 1"));
        }
        if self.discovery.extensions.iter().all(String::is_empty) {
            return Err(invalid("discovery.extensions must name at least one extension"));
        }
        if self.targets.platforms.is_empty() || self.targets.optimization_levels.is_empty() {
            return Err(invalid(
                "targets.platforms and targets.optimization_levels must both be non-empty",
            ));
        }
        if self.performance.measurement_iterations == 0 {
            return Err(invalid("performance.measurement_iterations must be >= 1"));
        }
        if self.performance.sample_count == 0 {
            return Err(invalid("performance.sample_count must be >= 1"));
        }
        validate_open_unit("performance.regression_threshold", self.performance.regression_threshold)?;
        validate_open_unit("performance.confidence_level", self.performance.confidence_level)?;
        validate_open_unit("baseline.volatility_threshold", self.baseline.volatility_threshold)?;
        validate_open_unit("baseline.slope_threshold", self.baseline.slope_threshold)?;
        if self.baseline.trend_window < 3 {
            return Err(invalid("baseline.trend_window must be >= 3"));
        }
        if self
            .compiler
            .command
            .first()
            .is_none_or(|program| program.trim().is_empty())
        {
            return Err(invalid("compiler.command must name a program"));
        }
        if !self.compiler.command.iter().any(|arg| arg.contains("{source}")) {
            return Err(invalid("compiler.command must contain a {source} placeholder"));
        }
        Ok(())
    }
}

fn invalid(details: &str) -> DcvError {
    DcvError::InvalidConfig {
        details: details.to_string(),
    }
}

fn validate_open_unit(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(DcvError::InvalidConfig {
            details: format!("{name} must be in (0, 1), got {value}"),
        });
    }
    Ok(())
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir if !components.is_empty() => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            _ => components.push(component),
        }
    }
    if components.is_empty() {
        return PathBuf::from(".");
    }
    components.into_iter().collect()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn env_error(name: &str, raw: &str, details: &str) -> DcvError {
    DcvError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {details}"),
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|raw| !raw.trim().is_empty())
    }

    fn parsed<T>(&self, name: &str, slot: &mut T) -> Result<()>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(name) {
            *slot = raw
                .trim()
                .parse::<T>()
                .map_err(|error| env_error(name, &raw, &error.to_string()))?;
        }
        Ok(())
    }

    fn f64(&self, name: &str, slot: &mut f64) -> Result<()> {
        self.parsed(name, slot)
    }

    fn u64(&self, name: &str, slot: &mut u64) -> Result<()> {
        self.parsed(name, slot)
    }

    fn u32(&self, name: &str, slot: &mut u32) -> Result<()> {
        self.parsed(name, slot)
    }

    fn usize(&self, name: &str, slot: &mut usize) -> Result<()> {
        self.parsed(name, slot)
    }

    fn bool(&self, name: &str, slot: &mut bool) -> Result<()> {
        self.parsed(name, slot)
    }
}

#[cfg(test)]
mod tests {
    use super::{BaselineBackend, Config, DcvError, MissingProbePolicy};
    use crate::contract::model::{OptimizationLevel, Platform};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) -> crate::core::errors::Result<()> {
        let vars = vars(pairs);
        cfg.apply_env_overrides_from(|name| vars.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.orchestrator.default_timeout_secs, 30);
        assert_eq!(cfg.discovery.extensions, vec!["jan".to_string()]);
        assert_eq!(cfg.baseline.trend_window, 20);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = Config::default();
        cfg.orchestrator.max_workers = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn thresholds_outside_open_unit_rejected() {
        for bad in [0.0, 1.0, -0.2, 1.5] {
            let mut cfg = Config::default();
            cfg.performance.regression_threshold = bad;
            assert!(cfg.validate().is_err(), "accepted {bad}");
        }
        let mut cfg = Config::default();
        cfg.performance.confidence_level = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_matrix_rejected() {
        let mut cfg = Config::default();
        cfg.targets.optimization_levels.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn compiler_command_needs_source_placeholder() {
        let mut cfg = Config::default();
        cfg.compiler.command = vec!["cc".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("{source}"));
        cfg.compiler.command.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("DCV_ORCHESTRATOR_MAX_WORKERS", "9"),
                ("DCV_ORCHESTRATOR_MISSING_PROBE", "error"),
                ("DCV_TARGETS_PLATFORMS", "wasm32, linux_aarch64"),
                ("DCV_TARGETS_OPTIMIZATION_LEVELS", "release-small"),
                ("DCV_PERFORMANCE_REGRESSION_THRESHOLD", "0.25"),
                ("DCV_BASELINE_BACKEND", "sqlite"),
                ("DCV_COMPILER_COMMAND", "cc -S {source}"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.orchestrator.max_workers, 9);
        assert_eq!(cfg.orchestrator.missing_probe, MissingProbePolicy::Error);
        assert_eq!(cfg.targets.platforms, vec![Platform::Wasm32, Platform::LinuxAarch64]);
        assert_eq!(cfg.targets.optimization_levels, vec![OptimizationLevel::ReleaseSmall]);
        assert!((cfg.performance.regression_threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.baseline.backend, BaselineBackend::Sqlite);
        assert_eq!(cfg.compiler.command, vec!["cc", "-S", "{source}"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_invalid_values_are_parse_errors() {
        for (name, value) in [
            ("DCV_ORCHESTRATOR_PARALLEL", "maybe"),
            ("DCV_PERFORMANCE_SAMPLE_COUNT", "-3"),
            ("DCV_TARGETS_PLATFORMS", "amiga"),
            ("DCV_BASELINE_BACKEND", "redis"),
        ] {
            let mut cfg = Config::default();
            let err = apply(&mut cfg, &[(name, value)]).unwrap_err();
            assert!(
                matches!(err, DcvError::ConfigParse { context: "env", .. }),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = Config::default();
        apply(&mut cfg, &[("DCV_ORCHESTRATOR_MAX_WORKERS", "  ")]).unwrap();
        assert_eq!(cfg.orchestrator.max_workers, 4);
    }

    #[test]
    fn normalize_paths_trims_roots_and_dedups_targets() {
        let mut cfg = Config::default();
        cfg.discovery.roots = vec![PathBuf::from("/"), PathBuf::from("/data/./cases/")];
        cfg.discovery.extensions = vec![".JAN".to_string()];
        cfg.targets.platforms = vec![Platform::Wasm32, Platform::LinuxX86_64, Platform::Wasm32];

        cfg.normalize_paths();

        assert_eq!(cfg.discovery.roots, vec![PathBuf::from("/"), PathBuf::from("/data/cases")]);
        assert_eq!(cfg.discovery.extensions, vec!["jan".to_string()]);
        assert_eq!(cfg.targets.platforms, vec![Platform::LinuxX86_64, Platform::Wasm32]);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/dcv/config.toml")));
        assert!(matches!(result.unwrap_err(), DcvError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_toml_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[orchestrator]
max_workers = 2
missing_probe = "error"

[targets]
platforms = ["linux_x86_64"]
optimization_levels = ["release_fast"]

[performance]
sample_count = 5
"#,
        )
        .unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.orchestrator.max_workers, 2);
        assert_eq!(cfg.orchestrator.missing_probe, MissingProbePolicy::Error);
        assert_eq!(cfg.targets.optimization_levels, vec![OptimizationLevel::ReleaseFast]);
        assert_eq!(cfg.performance.sample_count, 5);
        assert_eq!(cfg.performance.measurement_iterations, 1000);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[orchestrator\nmax_workers = 2").unwrap();
        assert!(matches!(
            Config::load(Some(&path)).unwrap_err(),
            DcvError::ConfigParse { .. }
        ));
    }

    #[test]
    fn stable_hash_tracks_content() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        let mut other = cfg.clone();
        other.performance.sample_count += 1;
        assert_ne!(cfg.stable_hash().unwrap(), other.stable_hash().unwrap());
    }
}
