//! Baseline persistence backends.
//!
//! A store only moves whole histories; version policy lives in the manager.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::errors::{DcvError, Result};
use crate::perf::baseline::{BaselineHistory, BaselineKey};

/// Durable home for baseline histories.
pub trait BaselineStore: Send + Sync {
    fn load(&self, key: &BaselineKey) -> Result<Option<BaselineHistory>>;
    fn save(&self, history: &BaselineHistory) -> Result<()>;
    fn keys(&self) -> Result<Vec<BaselineKey>>;
}

// ──────────────────── memory ────────────────────

#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    entries: Mutex<HashMap<BaselineKey, BaselineHistory>>,
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self, key: &BaselineKey) -> Result<Option<BaselineHistory>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, history: &BaselineHistory) -> Result<()> {
        self.entries
            .lock()
            .insert(history.key.clone(), history.clone());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<BaselineKey>> {
        let mut keys: Vec<_> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ──────────────────── json files ────────────────────

/// One pretty-printed JSON file per key under `dir`.
#[derive(Debug, Clone)]
pub struct JsonBaselineStore {
    dir: PathBuf,
}

impl JsonBaselineStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &BaselineKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

impl BaselineStore for JsonBaselineStore {
    fn load(&self, key: &BaselineKey) -> Result<Option<BaselineHistory>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(DcvError::io(&path, err)),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, history: &BaselineHistory) -> Result<()> {
        let path = self.path_for(&history.key);
        let json = serde_json::to_string_pretty(history)?;
        write_atomic(&path, json.as_bytes()).map_err(|source| DcvError::io(&path, source))
    }

    fn keys(&self) -> Result<Vec<BaselineKey>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(DcvError::io(&self.dir, err)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| DcvError::io(&self.dir, err))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let raw = fs::read_to_string(&path).map_err(|err| DcvError::io(&path, err))?;
            let history: BaselineHistory = serde_json::from_str(&raw)?;
            keys.push(history.key);
        }
        keys.sort();
        Ok(keys)
    }
}

/// Write to a sibling temp file, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

// ──────────────────── sqlite ────────────────────

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteBaselineStore;

#[cfg(feature = "sqlite")]
mod sqlite_store {
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;
    use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

    use super::BaselineStore;
    use crate::core::errors::{DcvError, Result};
    use crate::perf::baseline::{BaselineHistory, BaselineKey};

    /// WAL-mode SQLite table keyed by `test/platform/optimization`.
    pub struct SqliteBaselineStore {
        conn: Mutex<Connection>,
        path: PathBuf,
    }

    impl SqliteBaselineStore {
        pub fn open(path: &Path) -> Result<Self> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|source| DcvError::io(parent, source))?;
            }

            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            apply_pragmas(&conn)?;
            apply_schema(&conn)?;

            Ok(Self {
                conn: Mutex::new(conn),
                path: path.to_path_buf(),
            })
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl BaselineStore for SqliteBaselineStore {
        fn load(&self, key: &BaselineKey) -> Result<Option<BaselineHistory>> {
            let conn = self.conn.lock();
            let raw: Option<String> = conn
                .prepare_cached("SELECT history_json FROM baselines WHERE key = ?1")?
                .query_row(params![key.to_string()], |row| row.get(0))
                .optional()?;
            raw.map(|json| serde_json::from_str(&json).map_err(DcvError::from))
                .transpose()
        }

        fn save(&self, history: &BaselineHistory) -> Result<()> {
            let json = serde_json::to_string(history)?;
            let key = &history.key;
            let conn = self.conn.lock();
            conn.prepare_cached(
                "INSERT INTO baselines (key, test, platform, optimization, history_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                    history_json = excluded.history_json,
                    updated_at = excluded.updated_at",
            )?
            .execute(params![
                key.to_string(),
                key.test,
                key.platform.as_str(),
                key.optimization.as_str(),
                json,
                chrono::Utc::now().to_rfc3339(),
            ])?;
            Ok(())
        }

        fn keys(&self) -> Result<Vec<BaselineKey>> {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached("SELECT history_json FROM baselines ORDER BY key")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for raw in rows {
                let history: BaselineHistory = serde_json::from_str(&raw?)?;
                keys.push(history.key);
            }
            keys.sort();
            Ok(keys)
        }
    }

    fn apply_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            eprintln!("[DCV-SQLITE] WARNING: requested WAL mode but got '{mode}'");
        }
        Ok(())
    }

    fn apply_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS baselines (
                key TEXT PRIMARY KEY,
                test TEXT NOT NULL,
                platform TEXT NOT NULL,
                optimization TEXT NOT NULL,
                history_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_baselines_test ON baselines(test);",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::{OptimizationLevel, Platform};
    use crate::perf::baseline::{BaselineVersion, PerformanceBaseline};
    use crate::perf::stats::PerformanceMeasurement;

    fn history(test: &str) -> BaselineHistory {
        let key = BaselineKey::new(test, Platform::LinuxX86_64, OptimizationLevel::Debug);
        let baseline = PerformanceBaseline::from_measurements(vec![
            PerformanceMeasurement::from_overhead(12.5),
            PerformanceMeasurement::from_overhead(13.5),
        ])
        .unwrap();
        let mut history = BaselineHistory::new(key);
        history.versions.push(BaselineVersion {
            version: 1,
            created_at: chrono::Utc::now(),
            compiler_version: "zig 0.14.0".to_string(),
            justification: "initial baseline".to_string(),
            baseline,
        });
        history.current_version = Some(1);
        history
    }

    fn exercise(store: &dyn BaselineStore) {
        let a = history("alpha");
        let b = history("beta/with slash");
        assert!(store.load(&a.key).unwrap().is_none());
        store.save(&b).unwrap();
        store.save(&a).unwrap();
        assert_eq!(store.load(&a.key).unwrap(), Some(a.clone()));
        assert_eq!(store.keys().unwrap(), vec![a.key.clone(), b.key.clone()]);

        let mut updated = a.clone();
        updated.current_version = None;
        store.save(&updated).unwrap();
        assert_eq!(store.load(&a.key).unwrap().unwrap().current_version, None);
        assert_eq!(store.keys().unwrap().len(), 2);
    }

    #[test]
    fn memory_store_roundtrip() {
        exercise(&MemoryBaselineStore::default());
    }

    #[test]
    fn json_store_roundtrip_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonBaselineStore::new(tmp.path().join("baselines"));
        exercise(&store);
        let leftovers = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn json_store_missing_dir_has_no_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonBaselineStore::new(tmp.path().join("absent"));
        assert!(store.keys().unwrap().is_empty());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteBaselineStore::open(&tmp.path().join("baselines.db")).unwrap();
        exercise(&store);
    }
}
