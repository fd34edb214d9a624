//! Run-event logger: a dedicated thread owns the JSONL writer.
//!
//! Workers and the orchestrator send `RunEvent`s through a bounded crossbeam
//! channel with `try_send()`, so a slow disk never stalls a test case.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DcvError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity, StatusCounts};

const CHANNEL_CAPACITY: usize = 1024;

/// Target coordinates attached to case-scoped events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRef {
    pub test: String,
    pub platform: Option<String>,
    pub optimization: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        config_hash: String,
        units: usize,
    },
    RunCompleted {
        run_id: String,
        counts: StatusCounts,
        duration_ms: u64,
    },
    CaseStarted {
        case: CaseRef,
    },
    CaseCompleted {
        case: CaseRef,
        status: String,
        error_code: Option<String>,
        duration_ms: u64,
    },
    Diagnostic {
        case: CaseRef,
        phase: String,
        level: String,
        code: Option<String>,
        message: String,
    },
    BaselinePromoted {
        case: CaseRef,
        version: u32,
        change: Option<f64>,
        justification: String,
    },
    BaselineRejected {
        case: CaseRef,
        change: Option<f64>,
        justification: String,
    },
    FailureReport {
        case: CaseRef,
        code: String,
        rendered: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Ask the logger thread to flush and exit.
    Shutdown,
}

/// Cloneable sender side of the event logger.
#[derive(Clone)]
pub struct EventLoggerHandle {
    tx: Sender<RunEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl EventLoggerHandle {
    /// Handle whose events go nowhere.
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking; a full channel drops the event and bumps the counter.
    pub fn send(&self, event: RunEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RunEvent::Shutdown);
    }
}

pub struct EventLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl EventLoggerConfig {
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread. It exits on `shutdown()` or when every handle is dropped.
pub fn spawn_event_logger(
    config: EventLoggerConfig,
) -> Result<(EventLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<RunEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = EventLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("dcv-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, &dropped_clone))
        .map_err(|e| DcvError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<RunEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} run events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, RunEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

fn case_entry(event: EventType, severity: Severity, case: &CaseRef) -> LogEntry {
    LogEntry::new(event, severity).with_test(&case.test, case.platform.clone(), case.optimization.clone())
}

fn level_severity(level: &str) -> Severity {
    match level {
        "critical" => Severity::Critical,
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn status_severity(status: &str) -> Severity {
    match status {
        "passed" | "skipped" => Severity::Info,
        "approval_required" => Severity::Warning,
        "framework_error" => Severity::Critical,
        _ => Severity::Error,
    }
}

fn event_to_log_entry(event: &RunEvent) -> LogEntry {
    match event {
        RunEvent::RunStarted {
            run_id,
            config_hash,
            units,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.run_id = Some(run_id.clone());
            e.config_hash = Some(config_hash.clone());
            e.details = Some(format!("units={units}"));
            e
        }
        RunEvent::RunCompleted {
            run_id,
            counts,
            duration_ms,
        } => {
            let clean = counts.failed + counts.framework_error + counts.timeout + counts.approval_required == 0;
            let mut e = LogEntry::new(
                EventType::RunComplete,
                if clean { Severity::Info } else { Severity::Warning },
            );
            e.run_id = Some(run_id.clone());
            e.counts = Some(*counts);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RunEvent::CaseStarted { case } => case_entry(EventType::CaseStart, Severity::Info, case),
        RunEvent::CaseCompleted {
            case,
            status,
            error_code,
            duration_ms,
        } => {
            let mut e = case_entry(EventType::CaseComplete, status_severity(status), case);
            e.status = Some(status.clone());
            e.error_code.clone_from(error_code);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RunEvent::Diagnostic {
            case,
            phase,
            level,
            code,
            message,
        } => {
            let mut e = case_entry(EventType::Diagnostic, level_severity(level), case)
                .with_message(message.clone());
            e.phase = Some(phase.clone());
            e.error_code.clone_from(code);
            e
        }
        RunEvent::BaselinePromoted {
            case,
            version,
            change,
            justification,
        } => {
            let mut e = case_entry(EventType::BaselinePromoted, Severity::Info, case)
                .with_message(justification.clone());
            e.baseline_version = Some(*version);
            e.change = *change;
            e
        }
        RunEvent::BaselineRejected {
            case,
            change,
            justification,
        } => {
            let mut e = case_entry(EventType::BaselineRejected, Severity::Warning, case)
                .with_message(justification.clone());
            e.change = *change;
            e.error_code = Some("DCV-3004".to_string());
            e
        }
        RunEvent::FailureReport {
            case,
            code,
            rendered,
        } => {
            let mut e = case_entry(EventType::FailureReport, Severity::Error, case);
            e.error_code = Some(code.clone());
            e.details = Some(rendered.clone());
            e
        }
        RunEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical).with_message(message.clone());
            e.error_code = Some(code.clone());
            e
        }
        RunEvent::Shutdown => LogEntry::new(EventType::Diagnostic, Severity::Info),
    }
}
