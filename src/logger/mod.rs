//! Run logging: JSONL writer and the background event-logger thread.

pub mod events;
pub mod jsonl;

pub use events::{CaseRef, EventLoggerConfig, EventLoggerHandle, RunEvent, spawn_event_logger};
pub use jsonl::{JsonlConfig, JsonlWriter, StatusCounts};
