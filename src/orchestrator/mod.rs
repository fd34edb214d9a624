//! Discovery, scheduling and per-case execution of dispatch contracts.

pub mod case;
pub mod collaborators;
pub mod discovery;
pub mod rules;
pub mod runner;

pub use case::{
    CaseState, Diagnostic, DiagnosticLevel, FailureKind, PerformanceOutcome, Phase, RunSummary,
    TestResult, TestStatus, ValidationFailure,
};
pub use collaborators::{
    CommandIrGenerator, CompilationError, FsGoldenStore, GoldenStore, IrGenerator, IrRequest,
    LifecycleHooks, MemoryGoldenStore, ProbeFactory, ProbeRegistry, ShellHooks,
};
pub use discovery::{DiscoveredCase, discover};
pub use runner::{Collaborators, Orchestrator, RunOptions, RunReport};
