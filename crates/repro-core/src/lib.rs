//! Reproduce intermittent CI test failures locally.
//!
//! The pipeline reads a CI console log, checks out the reported revision,
//! reruns each failing suite a fixed number of times and narrows the set of
//! consistent failures in up to three passes: at the reported revision, at
//! the tip of its branch, and at the tip again without the logged seed.

pub mod command;
pub mod config;
pub mod context;
pub mod log_parser;
pub mod logging;
pub mod module_grouper;
pub mod orchestrator;
pub mod report;
pub mod test_runner;
pub mod workspace;

pub use command::{Captured, CommandRunner, CommandSpec, ProcessCommandRunner};
pub use config::{BuildToolConfig, ReproConfig, VcsConfig};
pub use context::{InterruptFlag, ReproContext};
pub use log_parser::{HttpLogSource, LogOutcome, LogSource, ReproRecord, ReproTests};
pub use orchestrator::{NarrowingStage, PassSummary, PipelineOutcome, run_pipeline};
pub use report::FailureReport;
pub use repro_error::{ReproError, Result};
