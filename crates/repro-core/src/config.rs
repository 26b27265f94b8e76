//! Run configuration.

use std::path::PathBuf;

use repro_error::{ReproError, Result};

/// Default number of iterations per test suite.
pub const DEFAULT_ITERATIONS: u32 = 5;

/// Build-output roots scanned for per-suite result files.
pub const DEFAULT_RESULT_ROOTS: &[&str] = &["lucene/build", "solr/build"];

/// Version-control tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsConfig {
    pub program: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            program: "git".to_owned(),
        }
    }
}

/// Build tool invocation: program plus the targets the pipeline drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildToolConfig {
    pub program: String,
    pub clean_target: String,
    pub compile_target: String,
    pub test_target: String,
    /// Value passed as `-Dtests.showOutput`.
    pub show_output: String,
}

impl Default for BuildToolConfig {
    fn default() -> Self {
        Self {
            program: "ant".to_owned(),
            clean_target: "clean".to_owned(),
            compile_target: "compile-test".to_owned(),
            test_target: "test-nocompile".to_owned(),
            show_output: "onerror".to_owned(),
        }
    }
}

/// Configuration for one reproduction run.
#[derive(Debug, Clone)]
pub struct ReproConfig {
    /// CI log (or job page) to parse.
    pub url: String,
    /// Run a VCS fetch (and pull) before the first checkout.
    pub fetch: bool,
    /// Repetitions per test suite in every pass.
    pub iterations: u32,
    /// Root of the local source checkout.
    pub workspace_root: PathBuf,
    pub vcs: VcsConfig,
    pub build: BuildToolConfig,
    /// Extension (without the dot) of source files that hold test suites.
    pub source_extension: String,
    /// Result-file roots, relative to `workspace_root`.
    pub result_roots: Vec<PathBuf>,
    /// Where to write the JSON run summary, if anywhere.
    pub report_json: Option<PathBuf>,
    /// Where to write JSON-lines logs, if anywhere.
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for ReproConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            fetch: true,
            iterations: DEFAULT_ITERATIONS,
            workspace_root: PathBuf::from("."),
            vcs: VcsConfig::default(),
            build: BuildToolConfig::default(),
            source_extension: "java".to_owned(),
            result_roots: DEFAULT_RESULT_ROOTS.iter().map(PathBuf::from).collect(),
            report_json: None,
            log_file: None,
            verbose: false,
        }
    }
}

impl ReproConfig {
    /// Create a config for `url` with every other field defaulted.
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ReproError::InvalidConfig("log URL is empty".to_owned()));
        }
        if self.iterations == 0 {
            return Err(ReproError::InvalidConfig(
                "iterations must be >= 1".to_owned(),
            ));
        }
        if self.vcs.program.is_empty() || self.build.program.is_empty() {
            return Err(ReproError::InvalidConfig(
                "tool program names must be non-empty".to_owned(),
            ));
        }
        if self.source_extension.is_empty() {
            return Err(ReproError::InvalidConfig(
                "source extension must be non-empty".to_owned(),
            ));
        }
        Ok(())
    }
}
