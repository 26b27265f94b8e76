//! The narrowing pipeline: reported revision, then branch tip, then branch
//! tip without a seed.

use std::collections::BTreeSet;
use std::error::Error as _;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use repro_error::{ReproError, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::command::CommandRunner;
use crate::context::ReproContext;
use crate::log_parser::{FailingRun, LogOutcome, LogSource, ReproTests, fetch_and_parse};
use crate::module_grouper::{ModuleMap, group_tests_by_module};
use crate::report::{FailureReport, analyze};
use crate::test_runner::run_tests;
use crate::workspace::{RestoreGuard, current_ref, prepare};

/// One state of the narrowing machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrowingStage {
    ReportedRevision,
    BranchTip,
    BranchTipNoSeed,
}

impl NarrowingStage {
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::ReportedRevision => Some(Self::BranchTip),
            Self::BranchTip => Some(Self::BranchTipNoSeed),
            Self::BranchTipNoSeed => None,
        }
    }

    /// Whether this stage reruns its suites with the seed removed.
    #[must_use]
    pub const fn strips_seed(self) -> bool {
        matches!(self, Self::BranchTipNoSeed)
    }

    /// Suffix for the report header, e.g. ` at the tip of main`.
    #[must_use]
    pub fn location(self, branch: &str) -> String {
        match self {
            Self::ReportedRevision => String::new(),
            Self::BranchTip => format!(" at the tip of {branch}"),
            Self::BranchTipNoSeed => format!(" at the tip of {branch} without a seed"),
        }
    }
}

impl fmt::Display for NarrowingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReportedRevision => "reported-revision",
            Self::BranchTip => "branch-tip",
            Self::BranchTipNoSeed => "branch-tip-no-seed",
        })
    }
}

/// What one narrowing pass ran and found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub stage: NarrowingStage,
    pub git_ref: String,
    pub tests: ReproTests,
    pub modules: ModuleMap,
    pub report: FailureReport,
}

/// Result of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// 0, or the last nonzero exit code of a test invocation.
    pub exit_code: i32,
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub passes: Vec<PassSummary>,
}

impl PipelineOutcome {
    fn nothing_to_do(revision: String) -> Self {
        Self {
            exit_code: 0,
            revision: Some(revision),
            branch: None,
            passes: Vec::new(),
        }
    }
}

/// Suites from `tests` that failed every iteration of `report`, prepared
/// for `next`. Names missing from `tests` are never introduced.
#[must_use]
pub fn carry_forward(
    report: &FailureReport,
    tests: &ReproTests,
    next: NarrowingStage,
) -> ReproTests {
    report
        .consistent_failures()
        .into_iter()
        .filter_map(|name| {
            let record = tests.get(&name)?;
            let record = if next.strips_seed() {
                record.without_seed()
            } else {
                record.clone()
            };
            Some((name, record))
        })
        .collect()
}

fn error_chain(err: &ReproError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

fn run_pass<R: CommandRunner>(
    ctx: &mut ReproContext<R>,
    stage: NarrowingStage,
    git_ref: &str,
    fetch: bool,
    mut tests: ReproTests,
) -> Result<PassSummary> {
    prepare(ctx, fetch, git_ref)?;

    let names: BTreeSet<String> = tests.keys().cloned().collect();
    let modules =
        group_tests_by_module(&ctx.config.workspace_root, &ctx.config.source_extension, &names);
    for (module, suites) in &modules {
        for suite in suites {
            if let Some(record) = tests.get_mut(suite) {
                record.source_module = Some(module.clone());
            }
        }
    }
    for record in tests.values().filter(|r| r.source_module.is_none()) {
        warn!(test_case = %record.test_case, "no source file found; suite will not run");
    }

    let iterations = ctx.config.iterations;
    run_tests(ctx, iterations, &modules, &tests)?;

    let report = analyze(
        &ctx.config.workspace_root,
        &ctx.config.result_roots,
        iterations,
    );
    Ok(PassSummary {
        stage,
        git_ref: git_ref.to_owned(),
        tests,
        modules,
        report,
    })
}

fn narrow<R: CommandRunner>(
    ctx: &mut ReproContext<R>,
    run: &FailingRun,
    out: &mut dyn Write,
) -> Result<Vec<PassSummary>> {
    let mut passes = Vec::new();
    let mut stage = NarrowingStage::ReportedRevision;
    let mut tests = run.tests.clone();
    loop {
        let location = stage.location(&run.branch);
        let (git_ref, fetch) = match stage {
            NarrowingStage::ReportedRevision => (run.revision.as_str(), ctx.config.fetch),
            NarrowingStage::BranchTip | NarrowingStage::BranchTipNoSeed => {
                info!(pass = %stage, "re-testing 100% failures{location}");
                (run.branch.as_str(), false)
            }
        };

        let summary = run_pass(ctx, stage, git_ref, fetch, tests)?;
        write!(out, "{}", summary.report.render(&location))?;
        out.flush()?;

        let next = stage.next();
        let candidates = next
            .map(|next| carry_forward(&summary.report, &summary.tests, next))
            .unwrap_or_default();
        info!(
            pass = %stage,
            git_ref = %summary.git_ref,
            consistent = candidates.len(),
            "pass complete"
        );
        passes.push(summary);

        match next {
            Some(next) if !candidates.is_empty() => {
                stage = next;
                tests = candidates;
            }
            _ => break,
        }
    }
    Ok(passes)
}

/// Write `outcome` as pretty JSON to `path`.
pub fn write_summary(path: &Path, outcome: &PipelineOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome)
        .map_err(|err| ReproError::internal(format!("cannot serialize run summary: {err}")))?;
    fs::write(path, json)?;
    Ok(())
}

/// Run the whole pipeline against `ctx.config.url`.
///
/// Failure reports are written to `out`. The original branch or revision
/// is checked back out before this returns, on success and on error. An
/// interrupt raised by the last command or by the restore itself is
/// returned as `ReproError::Interrupted` once the restore has run.
pub fn run_pipeline<R, S>(
    ctx: &mut ReproContext<R>,
    source: &mut S,
    out: &mut dyn Write,
) -> Result<PipelineOutcome>
where
    R: CommandRunner,
    S: LogSource + ?Sized,
{
    let run = match fetch_and_parse(source, &ctx.config.url)? {
        LogOutcome::NothingToDo { revision } => {
            return Ok(PipelineOutcome::nothing_to_do(revision));
        }
        LogOutcome::Ready(run) => run,
    };
    info!(
        revision = %run.revision,
        branch = %run.branch,
        tests = run.tests.len(),
        "parsed CI log"
    );

    let original = current_ref(ctx)?;
    let result = {
        let mut guard = RestoreGuard::new(ctx, original);
        let result = narrow(&mut *guard, &run, out);
        match &result {
            Err(ReproError::Interrupted) | Ok(_) => {}
            Err(err) => error!(error = %error_chain(err), "pipeline aborted"),
        }
        result
    };
    let passes = result?;
    ctx.check_interrupt()?;

    let outcome = PipelineOutcome {
        exit_code: ctx.last_failure_code,
        revision: Some(run.revision),
        branch: Some(run.branch),
        passes,
    };
    if let Some(path) = &ctx.config.report_json {
        write_summary(path, &outcome)?;
        info!(path = %path.display(), "wrote run summary");
    }
    Ok(outcome)
}
