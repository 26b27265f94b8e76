//! Repeated per-module test execution through the build tool.

use std::collections::BTreeSet;

use repro_error::{ReproError, Result};
use tracing::{info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::BuildToolConfig;
use crate::context::ReproContext;
use crate::log_parser::ReproTests;
use crate::module_grouper::ModuleMap;

/// Selector matching every suite in `suites`, e.g. `*.FooTest|*.BarTest`.
#[must_use]
pub fn test_selector(suites: &BTreeSet<String>) -> String {
    suites
        .iter()
        .map(|suite| format!("*.{suite}"))
        .collect::<Vec<_>>()
        .join("|")
}

/// Maximum failures tolerated before the build tool stops early.
#[must_use]
pub fn max_failures(iterations: u32, suite_count: usize) -> u64 {
    u64::from(iterations).saturating_mul(u64::try_from(suite_count).unwrap_or(u64::MAX))
}

/// Arguments of one module's test invocation.
#[must_use]
pub fn test_args(
    build: &BuildToolConfig,
    iterations: u32,
    suites: &BTreeSet<String>,
    params: &str,
) -> Vec<String> {
    let mut args = vec![
        build.test_target.clone(),
        format!("-Dtests.dups={iterations}"),
        format!(
            "-Dtests.maxfailures={}",
            max_failures(iterations, suites.len())
        ),
        format!("-Dtests.class={}", test_selector(suites)),
        format!("-Dtests.showOutput={}", build.show_output),
    ];
    args.extend(params.split_whitespace().map(str::to_owned));
    args
}

/// Compile and run each module's suites `iterations` times.
///
/// A compile failure aborts immediately. A failing test run is recorded as
/// the last failure code and the remaining modules still run.
pub fn run_tests<R: CommandRunner>(
    ctx: &mut ReproContext<R>,
    iterations: u32,
    modules: &ModuleMap,
    tests: &ReproTests,
) -> Result<()> {
    for (module, suites) in modules {
        let Some(first) = suites.iter().next() else {
            continue;
        };
        // All suites in a module share the first suite's parameters.
        let params = tests
            .get(first)
            .map(|record| record.repro_params.as_str())
            .ok_or_else(|| ReproError::internal(format!("no repro record for {first}")))?;
        for suite in suites.iter().skip(1) {
            if let Some(record) = tests.get(suite) {
                if record.repro_params != params {
                    warn!(
                        module = %module,
                        suite = %suite,
                        used = params,
                        logged = %record.repro_params,
                        "suite logged different repro params; using the module's shared params"
                    );
                }
            }
        }

        let module_dir = ctx.config.workspace_root.join(module);
        let build = ctx.config.build.clone();

        let compile = CommandSpec::new(build.program.as_str(), [build.compile_target.as_str()])
            .in_dir(&module_dir);
        let code = ctx.run_recorded(&compile)?;
        if code != 0 {
            return Err(ReproError::Compile {
                module: module.clone(),
                exit_code: code,
            });
        }

        let test = CommandSpec::new(
            build.program.as_str(),
            test_args(&build, iterations, suites, params),
        )
        .in_dir(&module_dir);
        info!(module = %module, suites = suites.len(), iterations, "running suites");
        ctx.run_recorded(&test)?;
    }
    Ok(())
}
