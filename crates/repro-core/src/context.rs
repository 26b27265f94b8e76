//! Mutable state shared by every phase of one pipeline run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use repro_error::{ReproError, Result};
use tracing::{info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::ReproConfig;

/// Shared flag raised by an interrupt handler.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run context passed by reference through the pipeline.
///
/// Holds the only command runner, so no two subprocesses can overlap.
pub struct ReproContext<R> {
    pub config: ReproConfig,
    runner: R,
    interrupt: InterruptFlag,
    /// Last nonzero exit code from a test execution, 0 if none.
    pub last_failure_code: i32,
    /// Set once any checkout has succeeded; gates restoration.
    pub checkout_succeeded: bool,
}

impl<R: CommandRunner> ReproContext<R> {
    pub fn new(config: ReproConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            interrupt: InterruptFlag::new(),
            last_failure_code: 0,
            checkout_succeeded: false,
        }
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Fail with [`ReproError::Interrupted`] if an interrupt arrived.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_raised() {
            return Err(ReproError::Interrupted);
        }
        Ok(())
    }

    /// Run `command` and return its exit code without consulting the
    /// interrupt flag.
    pub fn status(&mut self, command: &CommandSpec) -> Result<i32> {
        info!(command = %command, cwd = ?command.cwd, "running");
        self.runner
            .status(command)
            .map_err(|err| ReproError::spawn(command, err))
    }

    /// Run `command` and return its exit code.
    pub fn run(&mut self, command: &CommandSpec) -> Result<i32> {
        let code = self.status(command)?;
        self.check_interrupt()?;
        Ok(code)
    }

    /// Run `command`, remembering a nonzero exit as the last failure code.
    pub fn run_recorded(&mut self, command: &CommandSpec) -> Result<i32> {
        let code = self.run(command)?;
        if code != 0 {
            warn!(command = %command, exit_code = code, "setting last failure code");
            self.last_failure_code = code;
        }
        Ok(code)
    }

    /// Run `command` and return its trimmed stdout. A nonzero exit is a
    /// [`ReproError::Workspace`] naming the command.
    pub fn output(&mut self, command: &CommandSpec) -> Result<String> {
        info!(command = %command, "running");
        let captured = self
            .runner
            .output(command)
            .map_err(|err| ReproError::spawn(command, err))?;
        self.check_interrupt()?;
        if captured.exit_code != 0 {
            warn!(
                command = %command,
                exit_code = captured.exit_code,
                stderr = %captured.stderr,
                "command failed"
            );
            return Err(ReproError::workspace(command, captured.exit_code));
        }
        Ok(captured.stdout)
    }
}
