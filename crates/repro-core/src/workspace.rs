//! Local workspace state transitions: checkout, clean, restore.

use std::ops::{Deref, DerefMut};

use repro_error::{ReproError, Result};
use tracing::{info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::context::ReproContext;

/// Printed by `rev-parse --abbrev-ref HEAD` when not on a branch.
const DETACHED_HEAD: &str = "HEAD";

fn vcs<R>(ctx: &ReproContext<R>, args: &[&str]) -> CommandSpec {
    CommandSpec::new(ctx.config.vcs.program.as_str(), args.iter().copied())
        .in_dir(&ctx.config.workspace_root)
}

fn run_checked<R: CommandRunner>(
    ctx: &mut ReproContext<R>,
    command: &CommandSpec,
) -> Result<()> {
    let code = ctx.run(command)?;
    if code != 0 {
        return Err(ReproError::workspace(command, code));
    }
    Ok(())
}

/// The branch the workspace is on, or the raw revision when detached.
pub fn current_ref<R: CommandRunner>(ctx: &mut ReproContext<R>) -> Result<String> {
    let abbrev = vcs(ctx, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let branch = ctx.output(&abbrev)?;
    let original = if branch == DETACHED_HEAD {
        let full = vcs(ctx, &["rev-parse", "HEAD"]);
        ctx.output(&full)?
    } else {
        branch
    };
    info!(original_ref = %original, "initial local branch/revision");
    Ok(original)
}

/// Check out `git_ref` and clean build artifacts.
///
/// With `fetch`, the checkout is preceded by a fetch and followed by a pull.
/// `checkout_succeeded` is set as soon as the checkout exits 0, before the
/// interrupt flag is consulted and before the pull and clean run.
pub fn prepare<R: CommandRunner>(
    ctx: &mut ReproContext<R>,
    fetch: bool,
    git_ref: &str,
) -> Result<()> {
    if fetch {
        let fetch_cmd = vcs(ctx, &["fetch"]);
        run_checked(ctx, &fetch_cmd)?;
    }
    let checkout = vcs(ctx, &["checkout", git_ref]);
    let code = ctx.status(&checkout)?;
    if code != 0 {
        return Err(ReproError::workspace(&checkout, code));
    }
    ctx.checkout_succeeded = true;
    ctx.check_interrupt()?;
    if fetch {
        let pull = vcs(ctx, &["pull"]);
        run_checked(ctx, &pull)?;
    }

    let clean = CommandSpec::new(
        ctx.config.build.program.as_str(),
        [ctx.config.build.clean_target.as_str()],
    )
    .in_dir(&ctx.config.workspace_root);
    run_checked(ctx, &clean)
}

/// Check `original_ref` back out. Failures are logged, never returned.
///
/// Returns whether a checkout was issued.
pub fn restore<R: CommandRunner>(ctx: &mut ReproContext<R>, original_ref: &str) -> bool {
    if !ctx.checkout_succeeded {
        return false;
    }
    let command = vcs(ctx, &["checkout", original_ref]);
    info!(command = %command, "restoring original branch/revision");
    // The interrupt flag is left for the caller to check.
    match ctx.status(&command) {
        Ok(0) => {}
        Ok(code) => warn!(command = %command, exit_code = code, "restore failed"),
        Err(err) => warn!(command = %command, error = %err, "restore failed"),
    }
    true
}

/// Restores the original ref when dropped, on every exit path.
pub struct RestoreGuard<'a, R: CommandRunner> {
    ctx: &'a mut ReproContext<R>,
    original_ref: String,
}

impl<'a, R: CommandRunner> RestoreGuard<'a, R> {
    pub fn new(ctx: &'a mut ReproContext<R>, original_ref: impl Into<String>) -> Self {
        Self {
            ctx,
            original_ref: original_ref.into(),
        }
    }

    #[must_use]
    pub fn original_ref(&self) -> &str {
        &self.original_ref
    }
}

impl<R: CommandRunner> Deref for RestoreGuard<'_, R> {
    type Target = ReproContext<R>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<R: CommandRunner> DerefMut for RestoreGuard<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<R: CommandRunner> Drop for RestoreGuard<'_, R> {
    fn drop(&mut self) {
        restore(self.ctx, &self.original_ref);
    }
}
