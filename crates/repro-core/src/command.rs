//! Subprocess plumbing for the version-control and build tools.
//!
//! Both tools are opaque to the pipeline: the only contract observed is the
//! exit code (and, for ref discovery, trimmed stdout). Every invocation goes
//! through [`CommandRunner`] so tests can script outcomes without spawning
//! anything.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` inherits the caller's.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Whether the rendered command line starts with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit code and trimmed output of a captured run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Successful run printing `stdout`.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Abstraction for running external commands.
pub trait CommandRunner {
    /// Run to completion with inherited stdio and return the exit code.
    ///
    /// A child terminated by a signal reports `-1`.
    fn status(&mut self, command: &CommandSpec) -> io::Result<i32>;

    /// Run to completion capturing trimmed stdout and stderr. Only a
    /// failure to launch is an error; a nonzero exit is reported in
    /// [`Captured::exit_code`].
    fn output(&mut self, command: &CommandSpec) -> io::Result<Captured>;
}

/// Default process-backed command executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    fn build(command: &CommandSpec) -> Command {
        let mut process = Command::new(&command.program);
        process.args(&command.args);
        if let Some(dir) = &command.cwd {
            process.current_dir(dir);
        }
        process
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn status(&mut self, command: &CommandSpec) -> io::Result<i32> {
        let status = Self::build(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn output(&mut self, command: &CommandSpec) -> io::Result<Captured> {
        let output = Self::build(command).stdin(Stdio::null()).output()?;
        Ok(Captured {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
    fn status(&mut self, command: &CommandSpec) -> io::Result<i32> {
        (**self).status(command)
    }

    fn output(&mut self, command: &CommandSpec) -> io::Result<Captured> {
        (**self).output(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let cmd = CommandSpec::new("git", ["checkout", "abcd123"]);
        assert_eq!(cmd.to_string(), "git checkout abcd123");
        assert!(cmd.starts_with("git checkout"));
        assert!(!cmd.starts_with("git pull"));
    }

    #[test]
    fn display_without_args() {
        let cmd = CommandSpec::new("ant", Vec::<String>::new());
        assert_eq!(cmd.to_string(), "ant");
    }

    #[test]
    fn in_dir_sets_cwd() {
        let cmd = CommandSpec::new("ant", ["compile-test"]).in_dir("lucene/core");
        assert_eq!(cmd.cwd.as_deref(), Some(Path::new("lucene/core")));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_reports_exit_codes() {
        let mut runner = ProcessCommandRunner;
        let ok = runner
            .status(&CommandSpec::new("sh", ["-c", "exit 0"]))
            .unwrap();
        let failed = runner
            .status(&CommandSpec::new("sh", ["-c", "exit 3"]))
            .unwrap();
        assert_eq!(ok, 0);
        assert_eq!(failed, 3);
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_output_is_trimmed() {
        let mut runner = ProcessCommandRunner;
        let out = runner
            .output(&CommandSpec::new("sh", ["-c", "echo '  main  '"]))
            .unwrap();
        assert_eq!(out, Captured::ok("main"));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_output_reports_nonzero_exit() {
        let mut runner = ProcessCommandRunner;
        let out = runner
            .output(&CommandSpec::new("sh", ["-c", "echo nope >&2; exit 128"]))
            .unwrap();
        assert_eq!(out.exit_code, 128);
        assert_eq!(out.stderr, "nope");
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let mut runner = ProcessCommandRunner;
        let result = runner.status(&CommandSpec::new(
            "definitely-not-a-real-program-7f3a",
            Vec::<String>::new(),
        ));
        assert!(result.is_err());
    }
}
