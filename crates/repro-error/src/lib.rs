use std::io;

use thiserror::Error;

/// Primary error type for the failure reproduction pipeline.
///
/// Every variant here aborts the current pipeline attempt. A nonzero exit
/// from a test execution is deliberately not an error value: it is recorded
/// on the run context and surfaced as the final exit status instead.
#[derive(Error, Debug)]
pub enum ReproError {
    // === Log retrieval ===
    /// The CI log could not be fetched.
    #[error("fetching {url}: {detail}")]
    Fetch { url: String, detail: String },

    /// The log was fetched but carries no checked-out revision line.
    #[error("{url} does not appear to be a Jenkins log")]
    MalformedLog { url: String },

    // === Workspace ===
    /// A version-control or clean command returned nonzero.
    #[error("\"{command}\" failed with exit code {exit_code}")]
    Workspace { command: String, exit_code: i32 },

    /// Module test compilation failed. Never retried.
    #[error("compile failed in {module}/ with code {exit_code}")]
    Compile { module: String, exit_code: i32 },

    /// A subprocess could not be started at all.
    #[error("could not run \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    // === Local I/O ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // === Control ===
    /// Rejected configuration or command-line input.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The user interrupted the run.
    #[error("interrupted")]
    Interrupted,

    /// Internal logic error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReproError {
    /// Whether the user can likely fix this without code changes.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::MalformedLog { .. }
                | Self::Workspace { .. }
                | Self::Spawn { .. }
                | Self::InvalidConfig(_)
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Fetch { .. } => Some("Check the URL and network access to the CI server"),
            Self::MalformedLog { .. } => {
                Some("Point at the job's console log, e.g. <job>/<build>/consoleText")
            }
            Self::Workspace { .. } => {
                Some("Commit or stash local changes so the checkout can proceed")
            }
            Self::Spawn { .. } => Some("Make sure git and the build tool are on PATH"),
            Self::Compile { .. } => Some("The revision under test does not compile locally"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    ///
    /// An interrupt is a benign outcome; every other abort exits 1.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => 0,
            _ => 1,
        }
    }

    /// Create a fetch error.
    pub fn fetch(url: impl Into<String>, detail: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            detail: detail.to_string(),
        }
    }

    /// Create a workspace error naming the failed command.
    pub fn workspace(command: impl ToString, exit_code: i32) -> Self {
        Self::Workspace {
            command: command.to_string(),
            exit_code,
        }
    }

    /// Create a spawn error naming the command that could not start.
    pub fn spawn(command: impl ToString, source: io::Error) -> Self {
        Self::Spawn {
            command: command.to_string(),
            source,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `ReproError`.
pub type Result<T> = std::result::Result<T, ReproError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn error_display_workspace_names_command() {
        let err = ReproError::workspace("git checkout abcd123", 128);
        assert_eq!(
            err.to_string(),
            "\"git checkout abcd123\" failed with exit code 128"
        );
    }

    #[test]
    fn error_display_compile() {
        let err = ReproError::Compile {
            module: "lucene/core".to_owned(),
            exit_code: 1,
        };
        assert_eq!(err.to_string(), "compile failed in lucene/core/ with code 1");
    }

    #[test]
    fn error_display_malformed() {
        let err = ReproError::MalformedLog {
            url: "http://ci/job/x".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "http://ci/job/x does not appear to be a Jenkins log"
        );
    }

    #[test]
    fn spawn_keeps_source() {
        let err = ReproError::spawn(
            "ant clean",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("ant clean"));
        assert!(err.source().is_some());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ReproError::Interrupted.exit_code(), 0);
        assert_eq!(ReproError::fetch("u", "boom").exit_code(), 1);
        assert_eq!(ReproError::internal("bug").exit_code(), 1);
        assert_eq!(
            ReproError::Compile {
                module: "core".to_owned(),
                exit_code: 2
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn user_recoverable() {
        assert!(ReproError::fetch("u", "timeout").is_user_recoverable());
        assert!(ReproError::workspace("git pull", 1).is_user_recoverable());
        assert!(!ReproError::internal("bug").is_user_recoverable());
        assert!(!ReproError::Interrupted.is_user_recoverable());
    }

    #[test]
    fn suggestions() {
        assert!(ReproError::fetch("u", "x").suggestion().is_some());
        assert!(ReproError::workspace("git fetch", 1).suggestion().is_some());
        assert!(ReproError::Interrupted.suggestion().is_none());
    }

    #[test]
    fn io_converts() {
        fn fails() -> Result<()> {
            Err::<(), _>(io::Error::other("disk"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(ReproError::Io(_))));
    }
}
