//! CI console log retrieval and parsing.
//!
//! Two line kinds matter:
//!
//! ```text
//! Checking out Revision e441a99009a557f82ea17ee9f9c3e9b89c75cee6 (refs/remotes/origin/master)
//! NOTE: reproduce with: ant test  -Dtestcase=ZkSolrClientTest -Dtests.method=testWatch -Dtests.seed=6EF5AB70F0032849 -Dtests.locale=he-IL
//! ```
//!
//! Lines are decoded as ISO-8859-1 because console logs from some agents are
//! not valid UTF-8. Classification is a small hand-written scanner so the
//! grammar can be tested without any I/O.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use repro_error::{ReproError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const REVISION_PREFIX: &str = "Checking out Revision ";
const REMOTE_BRANCH_PREFIX: &str = "(refs/remotes/origin/";
const NOTE_MARKER: &str = "NOTE:";
const TESTCASE_PREFIX: &str = "-Dtestcase=";
const METHOD_PREFIX: &str = "-Dtests.method=";
const SEED_PREFIX: &str = "-Dtests.seed=";
const CONSOLE_TEXT_SUFFIX: &str = "/consoleText";

/// One failing suite and the parameters needed to rerun it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproRecord {
    pub test_case: String,
    /// Command-line fragment, e.g. `-Dtests.seed=... -Dtests.locale=...`.
    pub repro_params: String,
    /// Build module owning the suite; filled in once grouping has run.
    pub source_module: Option<String>,
}

impl ReproRecord {
    #[must_use]
    pub fn new(test_case: impl Into<String>, repro_params: impl Into<String>) -> Self {
        Self {
            test_case: test_case.into(),
            repro_params: repro_params.into(),
            source_module: None,
        }
    }

    /// Copy of this record with any `-Dtests.seed=` parameter removed.
    #[must_use]
    pub fn without_seed(&self) -> Self {
        let repro_params = self
            .repro_params
            .split_whitespace()
            .filter(|token| !token.starts_with(SEED_PREFIX))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            test_case: self.test_case.clone(),
            repro_params,
            source_module: self.source_module.clone(),
        }
    }
}

/// Failing suites keyed by test-case name.
pub type ReproTests = BTreeMap<String, ReproRecord>;

/// Raw result of scanning one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogParseResult {
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub tests: ReproTests,
}

/// A log that names a revision and at least one failing suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailingRun {
    pub revision: String,
    pub branch: String,
    pub tests: ReproTests,
}

/// What a fetched log asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Ready(FailingRun),
    /// The log is valid but reports no failures.
    NothingToDo { revision: String },
}

/// Classification of a single decoded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLine<'a> {
    Revision {
        revision: &'a str,
        branch: &'a str,
    },
    Repro {
        test_case: &'a str,
        /// Parameters following the test case, method parameter removed.
        params: &'a str,
        /// Everything after `reproduce with:`, for diagnostics.
        command: &'a str,
    },
    Other,
}

// ── Line scanner ─────────────────────────────────────────────────────

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn literal(&mut self, lit: &str) -> Option<()> {
        self.rest = self.rest.strip_prefix(lit)?;
        Some(())
    }

    /// One or more whitespace characters.
    fn whitespace(&mut self) -> Option<()> {
        let trimmed = self.rest.trim_start();
        if trimmed.len() == self.rest.len() {
            return None;
        }
        self.rest = trimmed;
        Some(())
    }

    /// One or more non-whitespace characters.
    fn word(&mut self) -> Option<&'a str> {
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let (word, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(word)
    }

    /// One or more characters up to (not including) `stop` or end of input.
    fn until(&mut self, stop: char) -> Option<&'a str> {
        let end = self.rest.find(stop).unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let (taken, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(taken)
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn peek_literal(&self, lit: &str) -> bool {
        self.rest.starts_with(lit)
    }

    fn remainder(&self) -> &'a str {
        self.rest
    }
}

/// Classify one log line (line terminator already stripped).
#[must_use]
pub fn classify_line(line: &str) -> LogLine<'_> {
    if let Some((revision, branch)) = scan_revision(line) {
        return LogLine::Revision { revision, branch };
    }
    for (idx, _) in line.match_indices(NOTE_MARKER) {
        if let Some(repro) = scan_repro(&line[idx + NOTE_MARKER.len()..]) {
            return repro;
        }
    }
    LogLine::Other
}

fn scan_revision(line: &str) -> Option<(&str, &str)> {
    let mut sc = Scanner::new(line);
    sc.literal(REVISION_PREFIX)?;
    let revision = sc.word()?;
    sc.whitespace()?;
    sc.literal(REMOTE_BRANCH_PREFIX)?;
    let branch = sc.until(')')?;
    Some((revision, branch))
}

/// Scan what follows a `NOTE:` marker.
fn scan_repro(after_note: &str) -> Option<LogLine<'_>> {
    let mut sc = Scanner::new(after_note);
    sc.whitespace()?;
    sc.literal("reproduce")?;
    sc.whitespace()?;
    sc.literal("with:")?;
    let command = sc.remainder().trim();
    sc.whitespace()?;
    let _tool = sc.word()?;
    sc.whitespace()?;
    sc.literal("test")?;
    sc.whitespace()?;
    sc.literal(TESTCASE_PREFIX)?;
    let test_case = sc.word()?;
    if !sc.at_end() {
        sc.whitespace()?;
        if sc.peek_literal(METHOD_PREFIX) {
            sc.word()?;
            // The method may be the last token on the line.
            let _ = sc.whitespace();
        }
    }
    Some(LogLine::Repro {
        test_case,
        params: sc.remainder().trim(),
        command,
    })
}

/// Decode a raw line as ISO-8859-1, dropping the line terminator.
#[must_use]
pub fn decode_latin1(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    raw.iter().copied().map(char::from).collect()
}

/// Scan a whole log stream.
///
/// The first revision line wins. A later repro line for the same test case
/// replaces the earlier parameters.
pub fn scan_log<R: BufRead>(reader: R) -> io::Result<LogParseResult> {
    let mut result = LogParseResult::default();
    for raw in reader.split(b'\n') {
        let line = decode_latin1(&raw?);
        match classify_line(&line) {
            LogLine::Revision { revision, branch } => {
                if result.revision.is_none() {
                    info!(revision, branch, "revision found in log");
                    result.revision = Some(revision.to_owned());
                    result.branch = Some(branch.to_owned());
                }
            }
            LogLine::Repro {
                test_case,
                params,
                command,
            } => {
                info!(test_case, command, "repro line found in log");
                result
                    .tests
                    .insert(test_case.to_owned(), ReproRecord::new(test_case, params));
            }
            LogLine::Other => {}
        }
    }
    Ok(result)
}

// ── URL handling ─────────────────────────────────────────────────────

/// Whether `url` looks like a job build page (`.../<digits>[/]`) rather
/// than a raw console log.
#[must_use]
pub fn is_job_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let Some(path) = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"))
    else {
        return false;
    };
    let path = path.strip_suffix('/').unwrap_or(path);
    match path.rsplit_once('/') {
        Some((_, last)) => !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// The raw console log URL for a job build page.
#[must_use]
pub fn console_text_url(url: &str) -> String {
    format!("{}{CONSOLE_TEXT_SUFFIX}", url.trim_end_matches('/'))
}

// ── Retrieval ────────────────────────────────────────────────────────

/// Source of log byte streams.
pub trait LogSource {
    fn open(&mut self, url: &str) -> Result<Box<dyn BufRead>>;
}

/// Fetches logs over HTTP(S); `file://` URLs are read from disk.
pub struct HttpLogSource {
    agent: ureq::Agent,
}

impl HttpLogSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Default for HttpLogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSource for HttpLogSource {
    fn open(&mut self, url: &str) -> Result<Box<dyn BufRead>> {
        if let Some(path) = url.strip_prefix("file://") {
            let file = File::open(path).map_err(|err| ReproError::fetch(url, err))?;
            return Ok(Box::new(BufReader::new(file)));
        }
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| ReproError::fetch(url, err))?;
        Ok(Box::new(BufReader::new(response.into_reader())))
    }
}

/// Fetch and parse `url`, retrying once against `<url>/consoleText` when
/// the first fetch has no revision and looks like a job page.
pub fn fetch_and_parse<S: LogSource + ?Sized>(source: &mut S, url: &str) -> Result<LogOutcome> {
    let mut current = url.to_owned();
    let mut retried = false;
    loop {
        info!(url = %current, "fetching CI log");
        let reader = source.open(&current)?;
        let parsed = scan_log(reader).map_err(|err| ReproError::fetch(&current, err))?;

        let (Some(revision), Some(branch)) = (parsed.revision, parsed.branch) else {
            if !retried && is_job_url(&current) {
                debug!(url = %current, "not a console log, retrying with consoleText");
                current = console_text_url(&current);
                retried = true;
                continue;
            }
            return Err(ReproError::MalformedLog { url: current });
        };

        if parsed.tests.is_empty() {
            info!(revision = %revision, "no \"reproduce with\" lines found; nothing to do");
            return Ok(LogOutcome::NothingToDo { revision });
        }
        return Ok(LogOutcome::Ready(FailingRun {
            revision,
            branch,
            tests: parsed.tests,
        }));
    }
}
