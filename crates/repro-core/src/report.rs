//! Failure counting over the per-suite XML result files.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

const RESULT_PREFIX: &str = "TEST-";
const RESULT_SUFFIX: &str = ".xml";
const FAILURE_MARKERS: [&str; 2] = ["errors=\"", "failures=\""];

/// Identity of one result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    /// Fully qualified suite name, e.g. `org.apache.lucene.FooTest`.
    pub test_case: String,
    /// Last dotted segment, e.g. `FooTest`.
    pub simple_name: String,
}

fn split_qualified(fq: &str) -> Option<ResultFile> {
    let (_, simple) = fq.rsplit_once('.')?;
    if simple.is_empty() || simple.contains('-') {
        return None;
    }
    Some(ResultFile {
        test_case: fq.to_owned(),
        simple_name: simple.to_owned(),
    })
}

fn split_body(body: &str) -> Option<ResultFile> {
    split_qualified(body).or_else(|| {
        let (fq, index) = body.rsplit_once('-')?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        split_qualified(fq)
    })
}

/// Parse `...TEST-<fq>[-<digits>].xml`; the numeric suffix marks a
/// duplicate run and is dropped.
#[must_use]
pub fn parse_result_file_name(name: &str) -> Option<ResultFile> {
    let stem = name.strip_suffix(RESULT_SUFFIX)?;
    let mut from = 0;
    while let Some(pos) = stem[from..].find(RESULT_PREFIX) {
        let start = from + pos;
        if let Some(file) = split_body(&stem[start + RESULT_PREFIX.len()..]) {
            return Some(file);
        }
        from = start + 1;
    }
    None
}

/// Whether `text` reports a nonzero error or failure count.
#[must_use]
pub fn has_failure_marker(text: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| {
        text.match_indices(marker).any(|(idx, _)| {
            text[idx + marker.len()..]
                .chars()
                .next()
                .is_some_and(|c| c != '0')
        })
    })
}

/// Per-suite failure counts from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub iterations: u32,
    /// Fully qualified suite name to the number of failing result files.
    pub counts: BTreeMap<String, u32>,
}

impl FailureReport {
    #[must_use]
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            counts: BTreeMap::new(),
        }
    }

    /// Entries ordered by failure count, then by name.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&str, u32)> {
        let mut entries: Vec<(&str, u32)> = self
            .counts
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Human-readable report; `location` is appended to the header.
    #[must_use]
    pub fn render(&self, location: &str) -> String {
        let mut out = String::with_capacity(64 * (self.counts.len() + 1));
        let _ = writeln!(out, "Failures{location}:");
        for (name, count) in self.sorted() {
            let _ = writeln!(out, "  {count}/{} failed: {name}", self.iterations);
        }
        out
    }

    /// Simple names of the suites that failed in every iteration.
    #[must_use]
    pub fn consistent_failures(&self) -> BTreeSet<String> {
        self.counts
            .iter()
            .filter(|&(_, count)| *count == self.iterations)
            .map(|(name, _)| name.rsplit_once('.').map_or(name.as_str(), |(_, simple)| simple))
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Walk each of `result_roots` (relative to `root`) and count failing
/// result files per suite. A file counts at most once.
#[must_use]
pub fn analyze(root: &Path, result_roots: &[PathBuf], iterations: u32) -> FailureReport {
    let mut report = FailureReport::new(iterations);
    for result_root in result_roots {
        let dir = root.join(result_root);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no result directory");
            continue;
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file) = entry
                .file_name()
                .to_str()
                .and_then(parse_result_file_name)
            else {
                continue;
            };
            let count = report.counts.entry(file.test_case).or_insert(0);
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    if has_failure_marker(&String::from_utf8_lossy(&bytes)) {
                        *count += 1;
                    }
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "unreadable result file");
                }
            }
        }
    }
    report
}
