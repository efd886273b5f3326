// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// The result of running one worker's share of test files.
///
/// Produced once per worker (or once per serial run) and sent back to the orchestrator.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResultRecord {
    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests (and suites with their own errors) that failed.
    pub failed: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The number of tests that were registered without a body.
    pub stubbed: usize,

    /// True if any node in this worker's tree was flagged `only`.
    pub has_only: bool,

    /// True if the run stopped early because of `bail`.
    #[serde(default)]
    pub bailed: bool,

    /// Errors encountered, in the order they were observed.
    #[serde(default)]
    pub errors: Vec<RecordError>,

    /// Messages logged by test bodies and hooks.
    #[serde(default)]
    pub logs: Vec<String>,

    /// Elapsed time per test file, in milliseconds.
    #[serde(default)]
    pub times: BTreeMap<Utf8PathBuf, u64>,

    /// The rendered output fragment for this worker.
    #[serde(default)]
    pub output: String,
}

impl ResultRecord {
    /// Creates a failing record for a set of files whose worker never reported back.
    ///
    /// Each file counts as one failure and gets its own error entry.
    pub fn worker_failure<'a>(
        files: impl IntoIterator<Item = &'a Utf8PathBuf>,
        message: &str,
    ) -> Self {
        let errors: Vec<_> = files
            .into_iter()
            .map(|file| RecordError {
                title: file.to_string(),
                trace: message.to_owned(),
            })
            .collect();
        Self {
            failed: errors.len(),
            errors,
            ..Self::default()
        }
    }

    /// Returns the total number of tests accounted for in this record.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.stubbed
    }

    /// Returns true if this record carries no failures and no errors.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }
}

/// An error recorded against a test, hook, suite or file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    /// The dotted title path of the node, or a file path.
    pub title: String,

    /// The formatted error, including its kind and any trace.
    pub trace: String,
}

/// The merged result of every worker in a run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AggregateResult {
    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that were skipped, including those re-classified by only-mode.
    pub skipped: usize,

    /// The number of bodiless tests.
    pub stubbed: usize,

    /// True if any worker ran in only-mode.
    pub has_only: bool,

    /// Wall-clock time for the whole run.
    pub time: Duration,

    /// Errors from every worker, concatenated.
    pub errors: Vec<RecordError>,

    /// Logs from every worker, concatenated.
    pub logs: Vec<String>,

    /// Raw per-worker output fragments, in arrival order.
    pub outputs: Vec<String>,

    /// Elapsed time per test file, in milliseconds.
    pub times: BTreeMap<Utf8PathBuf, u64>,
}

impl AggregateResult {
    /// Returns the total number of tests accounted for.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.stubbed
    }

    /// Returns true if the run had no errors.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn worker_failure_counts_each_file() {
        let files = vec![Utf8PathBuf::from("a.rs"), Utf8PathBuf::from("b.rs")];
        let record = ResultRecord::worker_failure(&files, "worker exited with signal 9");
        assert_eq!(record.failed, 2);
        assert_eq!(record.errors.len(), 2);
        assert_eq!(record.errors[1].title, "b.rs");
        assert!(!record.is_success());
    }

    #[test]
    fn record_json_uses_kebab_case() {
        let record = ResultRecord {
            passed: 1,
            has_only: true,
            ..ResultRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["has-only"], serde_json::Value::Bool(true));

        // Optional fields may be omitted by older workers.
        let parsed: ResultRecord = serde_json::from_str(
            r#"{"passed": 3, "failed": 0, "skipped": 1, "stubbed": 0, "has-only": false}"#,
        )
        .unwrap();
        assert_eq!(parsed.total(), 4);
        assert!(parsed.errors.is_empty());
    }
}
