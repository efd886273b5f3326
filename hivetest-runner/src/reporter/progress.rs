// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use hivetest_metadata::{AggregateResult, ResultRecord};
use std::io::{self, Write};
use swrite::{SWrite, swriteln};

/// How a single test finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestOutcome {
    /// The test passed.
    Passed,
    /// The test failed.
    Failed,
    /// The test was skipped, either explicitly or because of only-mode.
    Skipped,
    /// The test has no body.
    Stubbed,
}

impl TestOutcome {
    /// Returns the plain progress character for this outcome.
    pub fn progress_char(self) -> char {
        match self {
            TestOutcome::Passed => '.',
            TestOutcome::Failed => 'F',
            TestOutcome::Skipped => ',',
            TestOutcome::Stubbed => '-',
        }
    }
}

/// Receives test outcomes as they happen.
pub trait ProgressReporter {
    /// Called once for every test that finishes, is skipped or is stubbed.
    fn test_finished(&mut self, outcome: TestOutcome) -> io::Result<()>;
}

impl ProgressReporter for String {
    fn test_finished(&mut self, outcome: TestOutcome) -> io::Result<()> {
        self.push(outcome.progress_char());
        Ok(())
    }
}

/// Writes progress characters to a writer, flushing after each one.
#[derive(Debug)]
pub struct PlainProgress<W> {
    writer: W,
}

impl<W: Write> PlainProgress<W> {
    /// Creates a new `PlainProgress`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressReporter for PlainProgress<W> {
    fn test_finished(&mut self, outcome: TestOutcome) -> io::Result<()> {
        let mut buf = [0; 4];
        self.writer
            .write_all(outcome.progress_char().encode_utf8(&mut buf).as_bytes())?;
        self.writer.flush()
    }
}

/// Renders the failures of one record as the plain output fragment for that worker.
pub fn render_summary(record: &ResultRecord) -> String {
    let mut out = String::new();
    for (index, error) in record.errors.iter().enumerate() {
        swriteln!(out, "  {}) {}", index + 1, error.title);
        for line in error.trace.lines() {
            swriteln!(out, "     {line}");
        }
    }
    out
}

/// Renders the final totals of a run.
pub fn render_totals(result: &AggregateResult) -> String {
    let mut out = String::new();
    swriteln!(out, "{} passing ({}ms)", result.passed, result.time.as_millis());
    if result.failed > 0 {
        swriteln!(out, "{} failing", result.failed);
    }
    if result.skipped > 0 {
        swriteln!(out, "{} skipped", result.skipped);
    }
    if result.stubbed > 0 {
        swriteln!(out, "{} stubbed", result.stubbed);
    }
    if result.has_only {
        swriteln!(out, "only-mode was active");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetest_metadata::RecordError;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn plain_progress_writes_chars() {
        let mut progress = PlainProgress::new(Vec::new());
        for outcome in [
            TestOutcome::Passed,
            TestOutcome::Failed,
            TestOutcome::Skipped,
            TestOutcome::Stubbed,
        ] {
            progress.test_finished(outcome).unwrap();
        }
        assert_eq!(progress.into_inner(), b".F,-");
    }

    #[test]
    fn summary_lists_errors() {
        let record = ResultRecord {
            failed: 2,
            errors: vec![
                RecordError {
                    title: "math.rs: adds".to_owned(),
                    trace: "failure in test body: off by one".to_owned(),
                },
                RecordError {
                    title: "broken.rs".to_owned(),
                    trace: "load failure in load: missing\nsecond line".to_owned(),
                },
            ],
            ..ResultRecord::default()
        };
        assert_eq!(
            render_summary(&record),
            "  1) math.rs: adds\n     failure in test body: off by one\n  \
             2) broken.rs\n     load failure in load: missing\n     second line\n"
        );
    }

    #[test]
    fn totals_skip_empty_categories() {
        let result = AggregateResult {
            passed: 3,
            skipped: 1,
            time: Duration::from_millis(42),
            ..AggregateResult::default()
        };
        assert_eq!(render_totals(&result), "3 passing (42ms)\n1 skipped\n");
    }
}
