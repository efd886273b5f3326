// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use hivetest_metadata::{AggregateResult, RecordError, ResultRecord};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, warn};

/// Merges worker result records into one [`AggregateResult`].
///
/// Records may arrive in any order. Counts add up, except in only-mode: once any record reports
/// `has_only`, everything counted from records without it is treated as skipped, including
/// records that arrived earlier.
#[derive(Clone, Debug, Default)]
pub struct ResultAggregator {
    passed: usize,
    failed: usize,
    skipped: usize,
    stubbed: usize,
    has_only: bool,
    records: usize,
    errors: Vec<RecordError>,
    logs: Vec<String>,
    outputs: Vec<String>,
    times: BTreeMap<Utf8PathBuf, u64>,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records merged so far.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Returns true if only-mode is in effect for the run.
    pub fn has_only(&self) -> bool {
        self.has_only
    }

    /// Merges one record.
    pub fn merge(&mut self, record: ResultRecord) {
        self.records += 1;

        if record.has_only && !self.has_only {
            debug!(
                moved = self.passed + self.failed + self.stubbed,
                "only-mode discovered, re-classifying earlier results as skipped"
            );
            self.skipped += self.passed + self.failed + self.stubbed;
            self.passed = 0;
            self.failed = 0;
            self.stubbed = 0;
            self.has_only = true;
        }

        if self.has_only && !record.has_only {
            self.skipped += record.total();
        } else {
            self.passed += record.passed;
            self.failed += record.failed;
            self.skipped += record.skipped;
            self.stubbed += record.stubbed;
        }

        self.errors.extend(record.errors);
        self.logs.extend(record.logs);
        if !record.output.is_empty() {
            self.outputs.push(record.output);
        }
        for (file, ms) in record.times {
            if let Some(previous) = self.times.insert(file.clone(), ms) {
                warn!(%file, previous, ms, "file timed by more than one worker, keeping the latest");
            }
        }
    }

    /// Finishes aggregation, stamping the run's wall-clock time.
    pub fn finish(self, elapsed: Duration) -> AggregateResult {
        AggregateResult {
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            stubbed: self.stubbed,
            has_only: self.has_only,
            time: elapsed,
            errors: self.errors,
            logs: self.logs,
            outputs: self.outputs,
            times: self.times,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn record(passed: usize, failed: usize, skipped: usize, stubbed: usize) -> ResultRecord {
        ResultRecord {
            passed,
            failed,
            skipped,
            stubbed,
            ..ResultRecord::default()
        }
    }

    #[test]
    fn counts_add_and_lists_concatenate() {
        let mut first = record(2, 1, 0, 1);
        first.errors.push(RecordError {
            title: "a.rs: math.divides".to_owned(),
            trace: "failure in test body: division by zero".to_owned(),
        });
        first.logs.push("seeded".to_owned());
        first.output = "  1) a.rs: math.divides\n".to_owned();
        first.times.insert("a.rs".into(), 12);

        let mut second = record(3, 0, 2, 0);
        second.times.insert("b.rs".into(), 40);

        let mut aggregator = ResultAggregator::new();
        aggregator.merge(first);
        aggregator.merge(second);
        assert_eq!(aggregator.record_count(), 2);

        let result = aggregator.finish(Duration::from_millis(55));
        assert_eq!(
            (result.passed, result.failed, result.skipped, result.stubbed),
            (5, 1, 2, 1)
        );
        assert!(!result.has_only);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.logs, vec!["seeded".to_owned()]);
        // Empty output fragments are dropped.
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.times.len(), 2);
        assert_eq!(result.time, Duration::from_millis(55));
    }

    #[test]
    fn only_record_reclassifies_earlier_counts() {
        let mut aggregator = ResultAggregator::new();
        aggregator.merge(record(4, 1, 1, 2));

        let mut only = record(1, 0, 3, 0);
        only.has_only = true;
        aggregator.merge(only);

        let result = aggregator.finish(Duration::ZERO);
        assert!(result.has_only);
        assert_eq!(
            (result.passed, result.failed, result.skipped, result.stubbed),
            (1, 0, 1 + 7 + 3, 0)
        );
    }

    #[test]
    fn non_only_record_after_only_is_skipped() {
        let mut aggregator = ResultAggregator::new();
        let mut only = record(2, 0, 0, 0);
        only.has_only = true;
        aggregator.merge(only);
        assert!(aggregator.has_only());

        let mut late = record(3, 1, 0, 1);
        late.errors.push(RecordError {
            title: "late.rs".to_owned(),
            trace: "failure in test body: nope".to_owned(),
        });
        aggregator.merge(late);

        let result = aggregator.finish(Duration::ZERO);
        assert_eq!(
            (result.passed, result.failed, result.skipped, result.stubbed),
            (2, 0, 5, 0)
        );
        // Errors are still reported even though the counts moved.
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn colliding_times_keep_latest() {
        let mut first = ResultRecord::default();
        first.times.insert("a.rs".into(), 10);
        let mut second = ResultRecord::default();
        second.times.insert("a.rs".into(), 30);

        let mut aggregator = ResultAggregator::new();
        aggregator.merge(first);
        aggregator.merge(second);
        let result = aggregator.finish(Duration::ZERO);
        assert_eq!(result.times.get(camino::Utf8Path::new("a.rs")), Some(&30));
    }

    fn arb_record() -> impl Strategy<Value = ResultRecord> {
        (0..20usize, 0..5usize, 0..5usize, 0..3usize, any::<bool>()).prop_map(
            |(passed, failed, skipped, stubbed, has_only)| ResultRecord {
                passed,
                failed,
                skipped,
                stubbed,
                has_only,
                ..ResultRecord::default()
            },
        )
    }

    fn counts(records: &[ResultRecord]) -> (usize, usize, usize, usize, bool) {
        let mut aggregator = ResultAggregator::new();
        for record in records {
            aggregator.merge(record.clone());
        }
        let result = aggregator.finish(Duration::ZERO);
        (
            result.passed,
            result.failed,
            result.skipped,
            result.stubbed,
            result.has_only,
        )
    }

    #[proptest(cases = 64)]
    fn merge_is_order_independent(
        #[strategy(proptest::collection::vec(arb_record(), 0..6))] records: Vec<ResultRecord>,
    ) {
        let forward = counts(&records);
        let mut reversed = records.clone();
        reversed.reverse();
        prop_assert_eq!(forward, counts(&reversed));

        // The total is always conserved.
        let total: usize = records.iter().map(ResultRecord::total).sum();
        prop_assert_eq!(forward.0 + forward.1 + forward.2 + forward.3, total);

        // In only-mode, only records that are themselves in only-mode contribute passes.
        let any_only = records.iter().any(|record| record.has_only);
        let expected_passed: usize = records
            .iter()
            .filter(|record| !any_only || record.has_only)
            .map(|record| record.passed)
            .sum();
        prop_assert_eq!(forward.0, expected_passed);
        prop_assert_eq!(forward.4, any_only);
    }
}
