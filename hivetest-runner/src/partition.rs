// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting test files across workers.

use crate::manifest::{Manifest, ManifestWindow};
use camino::Utf8PathBuf;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The files assigned to one worker slot.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkAssignment {
    /// The slot index, starting at 0.
    pub slot: usize,

    /// The files to run, slowest first.
    pub files: Vec<Utf8PathBuf>,

    /// The sum of the files' expected durations, in milliseconds.
    pub expected_ms: f64,
}

/// Balances files across workers using timing history.
///
/// Files are sorted slowest first and dealt out in alternating sweeps across the slots, so
/// that the slowest file of one sweep shares a slot with the fastest file of the next. This is
/// a heuristic rather than optimal bin packing, but it never leaves a slot empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct Partitioner {
    window: ManifestWindow,
}

impl Partitioner {
    /// Creates a partitioner which estimates durations using the given window.
    pub fn new(window: ManifestWindow) -> Self {
        Self { window }
    }

    /// Splits `files` into at most `workers` assignments.
    ///
    /// Returns one assignment per slot, where the number of slots is the smaller of the file
    /// count and the worker count. A worker count of zero is treated as one.
    pub fn partition(
        &self,
        files: &[Utf8PathBuf],
        workers: usize,
        manifest: &Manifest,
    ) -> Vec<WorkAssignment> {
        let slots = files.len().min(workers.max(1));
        let mut assignments: Vec<_> = (0..slots)
            .map(|slot| WorkAssignment {
                slot,
                files: Vec::new(),
                expected_ms: 0.0,
            })
            .collect();
        if slots == 0 {
            return assignments;
        }

        // Stable, so files without history keep their original order.
        let sorted = files
            .iter()
            .map(|file| (file, manifest.expected(file, self.window)))
            .sorted_by(|(_, a), (_, b)| b.total_cmp(a));

        let mut forward = true;
        for (k, (file, expected)) in sorted.enumerate() {
            let offset = k % slots;
            if k > 0 && offset == 0 {
                forward = !forward;
            }
            let slot = if forward { offset } else { slots - 1 - offset };
            let assignment = &mut assignments[slot];
            assignment.files.push(file.clone());
            assignment.expected_ms += expected;
        }

        for assignment in &assignments {
            debug!(
                slot = assignment.slot,
                files = assignment.files.len(),
                expected_ms = assignment.expected_ms,
                "partitioned"
            );
        }
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use test_strategy::proptest;

    fn manifest(times: &[(&str, u64)]) -> Manifest {
        let mut manifest = Manifest::default();
        manifest.apply_times(
            &times
                .iter()
                .map(|&(file, ms)| (Utf8PathBuf::from(file), ms))
                .collect::<BTreeMap<_, _>>(),
        );
        manifest
    }

    fn paths(names: &[&str]) -> Vec<Utf8PathBuf> {
        names.iter().map(|&name| Utf8PathBuf::from(name)).collect()
    }

    fn files_of(assignments: &[WorkAssignment]) -> Vec<Vec<&str>> {
        assignments
            .iter()
            .map(|a| a.files.iter().map(|f| f.as_str()).collect())
            .collect()
    }

    #[test]
    fn slow_files_land_in_different_slots() {
        let manifest = manifest(&[("a", 10), ("b", 1), ("c", 1), ("d", 10)]);
        let assignments =
            Partitioner::default().partition(&paths(&["a", "b", "c", "d"]), 2, &manifest);

        assert_eq!(files_of(&assignments), vec![vec!["a", "c"], vec!["d", "b"]]);
        assert_eq!(assignments[0].expected_ms, 11.0);
        assert_eq!(assignments[1].expected_ms, 11.0);
    }

    #[test]
    fn unknown_files_zig_zag_in_order() {
        let assignments = Partitioner::default().partition(
            &paths(&["a", "b", "c", "d", "e"]),
            2,
            &Manifest::default(),
        );
        assert_eq!(
            files_of(&assignments),
            vec![vec!["a", "d", "e"], vec!["b", "c"]]
        );
    }

    #[test]
    fn slot_count_is_bounded() {
        let files = paths(&["a", "b"]);
        let partitioner = Partitioner::default();
        assert_eq!(partitioner.partition(&files, 8, &Manifest::default()).len(), 2);
        assert_eq!(
            files_of(&partitioner.partition(&files, 0, &Manifest::default())),
            vec![vec!["a", "b"]]
        );
        assert!(partitioner.partition(&[], 4, &Manifest::default()).is_empty());
    }

    #[test]
    fn window_selects_average() {
        let mut manifest = manifest(&[("a", 100), ("b", 10)]);
        manifest.apply_times(&BTreeMap::from([
            (Utf8PathBuf::from("a"), 0),
            (Utf8PathBuf::from("b"), 20),
        ]));
        let files = paths(&["a", "b"]);

        let latest = Partitioner::new(ManifestWindow::Latest).partition(&files, 2, &manifest);
        assert_eq!(files_of(&latest), vec![vec!["b"], vec!["a"]]);

        let long = Partitioner::new(ManifestWindow::Long).partition(&files, 2, &manifest);
        assert_eq!(files_of(&long), vec![vec!["a"], vec!["b"]]);
    }

    #[proptest(cases = 256)]
    fn every_file_assigned_once_and_no_slot_empty(
        #[strategy(proptest::collection::vec(0..1_000_u64, 0..40))] durations: Vec<u64>,
        #[strategy(0..12_usize)] workers: usize,
    ) {
        let files: Vec<_> = (0..durations.len())
            .map(|i| Utf8PathBuf::from(format!("file-{i}")))
            .collect();
        let manifest = manifest(
            &files
                .iter()
                .zip(&durations)
                .map(|(f, &d)| (f.as_str(), d))
                .collect::<Vec<_>>(),
        );

        let assignments = Partitioner::default().partition(&files, workers, &manifest);
        proptest::prop_assert_eq!(assignments.len(), files.len().min(workers.max(1)));
        proptest::prop_assert!(assignments.iter().all(|a| !a.files.is_empty()));

        let mut assigned: Vec<_> = assignments.iter().flat_map(|a| a.files.clone()).collect();
        assigned.sort();
        let mut expected = files.clone();
        expected.sort();
        proptest::prop_assert_eq!(assigned, expected);
    }
}
