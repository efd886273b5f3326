// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The timing manifest: per-file run durations, averaged over several windows and persisted
//! between runs.
//!
//! The manifest is read once before partitioning and written once after a run. Writes go
//! through a temporary file and a rename, so concurrent runs can lose each other's updates
//! but never corrupt the file.

use crate::errors::ManifestSaveError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io::Write};
use tracing::{debug, warn};

/// The file name of the manifest within the cache directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Which moving average to use when estimating how long a file takes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestWindow {
    /// The most recent run (`avg0`).
    #[default]
    Latest,
    /// The last 10 runs (`avg1`).
    Short,
    /// The last 100 runs (`avg2`).
    Medium,
    /// The last 1000 runs (`avg3`).
    Long,
}

impl ManifestWindow {
    /// All windows, shortest first.
    pub const ALL: [ManifestWindow; 4] = [Self::Latest, Self::Short, Self::Medium, Self::Long];

    /// Returns the number of runs this window averages over.
    pub fn size(self) -> u64 {
        match self {
            Self::Latest => 1,
            Self::Short => 10,
            Self::Medium => 100,
            Self::Long => 1000,
        }
    }
}

/// Timing history for one file. Averages are in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ManifestEntry {
    /// The number of runs recorded.
    pub runs: u64,
    /// Average over the last run.
    pub avg0: f64,
    /// Average over the last 10 runs.
    pub avg1: f64,
    /// Average over the last 100 runs.
    pub avg2: f64,
    /// Average over the last 1000 runs.
    pub avg3: f64,
}

impl ManifestEntry {
    /// Folds a newly observed duration into every average.
    pub fn record(&mut self, duration_ms: u64) {
        self.runs += 1;
        let sample = duration_ms as f64;
        for window in ManifestWindow::ALL {
            let portion = 1.0 / self.runs.min(window.size()) as f64;
            let avg = self.avg_mut(window);
            *avg = sample * portion + *avg * (1.0 - portion);
        }
    }

    /// Returns the expected duration according to a window.
    pub fn expected(&self, window: ManifestWindow) -> f64 {
        match window {
            ManifestWindow::Latest => self.avg0,
            ManifestWindow::Short => self.avg1,
            ManifestWindow::Medium => self.avg2,
            ManifestWindow::Long => self.avg3,
        }
    }

    fn avg_mut(&mut self, window: ManifestWindow) -> &mut f64 {
        match window {
            ManifestWindow::Latest => &mut self.avg0,
            ManifestWindow::Short => &mut self.avg1,
            ManifestWindow::Medium => &mut self.avg2,
            ManifestWindow::Long => &mut self.avg3,
        }
    }
}

/// Timing history for every file seen so far.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    /// Entries keyed by file path.
    #[serde(default)]
    pub files: BTreeMap<Utf8PathBuf, ManifestEntry>,
}

impl Manifest {
    /// Returns the expected duration of a file in milliseconds, or 0 if it has never run.
    pub fn expected(&self, file: &Utf8Path, window: ManifestWindow) -> f64 {
        self.files
            .get(file)
            .map_or(0.0, |entry| entry.expected(window))
    }

    /// Records the durations observed in a run.
    pub fn apply_times(&mut self, times: &BTreeMap<Utf8PathBuf, u64>) {
        for (file, &duration_ms) in times {
            self.files.entry(file.clone()).or_default().record(duration_ms);
        }
    }
}

/// Reads and writes the manifest within a cache directory.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    cache_dir: Utf8PathBuf,
    path: Utf8PathBuf,
}

impl ManifestStore {
    /// Creates a store for the given cache directory. The directory need not exist yet.
    pub fn new(cache_dir: impl Into<Utf8PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        let path = cache_dir.join(MANIFEST_FILE_NAME);
        Self { cache_dir, path }
    }

    /// Returns the path to the manifest file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Loads the manifest. A missing or unreadable manifest is treated as empty.
    pub fn load(&self) -> Manifest {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path, "no manifest found, starting fresh");
                return Manifest::default();
            }
            Err(error) => {
                warn!(path = %self.path, %error, "failed to read manifest, starting fresh");
                return Manifest::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|error| {
            warn!(path = %self.path, %error, "manifest is corrupt, starting fresh");
            Manifest::default()
        })
    }

    /// Writes the manifest, creating the cache directory if necessary.
    pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestSaveError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|error| {
            ManifestSaveError::CreateDir {
                path: self.cache_dir.clone(),
                error,
            }
        })?;

        let json = serde_json::to_string_pretty(manifest).map_err(|error| {
            ManifestSaveError::Serialize {
                path: self.path.clone(),
                error,
            }
        })?;
        atomicwrites::AtomicFile::new(&self.path, atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| ManifestSaveError::Write {
                path: self.path.clone(),
                error,
            })?;

        debug!(path = %self.path, files = manifest.files.len(), "wrote manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use test_strategy::proptest;

    #[test]
    fn first_run_sets_every_average() {
        let mut entry = ManifestEntry::default();
        entry.record(120);
        assert_eq!(
            entry,
            ManifestEntry {
                runs: 1,
                avg0: 120.0,
                avg1: 120.0,
                avg2: 120.0,
                avg3: 120.0,
            }
        );
    }

    #[test]
    fn second_run_moves_windows_by_their_portion() {
        let mut entry = ManifestEntry::default();
        entry.record(100);
        entry.record(200);
        assert_eq!(entry.runs, 2);
        assert_eq!(entry.avg0, 200.0);
        assert_eq!(entry.avg1, 150.0);
        assert_eq!(entry.avg3, 150.0);
    }

    #[test_case(ManifestWindow::Latest, 30.0 ; "latest")]
    #[test_case(ManifestWindow::Short, 20.0 ; "short")]
    #[test_case(ManifestWindow::Long, 20.0 ; "long")]
    fn expected_by_window(window: ManifestWindow, expected: f64) {
        let mut manifest = Manifest::default();
        let times = |ms| BTreeMap::from([(Utf8PathBuf::from("a.rs"), ms)]);
        manifest.apply_times(&times(10));
        manifest.apply_times(&times(20));
        manifest.apply_times(&times(30));

        let actual = manifest.expected(Utf8Path::new("a.rs"), window);
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
        assert_eq!(manifest.expected(Utf8Path::new("missing.rs"), window), 0.0);
    }

    #[proptest(cases = 64)]
    fn averages_stay_within_observed_range(
        #[strategy(proptest::collection::vec(0..10_000_u64, 1..50))] samples: Vec<u64>,
    ) {
        let mut entry = ManifestEntry::default();
        for &sample in &samples {
            entry.record(sample);
        }
        let min = *samples.iter().min().unwrap() as f64;
        let max = *samples.iter().max().unwrap() as f64;
        for window in ManifestWindow::ALL {
            let avg = entry.expected(window);
            proptest::prop_assert!(avg >= min - 1e-6 && avg <= max + 1e-6, "{window:?}: {avg}");
        }
        proptest::prop_assert_eq!(entry.avg0, *samples.last().unwrap() as f64);
    }

    #[test]
    fn load_missing_or_corrupt_is_empty() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("cache"));
        assert_eq!(store.load(), Manifest::default());

        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), Manifest::default());
    }

    #[test]
    fn save_creates_directory_and_round_trips() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("nested/cache"));

        let mut manifest = Manifest::default();
        manifest.apply_times(&BTreeMap::from([
            (Utf8PathBuf::from("a.rs"), 40),
            (Utf8PathBuf::from("b.rs"), 5),
        ]));
        store.save(&manifest).unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["files"]["a.rs"]["runs"], 1);
        assert_eq!(json["files"]["a.rs"]["avg3"], 40.0);
        assert_eq!(store.load(), manifest);
    }
}
