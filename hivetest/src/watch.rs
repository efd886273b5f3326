// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use std::{
    collections::BTreeMap,
    thread,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// Tells watch mode when to start another run.
pub(crate) trait ChangeSource {
    /// Blocks until at least one watched path has changed, and returns the changed paths.
    fn wait_for_change(&mut self) -> Vec<Utf8PathBuf>;
}

/// Polls the modification times of a fixed set of paths.
///
/// A path that appears, disappears or gets a new modification time counts as changed. Paths
/// that can't be read are treated as absent.
#[derive(Debug)]
pub(crate) struct PollingChangeSource {
    base_dir: Utf8PathBuf,
    interval: Duration,
    mtimes: BTreeMap<Utf8PathBuf, Option<SystemTime>>,
}

impl PollingChangeSource {
    pub(crate) fn new(
        base_dir: impl Into<Utf8PathBuf>,
        paths: impl IntoIterator<Item = Utf8PathBuf>,
        interval: Duration,
    ) -> Self {
        let base_dir = base_dir.into();
        let mtimes = paths
            .into_iter()
            .map(|path| {
                let mtime = read_mtime(&base_dir, &path);
                (path, mtime)
            })
            .collect();
        Self {
            base_dir,
            interval,
            mtimes,
        }
    }

    /// Re-reads every modification time, returning the paths that changed since the last call.
    pub(crate) fn poll(&mut self) -> Vec<Utf8PathBuf> {
        let mut changed = Vec::new();
        for (path, mtime) in &mut self.mtimes {
            let current = read_mtime(&self.base_dir, path);
            if current != *mtime {
                *mtime = current;
                changed.push(path.clone());
            }
        }
        changed
    }
}

impl ChangeSource for PollingChangeSource {
    fn wait_for_change(&mut self) -> Vec<Utf8PathBuf> {
        loop {
            thread::sleep(self.interval);
            let changed = self.poll();
            if !changed.is_empty() {
                return changed;
            }
        }
    }
}

fn read_mtime(base_dir: &Utf8Path, path: &Utf8Path) -> Option<SystemTime> {
    let full_path = base_dir.join(path);
    match full_path.metadata().and_then(|metadata| metadata.modified()) {
        Ok(mtime) => Some(mtime),
        Err(error) => {
            debug!(%full_path, %error, "unable to read modification time");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn detects_modification_creation_and_removal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "a").unwrap();
        fs::write(dir.path().join("b.rs"), "b").unwrap();

        let mut source = PollingChangeSource::new(
            dir.path(),
            ["a.rs", "b.rs", "c.rs"].map(Utf8PathBuf::from),
            Duration::from_millis(1),
        );
        assert_eq!(source.poll(), Vec::<Utf8PathBuf>::new());

        let file = fs::File::options()
            .write(true)
            .open(dir.path().join("a.rs"))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        drop(file);
        assert_eq!(source.poll(), vec![Utf8PathBuf::from("a.rs")]);
        // Nothing changed since the last poll.
        assert_eq!(source.poll(), Vec::<Utf8PathBuf>::new());

        fs::remove_file(dir.path().join("b.rs")).unwrap();
        fs::write(dir.path().join("c.rs"), "c").unwrap();
        assert_eq!(
            source.wait_for_change(),
            vec![Utf8PathBuf::from("b.rs"), Utf8PathBuf::from("c.rs")]
        );
    }
}
