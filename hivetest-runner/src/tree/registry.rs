// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{NodeTree, SuiteBuilder};
use crate::{errors::TitlePatternError, scheduler::RunOptions};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::warn;

/// The definition function for one test file.
pub type FileDefinition = fn(&mut SuiteBuilder<'_>);

/// Maps test file paths to their definitions.
///
/// Loading a file means evaluating its definition into a fresh [`NodeTree`]. Trees are never
/// reused, so every run starts from a clean slate.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    files: IndexMap<Utf8PathBuf, FileDefinition>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition for a file path, replacing any previous definition.
    pub fn register(&mut self, path: impl Into<Utf8PathBuf>, define: FileDefinition) -> &mut Self {
        let path = path.into();
        if self.files.insert(path.clone(), define).is_some() {
            warn!(%path, "replacing existing definition");
        }
        self
    }

    /// Returns registered paths in registration order.
    pub fn paths(&self) -> impl ExactSizeIterator<Item = &Utf8Path> + '_ {
        self.files.keys().map(|path| path.as_path())
    }

    /// Returns true if a definition exists for this path.
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.files.contains_key(path)
    }

    /// Builds a tree for the given files, in order.
    ///
    /// A path without a definition becomes a failing file suite rather than an error.
    pub fn load(
        &self,
        files: &[Utf8PathBuf],
        options: &RunOptions,
    ) -> Result<NodeTree, TitlePatternError> {
        let mut tree = NodeTree::new(options.timeout, options.title_filter()?);
        for file in files {
            match self.files.get(file) {
                Some(define) => {
                    tree.add_file(file.clone(), *define);
                }
                None => {
                    warn!(%file, "no definition registered");
                    tree.add_load_failure(
                        file.clone(),
                        format!("no suite definition is registered for `{file}`"),
                    );
                }
            }
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Body, NodeErrorKind};
    use pretty_assertions::assert_eq;

    fn math(s: &mut SuiteBuilder<'_>) {
        s.it("adds", Body::sync(|_| Ok(())));
    }

    #[test]
    fn load_preserves_file_order_and_reports_missing() {
        let mut registry = Registry::new();
        registry.register("math.rs", math);

        let files = vec![Utf8PathBuf::from("missing.rs"), Utf8PathBuf::from("math.rs")];
        let tree = registry.load(&files, &RunOptions::default()).unwrap();

        let names: Vec<_> = tree.files().map(|id| tree[id].title()).collect();
        assert_eq!(names, vec!["missing.rs", "math.rs"]);

        let missing = tree.files().next().unwrap();
        let error = tree[missing].error().expect("missing file has an error");
        assert_eq!(error.kind(), NodeErrorKind::Load);
        assert_eq!(tree.count_tests(tree.root()), 1);
    }

    #[test]
    fn load_rejects_invalid_patterns() {
        let registry = Registry::new();
        let options = RunOptions {
            grep: Some("[".to_owned()),
            ..RunOptions::default()
        };
        registry.load(&[], &options).unwrap_err();
    }
}
