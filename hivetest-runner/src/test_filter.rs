// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering nodes by their dotted title path.

use crate::errors::TitlePatternError;
use regex::Regex;

/// Filters nodes by matching `grep` and `ignore` patterns against dotted title paths.
#[derive(Clone, Debug, Default)]
pub struct TitleFilter {
    grep: Option<Regex>,
    ignore: Option<Regex>,
}

impl TitleFilter {
    /// Compiles a new filter. Either pattern may be absent.
    pub fn new(grep: Option<&str>, ignore: Option<&str>) -> Result<Self, TitlePatternError> {
        let compile = |kind, pattern: Option<&str>| {
            pattern
                .map(|pattern| {
                    Regex::new(pattern).map_err(|err| TitlePatternError::new(kind, pattern, err))
                })
                .transpose()
        };

        Ok(Self {
            grep: compile("grep", grep)?,
            ignore: compile("ignore", ignore)?,
        })
    }

    /// Returns true if a grep pattern is set, in which case only matching nodes and their
    /// ancestors survive pruning.
    pub fn has_grep(&self) -> bool {
        self.grep.is_some()
    }

    /// Returns true if the title matches the grep pattern, or if there is no grep pattern.
    pub fn matches(&self, title: &str) -> bool {
        self.grep.as_ref().is_none_or(|grep| grep.is_match(title))
    }

    /// Returns true if the title matches the ignore pattern.
    pub fn ignores(&self, title: &str) -> bool {
        self.ignore.as_ref().is_some_and(|ignore| ignore.is_match(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, None, "parser.handles empty input", true, false ; "no patterns")]
    #[test_case(Some("parser"), None, "parser.handles empty input", true, false ; "grep matches")]
    #[test_case(Some("^lexer"), None, "parser.handles empty input", false, false ; "grep misses")]
    #[test_case(None, Some("empty"), "parser.handles empty input", true, true ; "ignore matches")]
    fn title_filter(
        grep: Option<&str>,
        ignore: Option<&str>,
        title: &str,
        matches: bool,
        ignores: bool,
    ) {
        let filter = TitleFilter::new(grep, ignore).unwrap();
        assert_eq!(filter.matches(title), matches);
        assert_eq!(filter.ignores(title), ignores);
    }

    #[test]
    fn invalid_pattern() {
        let err = TitleFilter::new(Some("("), None).unwrap_err();
        assert!(err.to_string().contains("invalid grep pattern"), "{err}");
    }
}
