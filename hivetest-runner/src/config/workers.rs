// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::WorkerCountParseError;
use serde::Deserialize;
use std::{cmp::Ordering, fmt, str::FromStr, sync::LazyLock};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Type for the `workers` config key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerCount {
    /// Run with a specified number of workers.
    Count(usize),

    /// Run with as many workers as there are logical CPUs.
    NumCpus,
}

impl WorkerCount {
    /// Gets the actual number of workers computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(workers) => workers,
            Self::NumCpus => get_num_cpus(),
        }
    }

    fn from_signed(count: i64) -> Option<Self> {
        match count.cmp(&0) {
            Ordering::Greater => Some(Self::Count(count as usize)),
            Ordering::Less => Some(Self::Count((get_num_cpus() as i64 + count).max(1) as usize)),
            Ordering::Equal => None,
        }
    }
}

impl FromStr for WorkerCount {
    type Err = WorkerCountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<i64>() {
            Err(e) => Err(WorkerCountParseError::new(format!("{s} ({e})"))),
            Ok(count) => Self::from_signed(count)
                .ok_or_else(|| WorkerCountParseError::new("0 (workers may not be 0)")),
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(workers) => write!(f, "{workers}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for WorkerCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = WorkerCount;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a non-zero integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(WorkerCount::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // TOML integers are i64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                WorkerCount::from_signed(v).ok_or_else(|| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
                })
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match i64::try_from(v) {
                    Ok(v) => self.visit_i64(v),
                    Err(_) => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("num-cpus", Some(WorkerCount::NumCpus) ; "num cpus")]
    #[test_case("4", Some(WorkerCount::Count(4)) ; "positive")]
    #[test_case("0", None ; "zero")]
    #[test_case("lots", None ; "garbage")]
    fn parse_worker_count(input: &str, expected: Option<WorkerCount>) {
        assert_eq!(input.parse::<WorkerCount>().ok(), expected);
    }

    #[test]
    fn negative_counts_are_relative_to_cpus() {
        let count: WorkerCount = "-1".parse().unwrap();
        assert_eq!(count.compute(), get_num_cpus().saturating_sub(1).max(1));
    }

    #[test]
    fn deserialize_from_json() {
        let count: WorkerCount = serde_json::from_str("3").unwrap();
        assert_eq!(count, WorkerCount::Count(3));
        let count: WorkerCount = serde_json::from_str(r#""num-cpus""#).unwrap();
        assert_eq!(count, WorkerCount::NumCpus);
        serde_json::from_str::<WorkerCount>("0").unwrap_err();
    }
}
