// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by hivetest.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{borrow::Cow, error, fmt, process::ExitStatus};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse hivetest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to hivetest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurs while parsing a [`WorkerCount`](crate::config::WorkerCount) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for workers: {input}")]
pub struct WorkerCountParseError {
    input: Cow<'static, str>,
}

impl WorkerCountParseError {
    pub(crate) fn new(input: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// A grep or ignore pattern failed to compile.
#[derive(Clone, Debug, Error)]
#[error("invalid {kind} pattern `{pattern}`")]
pub struct TitlePatternError {
    kind: &'static str,
    pattern: String,
    #[source]
    err: regex::Error,
}

impl TitlePatternError {
    pub(crate) fn new(kind: &'static str, pattern: impl Into<String>, err: regex::Error) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            err,
        }
    }
}

/// An error that occurred while saving the timing manifest.
#[derive(Debug, Error)]
pub enum ManifestSaveError {
    /// The cache directory could not be created.
    #[error("failed to create cache directory `{path}`")]
    CreateDir {
        /// The directory that failed to be created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The manifest could not be serialized.
    #[error("failed to serialize manifest for `{path}`")]
    Serialize {
        /// The path the manifest would have been written to.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The manifest could not be written.
    #[error("failed to write manifest to `{path}`")]
    Write {
        /// The path that failed to be written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurred while decoding frames sent by a worker.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FrameDecodeError {
    /// The frame tag wasn't recognized.
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),

    /// The frame announced a payload larger than the accepted maximum.
    #[error("frame length {len} exceeds the maximum of {max} bytes")]
    TooLarge {
        /// The announced payload length.
        len: usize,

        /// The maximum payload length.
        max: usize,
    },

    /// A result record frame did not contain a valid record.
    #[error("failed to deserialize result record: {message}")]
    InvalidRecord {
        /// The deserialization error message.
        message: String,
    },

    /// The stream ended in the middle of a frame.
    #[error("stream ended with {remaining} bytes of an incomplete frame")]
    Truncated {
        /// The number of bytes left over.
        remaining: usize,
    },
}

/// An error that occurred inside a worker process while serving an assignment.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The assignment could not be read from stdin.
    #[error("failed to read assignment from stdin")]
    ReadRequest(#[source] std::io::Error),

    /// The assignment could not be parsed.
    #[error("failed to parse assignment")]
    ParseRequest(#[source] serde_json::Error),

    /// A title pattern in the assignment was invalid.
    #[error("invalid run options")]
    Pattern(#[from] TitlePatternError),

    /// The assignment could not be run.
    #[error("failed to run assignment")]
    Run(#[source] RunError),

    /// The result record could not be serialized.
    #[error("failed to serialize result record")]
    SerializeRecord(#[source] serde_json::Error),

    /// Frames could not be written to stdout.
    #[error("failed to write to stdout")]
    Write(#[source] std::io::Error),
}

/// A worker process did not produce a result record.
#[derive(Debug, Error)]
pub enum WorkerExitError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker `{program}`")]
    Spawn {
        /// The program that failed to start.
        program: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The assignment could not be serialized.
    #[error("failed to serialize worker assignment")]
    SerializeRequest(#[source] serde_json::Error),

    /// Communicating with the worker failed.
    #[error("I/O error communicating with worker")]
    Io(#[source] std::io::Error),

    /// The worker sent malformed frames.
    #[error("worker sent malformed output")]
    Decode(#[from] FrameDecodeError),

    /// The worker exited without sending a result record.
    #[error("worker exited with {status} before reporting results")]
    NoRecord {
        /// The exit status of the worker.
        status: ExitStatus,
    },
}

/// An error that occurred while building an orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorBuildError {
    /// A title pattern was invalid.
    #[error("invalid run options")]
    Pattern(#[from] TitlePatternError),

    /// The current executable could not be determined.
    #[error("failed to determine the current executable for worker processes")]
    CurrentExe(#[source] std::io::Error),
}

/// An error that occurred while executing a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The async runtime could not be created.
    #[error("error creating Tokio runtime")]
    RuntimeCreate(#[source] std::io::Error),

    /// Progress output could not be written.
    #[error("failed to write progress output")]
    WriteOutput(#[source] std::io::Error),

    /// Building the in-process tree failed.
    #[error("invalid run options")]
    Pattern(#[from] TitlePatternError),
}

/// Displays the full chain of an error, separated by colons.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut current = self.error.source();
        while let Some(source) = current {
            write!(f, ": {source}")?;
            current = source.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_error_chain_joins_sources() {
        let err = WorkerExitError::Io(std::io::Error::other("broken pipe"));
        assert_eq!(
            DisplayErrorChain::new(&err).to_string(),
            "I/O error communicating with worker: broken pipe"
        );
    }
}
