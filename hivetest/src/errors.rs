// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use hivetest_metadata::HivetestExitCode;
use hivetest_runner::errors::*;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are short placeholders. Errors are meant to be printed through
// display_to_stderr, which also prints their causes.

/// An error that hivetest expects and reports without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the base directory")]
    BaseDirError {
        #[source]
        err: std::io::Error,
    },
    #[error("base directory is not valid UTF-8")]
    BaseDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("orchestrator build error")]
    OrchestratorBuildError {
        #[from]
        err: OrchestratorBuildError,
    },
    #[error("run error")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("worker error")]
    WorkerError {
        #[from]
        err: WorkerError,
    },
    #[error("error writing output")]
    WriteOutput {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::BaseDirError { .. }
            | Self::BaseDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. } => HivetestExitCode::SETUP_ERROR,
            Self::OrchestratorBuildError { err } => match err {
                OrchestratorBuildError::Pattern(_) => HivetestExitCode::INVALID_PATTERN,
                OrchestratorBuildError::CurrentExe(_) => HivetestExitCode::SETUP_ERROR,
            },
            Self::RunError { err } => match err {
                RunError::RuntimeCreate(_) => HivetestExitCode::SETUP_ERROR,
                RunError::WriteOutput(_) => HivetestExitCode::WRITE_OUTPUT_ERROR,
                RunError::Pattern(_) => HivetestExitCode::INVALID_PATTERN,
            },
            Self::WorkerError { err } => match err {
                WorkerError::Pattern(_) => HivetestExitCode::INVALID_PATTERN,
                WorkerError::Write(_) => HivetestExitCode::WRITE_OUTPUT_ERROR,
                WorkerError::ReadRequest(_)
                | WorkerError::ParseRequest(_)
                | WorkerError::Run(_)
                | WorkerError::SerializeRecord(_) => HivetestExitCode::WORKER_PROTOCOL_ERROR,
            },
            Self::WriteOutput { .. } => HivetestExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::BaseDirError { err } => {
                error!("could not determine the base directory");
                Some(err as &dyn Error)
            }
            Self::BaseDirInvalidUtf8 { path } => {
                error!("base directory `{}` is not valid UTF-8", path.display());
                None
            }
            Self::ConfigParseError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::OrchestratorBuildError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RunError { err } => {
                error!("{err}");
                err.source()
            }
            Self::WorkerError { err } => {
                error!("worker {err}");
                err.source()
            }
            Self::WriteOutput { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn pattern_error() -> TitlePatternError {
        hivetest_runner::test_filter::TitleFilter::new(Some("("), None).unwrap_err()
    }

    #[test_case(
        ExpectedError::WriteOutput { err: std::io::Error::other("closed") },
        HivetestExitCode::WRITE_OUTPUT_ERROR
        ; "write output"
    )]
    #[test_case(
        ExpectedError::from(OrchestratorBuildError::Pattern(pattern_error())),
        HivetestExitCode::INVALID_PATTERN
        ; "invalid pattern"
    )]
    #[test_case(
        ExpectedError::from(RunError::RuntimeCreate(std::io::Error::other("no threads"))),
        HivetestExitCode::SETUP_ERROR
        ; "runtime create"
    )]
    #[test_case(
        ExpectedError::from(WorkerError::ReadRequest(std::io::Error::other("eof"))),
        HivetestExitCode::WORKER_PROTOCOL_ERROR
        ; "worker read"
    )]
    fn exit_codes(error: ExpectedError, expected: i32) {
        assert_eq!(error.process_exit_code(), expected);
    }
}
