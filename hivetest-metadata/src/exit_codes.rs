// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `hivetest` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum HivetestExitCode {}

impl HivetestExitCode {
    /// No errors occurred and hivetest exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, and no failures were recorded.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests, hooks or workers failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A worker process could not be started or spoke an unexpected protocol.
    pub const WORKER_PROTOCOL_ERROR: i32 = 70;

    /// A user issue happened while setting up a hivetest invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// A grep or ignore pattern failed to parse.
    pub const INVALID_PATTERN: i32 = 94;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
