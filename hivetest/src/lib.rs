// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A test runner for suites of tests with lifecycle hooks, run across worker processes.
//!
//! Test binaries register their files in a [`Registry`] and call [`main_with_registry`]. The
//! same binary serves as the orchestrator and, re-executed with a hidden subcommand, as each
//! worker.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod watch;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;

use clap::Parser;
use hivetest_runner::tree::Registry;

/// Parses command-line arguments and runs the requested command against `registry`.
///
/// Exits the process with the command's exit code once it finishes.
pub fn main_with_registry(registry: &Registry) -> color_eyre::Result<()> {
    color_eyre::install()?;

    let app = HivetestApp::parse();
    let output = app.init_output();

    match app.exec(registry, output) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr();
            std::process::exit(error.process_exit_code())
        }
    }
}
