// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for hivetest.
//!
//! A run goes through these steps:
//!
//! 1. The [timing manifest](manifest) is loaded from the profile's store directory.
//! 2. The [partitioner](partition) splits the test files into one assignment per worker.
//! 3. The [orchestrator](runner) runs every assignment, either in process or in
//!    [worker processes](worker) which talk back over a [framed](framing) stdout.
//! 4. Each worker builds a fresh [tree](tree) from the [`Registry`](tree::Registry) and walks
//!    it with the [phase scheduler](scheduler).
//! 5. Worker records are merged by the [aggregator](reporter::ResultAggregator), and observed
//!    file times are written back to the manifest.

pub mod config;
pub mod errors;
pub mod framing;
pub mod manifest;
pub mod partition;
pub mod reporter;
pub mod runner;
pub mod scheduler;
pub mod test_filter;
mod time;
pub mod tree;
pub mod worker;
