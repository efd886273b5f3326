// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process orchestrator.
//!
//! The orchestrator takes the [`WorkAssignment`](crate::partition::WorkAssignment)s produced by
//! the partitioner and runs each one, either in this process or in a worker process per
//! assignment. Worker progress is streamed to an output sink as it arrives, and every worker's
//! [`ResultRecord`](hivetest_metadata::ResultRecord) is merged into one
//! [`AggregateResult`](hivetest_metadata::AggregateResult).

mod imp;
mod process;

pub use imp::*;
