// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress reporting and result aggregation.
//!
//! Workers report one progress character per finished test through a [`ProgressReporter`].
//! The orchestrator merges each worker's [`ResultRecord`](hivetest_metadata::ResultRecord)
//! through a [`ResultAggregator`].

mod aggregator;
mod progress;

pub use aggregator::*;
pub use progress::*;
