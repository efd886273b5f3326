// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable data shared between hivetest workers and the orchestrator.
//!
//! Each worker emits exactly one [`ResultRecord`]. The orchestrator merges them into an
//! [`AggregateResult`], which is what reporters consume.

mod exit_codes;
mod records;

pub use exit_codes::*;
pub use records::*;
