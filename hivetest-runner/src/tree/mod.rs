// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The in-memory tree of suites and tests for one worker.
//!
//! Trees are built by evaluating file definitions through a [`SuiteBuilder`]. Every
//! registration call creates one [`Node`] and appends it to the suite the builder is scoped
//! to; there is no ambient "current suite".

mod body;
mod builder;
mod node;
mod registry;

pub use body::*;
pub use builder::*;
pub use node::*;
pub use registry::*;
