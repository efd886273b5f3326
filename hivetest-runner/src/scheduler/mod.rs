// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The phase scheduler, which runs one worker's [`NodeTree`](crate::tree::NodeTree).
//!
//! The scheduler walks the tree depth-first with a single cursor. Each node's
//! [`Phase`](crate::tree::Phase) records where the walk is, so returning to a suite after
//! visiting a child resumes that suite instead of restarting it.
//!
//! Exactly one body or hook runs at a time. Callback and future bodies suspend the walk until
//! they complete or their time limit elapses, whichever comes first. Time limits are soft: a
//! body that times out keeps running, and anything it signals afterwards is recorded as an
//! error against the node it came from.

mod context;
mod imp;

pub use context::{Done, TestContext};
pub(crate) use context::{Epoch, Signal};
pub use imp::*;
