// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for hivetest.
//!
//! Configuration is read from an embedded default, with `.config/hivetest.toml` in the base
//! directory layered on top. Settings are grouped into named profiles.

mod imp;
mod workers;

pub use imp::*;
pub use workers::*;
