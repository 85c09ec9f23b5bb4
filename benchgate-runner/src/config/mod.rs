// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for benchgate.
//!
//! Configuration is layered: the embedded default config comes first, then a user config file if
//! one is present. Command-line options override both.

mod elements;
mod imp;

pub use elements::*;
pub use imp::*;
