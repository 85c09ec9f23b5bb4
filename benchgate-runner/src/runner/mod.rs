// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The instance runner.
//!
//! The main structure in this module is [`InstanceRunner`], which drives each instance through the
//! pipeline in its own task, at most `workers` at a time.

mod context;
mod imp;

pub use context::RunContext;
pub use imp::*;
