// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Evaluate candidate patches against benchmark instances, and validate the instances themselves.
//!
//! This crate holds the `benchgate` command line. The evaluation and validation logic lives in
//! `benchgate-runner`.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
pub use output::{Color, OutputContext, StderrStyles};
