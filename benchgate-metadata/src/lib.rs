// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured, serializable data for benchgate.
//!
//! This crate contains the records benchgate reads (instance records, prediction maps) and the
//! artifacts it writes (status maps, reports, validation results and run summaries). It has no
//! behavior of its own beyond (de)serialization, so that downstream tooling can consume benchgate
//! output without depending on the runner.

mod exit_codes;
mod instance;
mod report;
mod status;
mod summary;

pub use exit_codes::*;
pub use instance::*;
pub use report::*;
pub use status::*;
pub use summary::*;
