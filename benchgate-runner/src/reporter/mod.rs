// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the progress and results of a run in human-readable form.
//!
//! The main type here is [`DisplayReporter`], which turns [`RunEvent`]s into status lines.

mod displayer;
pub mod events;

pub use displayer::DisplayReporter;
pub use events::{RunEvent, RunEventKind, RunMode, RunStats, Verdict};
