// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `benchgate` failures.
///
/// Per-instance failures never change the exit code: they are recorded in the run summary
/// instead. These codes cover failures of the run as a whole.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum BenchgateExitCode {}

impl BenchgateExitCode {
    /// No errors occurred and benchgate exited normally.
    pub const OK: i32 = 0;

    /// A user issue happened while setting up a benchgate invocation (bad config, bad flags).
    pub const SETUP_ERROR: i32 = 96;

    /// The dataset or the predictions file could not be loaded.
    pub const DATASET_LOAD_FAILED: i32 = 97;

    /// The async runtime used to drive instances could not be created.
    pub const RUNTIME_BUILD_FAILED: i32 = 98;

    /// Writing summaries or other output produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
