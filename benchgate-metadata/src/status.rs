// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// The outcome of a single test, as reported by a log parser.
///
/// Only [`Pass`](Self::Pass), [`Fail`](Self::Fail) and [`Skip`](Self::Skip) are legal parser
/// outputs. [`Error`](Self::Error) is reserved for infrastructure failures and is never produced by
/// a parser.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The test passed.
    Pass,
    /// The test failed.
    Fail,
    /// The test was skipped.
    Skip,
    /// The test could not be run because of an infrastructure failure.
    Error,
}

impl TestStatus {
    /// Returns true if this status may be produced by a log parser.
    pub fn is_parser_output(self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Skip)
    }

    /// Returns the lowercase string form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "proptest1")]
impl proptest::arbitrary::Arbitrary for TestStatus {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    /// Generates legal parser outputs only.
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;

        prop_oneof![Just(Self::Pass), Just(Self::Fail), Just(Self::Skip)].boxed()
    }
}

/// A map from test identifier to its status.
///
/// Sorted by identifier so that serialized output is deterministic.
pub type StatusMap = BTreeMap<String, TestStatus>;

/// The outcome of running the test suite before and after applying a solution patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The instance this result is for.
    pub instance_id: String,

    /// Statuses observed with only the test patch applied.
    pub pre_patch_status: StatusMap,

    /// Statuses observed with the test patch and solution patch applied, reconciled across
    /// stability trials.
    pub post_patch_status: StatusMap,
}

/// An [`ExecutionResult`] along with the derived known test sets.
///
/// This is persisted as `status.json` in validation mode, and its fields are merged into the
/// instance record written to `validated_instances.jsonl`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The execution result the sets were derived from.
    #[serde(flatten)]
    pub execution: ExecutionResult,

    /// Tests that passed both before and after the solution patch.
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: Vec<String>,

    /// Tests that did not pass before the solution patch but pass after it.
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: Vec<String>,
}

impl ValidationResult {
    /// The instance this result is for.
    pub fn instance_id(&self) -> &str {
        &self.execution.instance_id
    }

    /// Returns true if this instance is retained as a benchmark task: the solution patch must make
    /// at least one test go from not passing to passing.
    pub fn is_valid(&self) -> bool {
        !self.fail_to_pass.is_empty()
    }
}
