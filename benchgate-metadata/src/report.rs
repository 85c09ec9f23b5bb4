// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// The verdict for a single evaluated instance, persisted as `report.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// The instance this report is for.
    pub instance_id: String,

    /// Whether the candidate patch resolved the instance.
    pub resolved: bool,

    /// How the known pass-to-pass tests fared.
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: KnownSetOutcome,

    /// How the known fail-to-pass tests fared.
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: KnownSetOutcome,
}

/// The members of a known test set that passed or failed after the candidate patch.
///
/// Skipped and missing tests appear in neither list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSetOutcome {
    /// Known tests that passed, sorted.
    pub success: Vec<String>,

    /// Known tests that failed, sorted.
    pub failure: Vec<String>,
}
