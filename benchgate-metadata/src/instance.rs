// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A single task: an environment image paired with a test patch, a reference solution patch, and
/// optionally known test sets.
///
/// Fields that benchgate doesn't interpret (problem statements, repository metadata, and so on) are
/// kept in [`extra`](Self::extra) so that records can be written back out unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// The unique identifier for this instance, typically `owner__repo-number`.
    pub instance_id: String,

    /// The environment image to run this instance in. If absent, a name is derived from the
    /// instance ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,

    /// Commands that rebuild the project after source changes.
    #[serde(default)]
    pub rebuild_cmds: Vec<String>,

    /// Commands that run the test suite.
    #[serde(default)]
    pub test_cmds: Vec<String>,

    /// Commands whose only purpose is to print the test log.
    #[serde(default)]
    pub print_cmds: Vec<String>,

    /// A diff that adds or modifies tests only.
    pub test_patch: String,

    /// The reference solution diff.
    #[serde(default)]
    pub patch: String,

    /// The name of the log parser for this instance's test output.
    ///
    /// Older records call this field `parser`; see [`parser_name`](Self::parser_name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_parser: Option<String>,

    /// Tests that must keep passing.
    #[serde(
        rename = "PASS_TO_PASS",
        default,
        deserialize_with = "deserialize_test_list"
    )]
    pub pass_to_pass: Vec<String>,

    /// Tests that must go from not passing to passing.
    #[serde(
        rename = "FAIL_TO_PASS",
        default,
        deserialize_with = "deserialize_test_list"
    )]
    pub fail_to_pass: Vec<String>,

    /// All other fields in the record, preserved verbatim.
    ///
    /// This includes `pred_patch`, which is written out for evaluated records but never read:
    /// candidate patches always come from the predictions source.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InstanceRecord {
    /// The separator used to join command lists before execution.
    pub const COMMAND_SEPARATOR: &'static str = " ; ";

    /// Returns the log parser name for this record, falling back to the legacy `parser` field.
    ///
    /// Returns an empty string if neither is set.
    pub fn parser_name(&self) -> &str {
        if let Some(name) = &self.log_parser {
            return name;
        }
        self.extra
            .get("parser")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    /// The rebuild commands joined into a single command line.
    pub fn rebuild_command(&self) -> String {
        self.rebuild_cmds.join(Self::COMMAND_SEPARATOR)
    }

    /// The test commands joined into a single command line.
    pub fn test_command(&self) -> String {
        self.test_cmds.join(Self::COMMAND_SEPARATOR)
    }

    /// The print commands joined into a single command line.
    pub fn print_command(&self) -> String {
        self.print_cmds.join(Self::COMMAND_SEPARATOR)
    }
}

/// A candidate patch for an instance, as found in a predictions file.
///
/// Predictions files map instance IDs to these entries. Fields other than `model_patch` (model
/// names and the like) are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// The candidate diff. `null` is treated the same as an empty patch.
    #[serde(default)]
    pub model_patch: Option<String>,
}

/// A predictions file: instance ID to candidate patch.
pub type Predictions = BTreeMap<String, Prediction>;

// Known test sets are stored either as JSON arrays or, in many published datasets, as strings that
// contain a JSON-encoded array.
fn deserialize_test_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TestList {
        List(Vec<String>),
        Encoded(String),
    }

    match Option::<TestList>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(TestList::List(list)) => Ok(list),
        Some(TestList::Encoded(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(TestList::Encoded(s)) => serde_json::from_str(&s).map_err(|err| {
            serde::de::Error::custom(format!("invalid JSON-encoded test list: {err}"))
        }),
    }
}
