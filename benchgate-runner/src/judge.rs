// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deciding whether a candidate patch resolves an instance.

use crate::errors::ConfigurationError;
use benchgate_metadata::{InstanceRecord, KnownSetOutcome, Report, StatusMap, TestStatus};
use itertools::Itertools;
use std::collections::BTreeSet;

/// The known test sets of an instance, checked for duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownSets {
    /// Tests that must keep passing.
    pub pass_to_pass: BTreeSet<String>,

    /// Tests that must go from not passing to passing.
    pub fail_to_pass: BTreeSet<String>,
}

impl KnownSets {
    /// Collects the known sets of an instance.
    ///
    /// Returns [`ConfigurationError::DuplicateKnownTest`] if either set lists a test twice.
    pub fn from_instance(instance: &InstanceRecord) -> Result<Self, ConfigurationError> {
        Ok(Self {
            pass_to_pass: unique_set(instance, "PASS_TO_PASS", &instance.pass_to_pass)?,
            fail_to_pass: unique_set(instance, "FAIL_TO_PASS", &instance.fail_to_pass)?,
        })
    }
}

fn unique_set(
    instance: &InstanceRecord,
    set: &'static str,
    tests: &[String],
) -> Result<BTreeSet<String>, ConfigurationError> {
    if let Some(test) = tests.iter().duplicates().next() {
        return Err(ConfigurationError::DuplicateKnownTest {
            instance_id: instance.instance_id.clone(),
            set,
            test: test.clone(),
        });
    }
    Ok(tests.iter().cloned().collect())
}

/// Judges a single post-patch run against the known sets.
///
/// The instance is resolved if no known test failed and at least one fail-to-pass test passed.
/// Skipped and missing tests count neither for nor against resolution.
///
/// # Panics
///
/// Panics if `post_patch_status` contains [`TestStatus::Error`].
pub fn judge(instance_id: &str, known: &KnownSets, post_patch_status: &StatusMap) -> Report {
    for (test, status) in post_patch_status {
        assert!(
            status.is_parser_output(),
            "status for `{test}` is `{status}`, expected pass, fail or skip"
        );
    }

    let outcome = |set: &BTreeSet<String>| {
        let mut outcome = KnownSetOutcome::default();
        // Iterating the sorted set keeps both lists sorted.
        for test in set {
            match post_patch_status.get(test) {
                Some(TestStatus::Pass) => outcome.success.push(test.clone()),
                Some(TestStatus::Fail) => outcome.failure.push(test.clone()),
                Some(TestStatus::Skip) | Some(TestStatus::Error) | None => {}
            }
        }
        outcome
    };

    let pass_to_pass = outcome(&known.pass_to_pass);
    let fail_to_pass = outcome(&known.fail_to_pass);
    let resolved = pass_to_pass.failure.is_empty()
        && fail_to_pass.failure.is_empty()
        && !fail_to_pass.success.is_empty();

    Report {
        instance_id: instance_id.to_owned(),
        resolved,
        pass_to_pass,
        fail_to_pass,
    }
}
