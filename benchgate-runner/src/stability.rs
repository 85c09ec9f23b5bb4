// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciling repeated test runs and deriving known test sets.
//!
//! A test is only certified as passing if it passed in every trial. This is deliberately
//! pessimistic: a flaky test must never be certified as fixed.

use benchgate_metadata::{ExecutionResult, StatusMap, TestStatus, ValidationResult};
use std::collections::BTreeSet;

/// Reconciles the status maps of several trials into one.
///
/// For every test seen in any trial, a test missing from a trial counts as skipped in that trial.
/// Then any failure makes the test fail, otherwise any skip makes it skipped, otherwise it passed.
///
/// # Panics
///
/// Panics if any trial contains [`TestStatus::Error`], which parsers never produce.
pub fn reconcile_trials(trials: &[StatusMap]) -> StatusMap {
    let all_tests: BTreeSet<&str> = trials
        .iter()
        .flat_map(|trial| trial.keys().map(|test| test.as_str()))
        .collect();

    all_tests
        .into_iter()
        .map(|test| {
            let mut reconciled = TestStatus::Pass;
            for trial in trials {
                let status = trial.get(test).copied().unwrap_or(TestStatus::Skip);
                assert!(
                    status.is_parser_output(),
                    "trial status for `{test}` is `{status}`, expected pass, fail or skip"
                );
                reconciled = match (reconciled, status) {
                    (TestStatus::Fail, _) | (_, TestStatus::Fail) => TestStatus::Fail,
                    (TestStatus::Skip, _) | (_, TestStatus::Skip) => TestStatus::Skip,
                    _ => TestStatus::Pass,
                };
            }
            (test.to_owned(), reconciled)
        })
        .collect()
}

/// Derives the known test sets from the statuses before and after the solution patch.
///
/// * `PASS_TO_PASS` is every test that passed both before and after.
/// * `FAIL_TO_PASS` is every test that passed after but not before, including tests that didn't
///   exist before.
///
/// # Panics
///
/// Panics if either map contains [`TestStatus::Error`].
pub fn compare(
    instance_id: impl Into<String>,
    pre_patch_status: StatusMap,
    post_patch_status: StatusMap,
) -> ValidationResult {
    for (test, status) in pre_patch_status.iter().chain(&post_patch_status) {
        assert!(
            status.is_parser_output(),
            "status for `{test}` is `{status}`, expected pass, fail or skip"
        );
    }

    let mut pass_to_pass = Vec::new();
    let mut fail_to_pass = Vec::new();
    // BTreeMap iteration is sorted, so both lists come out sorted.
    for (test, status) in &post_patch_status {
        if *status != TestStatus::Pass {
            continue;
        }
        if pre_patch_status.get(test) == Some(&TestStatus::Pass) {
            pass_to_pass.push(test.clone());
        } else {
            fail_to_pass.push(test.clone());
        }
    }

    ValidationResult {
        execution: ExecutionResult {
            instance_id: instance_id.into(),
            pre_patch_status,
            post_patch_status,
        },
        pass_to_pass,
        fail_to_pass,
    }
}
