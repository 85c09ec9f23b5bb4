// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// The aggregate outcome of an evaluation run, persisted as `results.json`.
///
/// Every submitted instance lands in exactly one of the `empty_patch`, `success`, `failure` and
/// `error` buckets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Number of instances submitted for evaluation.
    pub submitted: usize,
    /// IDs of submitted instances, in input order.
    pub submitted_ids: Vec<String>,
    /// Number of instances whose candidate patch was empty.
    pub empty_patch: usize,
    /// IDs of instances whose candidate patch was empty, sorted.
    pub empty_patch_ids: Vec<String>,
    /// Number of resolved instances.
    pub success: usize,
    /// IDs of resolved instances, sorted.
    pub success_ids: Vec<String>,
    /// Number of instances that ran to completion but weren't resolved.
    pub failure: usize,
    /// IDs of instances that ran to completion but weren't resolved, sorted.
    pub failure_ids: Vec<String>,
    /// Number of instances that couldn't be evaluated.
    pub error: usize,
    /// IDs of instances that couldn't be evaluated, sorted.
    pub error_ids: Vec<String>,
}

/// The aggregate outcome of a validation run, persisted as `validation_results.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Number of instances submitted for validation.
    pub submitted: usize,
    /// Number of instances with at least one fail-to-pass test.
    pub valid: usize,
    /// IDs of instances with at least one fail-to-pass test, sorted.
    pub valid_ids: Vec<String>,
    /// Number of instances whose solution patch fixed no observable test.
    pub invalid: usize,
    /// IDs of instances whose solution patch fixed no observable test, sorted.
    pub invalid_ids: Vec<String>,
    /// Number of instances that couldn't be validated.
    pub error: usize,
    /// IDs of instances that couldn't be validated, sorted.
    pub error_ids: Vec<String>,
}
