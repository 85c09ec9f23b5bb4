// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events emitted by the instance runner.
//!
//! These types are passed to the callback given to
//! [`InstanceRunner::evaluate`](crate::runner::InstanceRunner::evaluate) and
//! [`InstanceRunner::validate`](crate::runner::InstanceRunner::validate).

use crate::errors::InstanceError;
use std::{fmt, time::Duration};

/// An event that occurred during a run.
#[derive(Clone, Debug)]
pub struct RunEvent<'a> {
    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: RunEventKind<'a>,
}

/// Whether instances are being evaluated or validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Candidate patches are judged against known test sets.
    Evaluate,

    /// Known test sets are derived from solution patches.
    Validate,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluate => f.write_str("evaluate"),
            Self::Validate => f.write_str("validate"),
        }
    }
}

/// The kind of run event this is.
///
/// Forms part of [`RunEvent`].
#[derive(Clone, Debug)]
pub enum RunEventKind<'a> {
    /// The run started.
    RunStarted {
        /// Whether this is an evaluation or a validation run.
        mode: RunMode,

        /// The number of submitted instances.
        instance_count: usize,

        /// The maximum number of instances processed at a time.
        workers: usize,
    },

    /// An instance task started and will acquire an environment.
    InstanceStarted {
        /// The instance.
        instance_id: &'a str,

        /// The number of instance tasks currently running, including this one.
        running: usize,
    },

    /// An instance's result was read back from a previous run.
    InstanceCached {
        /// The instance.
        instance_id: &'a str,

        /// The verdict recorded by the previous run.
        verdict: Verdict<'a>,
    },

    /// An instance's candidate patch was empty, so nothing was run for it.
    InstanceEmptyPatch {
        /// The instance.
        instance_id: &'a str,
    },

    /// An instance finished, successfully or not.
    InstanceFinished {
        /// The instance.
        instance_id: &'a str,

        /// The verdict.
        verdict: Verdict<'a>,

        /// How long the instance took.
        time_taken: Duration,

        /// The number of instance tasks still running.
        running: usize,
    },

    /// The run finished.
    RunFinished {
        /// Whether this is an evaluation or a validation run.
        mode: RunMode,

        /// Final counts.
        stats: RunStats,
    },
}

/// The outcome of a single instance.
#[derive(Clone, Copy, Debug)]
pub enum Verdict<'a> {
    /// The candidate patch resolved the instance.
    Resolved,

    /// The candidate patch ran but didn't resolve the instance.
    Unresolved,

    /// The solution patch fixed at least one test.
    Valid {
        /// The number of fail-to-pass tests.
        fail_to_pass: usize,
    },

    /// The solution patch fixed no observable test.
    Invalid,

    /// The instance couldn't be processed.
    Errored(&'a InstanceError),
}

/// Counts accumulated over a run.
///
/// In validation runs, `success` counts valid instances and `failure` invalid ones.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The number of submitted instances.
    pub submitted: usize,

    /// The number of instances with a final outcome so far, cached and empty ones included.
    pub finished: usize,

    /// The number of instances whose outcome was read back from a previous run.
    pub cached: usize,

    /// Resolved or valid instances.
    pub success: usize,

    /// Unresolved or invalid instances.
    pub failure: usize,

    /// Instances with an empty candidate patch.
    pub empty_patch: usize,

    /// Instances that couldn't be processed.
    pub error: usize,
}

impl RunStats {
    /// Creates stats for a run of `submitted` instances.
    pub fn new(submitted: usize) -> Self {
        Self {
            submitted,
            ..Self::default()
        }
    }

    /// Returns true if every submitted instance finished without an error.
    pub fn is_success(&self) -> bool {
        self.error == 0 && self.finished == self.submitted
    }

    pub(crate) fn on_verdict(&mut self, verdict: &Verdict<'_>, cached: bool) {
        self.finished += 1;
        if cached {
            self.cached += 1;
        }
        match verdict {
            Verdict::Resolved | Verdict::Valid { .. } => self.success += 1,
            Verdict::Unresolved | Verdict::Invalid => self.failure += 1,
            Verdict::Errored(_) => self.error += 1,
        }
    }

    pub(crate) fn on_empty_patch(&mut self) {
        self.finished += 1;
        self.empty_patch += 1;
    }
}
