// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{LogParser, OutcomePolicy};
use benchgate_metadata::{StatusMap, TestStatus};

/// Parses pytest's short test summary (`pytest -rA`) and anything that mimics it.
///
/// Each recognized line starts with an outcome keyword followed by the test identifier:
///
/// ```text
/// PASSED tests/test_widget.py::test_spin
/// FAILED tests/test_widget.py::test_wobble - AssertionError: assert 1 == 2
/// ```
///
/// If a test shows up on more than one line, the last line wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultParser {
    policy: OutcomePolicy,
}

impl DefaultParser {
    /// Creates a new parser that folds `XFAIL` and `ERROR` according to `policy`.
    pub fn new(policy: OutcomePolicy) -> Self {
        Self { policy }
    }

    fn outcome(&self, line: &str) -> Option<TestStatus> {
        if line.starts_with("PASSED") {
            Some(TestStatus::Pass)
        } else if line.starts_with("FAILED") {
            Some(TestStatus::Fail)
        } else if line.starts_with("SKIPPED") {
            Some(TestStatus::Skip)
        } else if line.starts_with("ERROR") {
            Some(self.policy.error)
        } else if line.starts_with("XFAIL") {
            Some(self.policy.xfail)
        } else {
            None
        }
    }
}

impl LogParser for DefaultParser {
    fn parse(&self, log: &str) -> StatusMap {
        let mut statuses = StatusMap::new();

        for line in log.lines() {
            let Some(status) = self.outcome(line) else {
                continue;
            };

            // The failure reason may contain anything, including spaces.
            let line = if line.starts_with("FAILED") {
                line.split_once(" - ").map_or(line, |(head, _)| head)
            } else {
                line
            };

            if let Some(test) = line.split_whitespace().nth(1) {
                statuses.insert(test.to_owned(), status);
            }
        }

        statuses
    }
}
