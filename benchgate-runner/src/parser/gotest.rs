// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::LogParser;
use benchgate_metadata::{StatusMap, TestStatus};

/// Parses the output of `go test -v`.
///
/// Subtest results are indented below their parent and are recorded under their full
/// slash-separated name.
#[derive(Clone, Copy, Debug, Default)]
pub struct GoTestParser;

impl LogParser for GoTestParser {
    fn parse(&self, log: &str) -> StatusMap {
        let mut statuses = StatusMap::new();

        for line in log.lines() {
            let Some(rest) = line.trim_start().strip_prefix("--- ") else {
                continue;
            };
            let Some((outcome, rest)) = rest.split_once(": ") else {
                continue;
            };

            let status = match outcome {
                "PASS" => TestStatus::Pass,
                "FAIL" => TestStatus::Fail,
                "SKIP" => TestStatus::Skip,
                _ => continue,
            };

            // The name is followed by the elapsed time, as in "TestSpin (0.01s)".
            if let Some(name) = rest.split_whitespace().next() {
                statuses.insert(name.to_owned(), status);
            }
        }

        statuses
    }
}
