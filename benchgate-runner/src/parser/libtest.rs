// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::LogParser;
use benchgate_metadata::{StatusMap, TestStatus};

/// Parses the human-readable output of the libtest harness, as printed by `cargo test`.
///
/// ```text
/// test widget::tests::spin ... ok
/// test widget::tests::wobble ... FAILED
/// test widget::tests::fly ... ignored, needs network
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct LibtestParser;

impl LogParser for LibtestParser {
    fn parse(&self, log: &str) -> StatusMap {
        let mut statuses = StatusMap::new();

        for line in log.lines() {
            let Some(rest) = line.trim_end().strip_prefix("test ") else {
                continue;
            };
            let Some((name, outcome)) = rest.rsplit_once(" ... ") else {
                continue;
            };

            let status = match outcome {
                "ok" => TestStatus::Pass,
                "FAILED" => TestStatus::Fail,
                outcome if outcome.starts_with("ignored") => TestStatus::Skip,
                _ => continue,
            };

            let name = name.trim();
            if !name.is_empty() {
                statuses.insert(name.to_owned(), status);
            }
        }

        statuses
    }
}
