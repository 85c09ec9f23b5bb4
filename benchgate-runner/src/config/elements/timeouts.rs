// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::time::Duration;

/// Hard time budgets for each blocking operation of the pipeline.
///
/// Exceeding any of these fails the instance being processed, and only that instance.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Timeouts {
    /// Budget for acquiring an environment, per attempt.
    #[serde(with = "humantime_serde")]
    pub acquire: Duration,

    /// Budget for applying one patch.
    #[serde(with = "humantime_serde")]
    pub patch: Duration,

    /// Budget for the rebuild commands.
    #[serde(with = "humantime_serde")]
    pub rebuild: Duration,

    /// Budget for one run of the test commands.
    #[serde(with = "humantime_serde")]
    pub test: Duration,

    /// Budget for the print commands.
    #[serde(with = "humantime_serde")]
    pub print: Duration,

    /// Budget for tearing down an environment.
    #[serde(with = "humantime_serde")]
    pub release: Duration,
}

impl Timeouts {
    /// The budget used for rebuild and test commands when nothing else is configured.
    pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(40 * 60);

    /// Returns the name of the first zero timeout, if any.
    pub(in crate::config) fn first_zero(&self) -> Option<&'static str> {
        [
            ("timeouts.acquire", self.acquire),
            ("timeouts.patch", self.patch),
            ("timeouts.rebuild", self.rebuild),
            ("timeouts.test", self.test),
            ("timeouts.print", self.print),
            ("timeouts.release", self.release),
        ]
        .into_iter()
        .find_map(|(key, timeout)| timeout.is_zero().then_some(key))
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            acquire: Duration::from_secs(20 * 60),
            patch: Duration::from_secs(5 * 60),
            rebuild: Self::DEFAULT_COMMAND_TIMEOUT,
            test: Self::DEFAULT_COMMAND_TIMEOUT,
            print: Duration::from_secs(5 * 60),
            release: Duration::from_secs(2 * 60),
        }
    }
}
