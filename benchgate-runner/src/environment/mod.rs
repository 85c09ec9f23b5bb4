// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The runtime that instances execute in.
//!
//! benchgate doesn't build or provision environments itself. It drives them through the narrow
//! [`EnvironmentProvider`] and [`Environment`] traits, which [`DockerProvider`] implements on top
//! of the Docker CLI.
//!
//! Every operation takes a timeout. Implementations should stop the underlying work once it
//! elapses and return [`EnvironmentError::Timeout`]; callers enforce the same budget on their side
//! as well.

mod docker;

pub use docker::{DockerEnvironment, DockerProvider};

use crate::{errors::EnvironmentError, platform::Platform};
use std::{future::Future, time::Duration};

/// The output of a command run inside an environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output and standard error, interleaved as far as the environment allows.
    pub output: String,

    /// The exit code, or `None` if the command was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Creates isolated environments.
pub trait EnvironmentProvider: Send + Sync + 'static {
    /// The environment type this provider hands out.
    type Environment: Environment;

    /// Creates a fresh environment from `image`, scoped to a single instance.
    ///
    /// The environment's working directory starts out as [`Platform::default_workdir`].
    fn acquire(
        &self,
        image: &str,
        instance_id: &str,
        platform: Platform,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Environment, EnvironmentError>> + Send;
}

/// A single isolated, disposable environment.
pub trait Environment: Send + Sync + 'static {
    /// Applies a unified diff in the working directory.
    ///
    /// Returns [`EnvironmentError::PatchRejected`] if the diff doesn't apply.
    fn apply_patch(
        &self,
        diff: &str,
        verbose: bool,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput, EnvironmentError>> + Send;

    /// Runs a shell command in the working directory.
    ///
    /// A non-zero exit code is not an error: it is reported through
    /// [`CommandOutput::exit_code`].
    fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput, EnvironmentError>> + Send;

    /// The directory commands and patches currently run in.
    fn workdir(&self) -> &str;

    /// Changes the directory commands and patches run in.
    fn set_workdir(&mut self, dir: String);

    /// Tears the environment down.
    ///
    /// Calling this more than once is a no-op.
    fn release(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), EnvironmentError>> + Send;
}
