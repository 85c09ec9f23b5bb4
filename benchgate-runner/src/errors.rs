// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by benchgate.
//!
//! Errors come in two tiers:
//!
//! * Per-instance errors ([`InstanceError`] and the four kinds it wraps). These are caught at the
//!   task boundary and recorded against a single instance; they never abort a run.
//! * Setup errors ([`ConfigParseError`], [`DatasetLoadError`], [`PredictionsLoadError`],
//!   [`RunnerBuildError`], [`SummaryWriteError`]). These abort the command.

use crate::pipeline::PipelineStage;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error, fmt, io, time::Duration};
use thiserror::Error;

/// An instance record or a run setting is unusable.
///
/// Fatal for the instance it concerns, surfaced immediately and never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The instance asked for a log parser that isn't registered.
    #[error("unknown log parser `{name}` (known parsers: {})", .known.join(", "))]
    UnknownParser {
        /// The requested parser name.
        name: String,

        /// The names of all registered parsers, sorted.
        known: Vec<String>,
    },

    /// The instance record couldn't be deserialized.
    #[error("malformed instance record `{instance_id}`")]
    MalformedRecord {
        /// The ID of the malformed record.
        instance_id: String,

        /// The deserialization error.
        #[source]
        err: serde_json::Error,
    },

    /// A known test set contains the same test more than once.
    #[error("test `{test}` appears more than once in {set} of instance `{instance_id}`")]
    DuplicateKnownTest {
        /// The instance ID.
        instance_id: String,

        /// The name of the known set.
        set: &'static str,

        /// The duplicated test identifier.
        test: String,
    },

    /// A field required by the requested mode is empty.
    #[error("instance `{instance_id}` has no {field}")]
    MissingField {
        /// The instance ID.
        instance_id: String,

        /// The name of the missing field.
        field: &'static str,
    },
}

/// Which patch failed to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchKind {
    /// The patch adding or modifying tests.
    Test,

    /// The candidate patch under evaluation.
    Candidate,

    /// The reference solution patch, used during validation.
    Solution,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test patch"),
            Self::Candidate => write!(f, "candidate patch"),
            Self::Solution => write!(f, "solution patch"),
        }
    }
}

/// A diff failed to apply, including after the repository root fallback.
#[derive(Debug, Error)]
#[error("{kind} failed to apply to instance `{instance_id}`")]
pub struct PatchApplicationError {
    instance_id: String,
    kind: PatchKind,
    #[source]
    err: EnvironmentError,
}

impl PatchApplicationError {
    pub(crate) fn new(
        instance_id: impl Into<String>,
        kind: PatchKind,
        err: EnvironmentError,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            kind,
            err,
        }
    }

    /// Returns which patch failed to apply.
    pub fn kind(&self) -> PatchKind {
        self.kind
    }
}

/// A pipeline stage exceeded its hard time budget.
#[derive(Clone, Debug, Error)]
#[error("{stage} timed out after {}", humantime::format_duration(*.timeout))]
pub struct TimeoutError {
    /// The stage that timed out.
    pub stage: PipelineStage,

    /// The budget that was exceeded.
    pub timeout: Duration,
}

/// The environment or the local filesystem failed underneath the pipeline.
///
/// Distinct from a legitimate test failure: instances hitting this land in the error bucket.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    /// The environment could not be acquired.
    #[error("failed to acquire environment from image `{image}`")]
    Acquire {
        /// The image reference.
        image: String,

        /// The underlying error.
        #[source]
        err: EnvironmentError,
    },

    /// The environment could not be torn down.
    #[error("failed to release environment")]
    Release {
        /// The underlying error.
        #[source]
        err: EnvironmentError,
    },

    /// A command could not be run in the environment.
    #[error("{stage} could not be run")]
    Command {
        /// The stage the command belonged to.
        stage: PipelineStage,

        /// The underlying error.
        #[source]
        err: EnvironmentError,
    },

    /// An artifact could not be written.
    #[error("failed to write `{path}`")]
    ArtifactWrite {
        /// The artifact path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// An artifact could not be serialized.
    #[error("failed to serialize `{path}`")]
    ArtifactSerialize {
        /// The artifact path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// An instance ID doesn't name a directory inside the output directory.
    #[error("instance ID `{instance_id}` can't be used as an artifact directory")]
    InvalidArtifactDir {
        /// The instance ID.
        instance_id: String,
    },
}

/// An error reported by an environment implementation.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// A patch was rejected by every apply strategy.
    #[error("patch was rejected (exit code {})", display_exit_code(*.exit_code))]
    PatchRejected {
        /// The exit code of the last apply attempt.
        exit_code: Option<i32>,

        /// The combined output of the last apply attempt.
        output: String,
    },

    /// An operation inside the environment exceeded its timeout.
    #[error("operation timed out after {}", humantime::format_duration(*.timeout))]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A process could not be spawned or waited on.
    #[error("failed to execute `{command}`")]
    Exec {
        /// The command line that was run.
        command: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A control command (create, remove, ...) exited unsuccessfully.
    #[error("`{command}` exited with code {}: {stderr}", display_exit_code(*.exit_code))]
    CommandFailed {
        /// The command line that was run.
        command: String,

        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,

        /// Standard error output, trimmed.
        stderr: String,
    },
}

fn display_exit_code(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "<signal>".to_owned(),
    }
}

/// Any error that fails a single instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// See [`ConfigurationError`].
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// See [`PatchApplicationError`].
    #[error(transparent)]
    PatchApplication(#[from] PatchApplicationError),

    /// See [`TimeoutError`].
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// See [`InfrastructureError`].
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    /// The task processing this instance panicked.
    #[error("instance task panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl InstanceError {
    /// A short name for the kind of error, used in status lines.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::PatchApplication(_) => "patch",
            Self::Timeout(_) => "timeout",
            Self::Infrastructure(_) => "infrastructure",
            Self::Panicked { .. } => "panic",
        }
    }
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E>(E);

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new chain display for the error.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, "\n  caused by: {err}")?;
            source = err.source();
        }

        Ok(())
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse benchgate config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing the config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A value deserialized correctly but is out of range.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The config key.
        key: &'static str,

        /// Why the value is invalid.
        reason: String,
    },
}

/// Error returned while parsing a [`Workers`](crate::config::Workers) value from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for workers: {input}")]
pub struct WorkersParseError {
    input: String,
}

impl WorkersParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing a [`Platform`](crate::platform::Platform) from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized platform `{input}` (known values: linux, windows)")]
pub struct PlatformParseError {
    input: String,
}

impl PlatformParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while loading a dataset.
#[derive(Debug, Error)]
pub enum DatasetLoadError {
    /// The dataset file could not be read.
    #[error("failed to read dataset `{path}`")]
    Read {
        /// The dataset path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A line (or the whole file, for JSON arrays) isn't valid JSON.
    #[error("invalid JSON in dataset `{path}` at line {line}")]
    Parse {
        /// The dataset path.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line: usize,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// A record has no string `instance_id`, so it can't be tracked at all.
    #[error("record at line {line} of dataset `{path}` has no `instance_id`")]
    MissingInstanceId {
        /// The dataset path.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line: usize,
    },

    /// Two records share an instance ID.
    #[error("instance `{instance_id}` appears more than once in the dataset")]
    DuplicateInstanceId {
        /// The duplicated instance ID.
        instance_id: String,
    },

    /// A dataset identifier did not resolve to any files.
    #[error("dataset `{identifier}` not found (looked in `{searched}`)")]
    NotFound {
        /// The identifier.
        identifier: String,

        /// The location that was searched.
        searched: Utf8PathBuf,
    },

    /// The dataset directory couldn't be listed.
    #[error("failed to list dataset directory `{dir}`")]
    ReadDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}

/// An error that occurred while loading a predictions file.
#[derive(Debug, Error)]
pub enum PredictionsLoadError {
    /// The predictions file could not be read.
    #[error("failed to read predictions `{path}`")]
    Read {
        /// The predictions path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The predictions file isn't a JSON map of instance ID to prediction.
    #[error("failed to parse predictions `{path}`")]
    Parse {
        /// The predictions path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },
}

/// An error that occurred while building an [`InstanceRunner`](crate::runner::InstanceRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// The output directory could not be created.
    #[error("failed to create output directory `{dir}`")]
    OutputDirCreate {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}

/// An error that occurred while writing an aggregate output file.
#[derive(Debug, Error)]
pub enum SummaryWriteError {
    /// The file could not be serialized.
    #[error("failed to serialize `{path}`")]
    Serialize {
        /// The output path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// The file could not be written.
    #[error("failed to write `{path}`")]
    Write {
        /// The output path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}
