// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use benchgate_metadata::BenchgateExitCode;
use benchgate_runner::errors::*;
use owo_colors::OwoColorize;
use std::{error::Error, io};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with display_to_stderr,
// which colorizes them.

/// A failure of a benchgate invocation as a whole.
///
/// Per-instance failures are not represented here: they end up in the run summary.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    GetCurrentDirFailed {
        #[source]
        err: io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("dataset load error")]
    DatasetLoadError {
        #[from]
        err: DatasetLoadError,
    },
    #[error("predictions load error")]
    PredictionsLoadError {
        #[from]
        err: PredictionsLoadError,
    },
    #[error("runner build error")]
    RunnerBuildError {
        #[from]
        err: RunnerBuildError,
    },
    #[error("error writing event")]
    WriteEventError {
        #[source]
        err: io::Error,
    },
    #[error("error writing summary")]
    SummaryWriteError {
        #[from]
        err: SummaryWriteError,
    },
}

impl ExpectedError {
    pub(crate) fn write_event_error(err: io::Error) -> Self {
        Self::WriteEventError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::GetCurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. } => BenchgateExitCode::SETUP_ERROR,
            Self::DatasetLoadError { .. } | Self::PredictionsLoadError { .. } => {
                BenchgateExitCode::DATASET_LOAD_FAILED
            }
            Self::RunnerBuildError { err } => match err {
                RunnerBuildError::OutputDirCreate { .. } => BenchgateExitCode::WRITE_OUTPUT_ERROR,
                _ => BenchgateExitCode::RUNTIME_BUILD_FAILED,
            },
            Self::WriteEventError { .. } | Self::SummaryWriteError { .. } => {
                BenchgateExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::GetCurrentDirFailed { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::DatasetLoadError { err } => {
                error!("failed to load dataset");
                Some(err as &dyn Error)
            }
            Self::PredictionsLoadError { err } => {
                error!("failed to load predictions");
                Some(err as &dyn Error)
            }
            Self::RunnerBuildError { err } => {
                error!("failed to build instance runner");
                Some(err as &dyn Error)
            }
            Self::WriteEventError { err } => {
                error!("failed to write event to output");
                Some(err as &dyn Error)
            }
            Self::SummaryWriteError { err } => {
                error!("failed to write run results");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
