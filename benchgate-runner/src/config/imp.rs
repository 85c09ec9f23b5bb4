// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RetryPolicy, Timeouts, Workers, deserialize_retry_policy};
use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    parser::OutcomePolicy,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, num::NonZeroUsize, sync::OnceLock};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: OnceLock<usize> = OnceLock::new();

    *NUM_CPUS.get_or_init(|| match std::thread::available_parallelism() {
        Ok(count) => count.into(),
        Err(err) => {
            warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
            1
        }
    })
}

/// Overall configuration for benchgate.
///
/// Obtained through [`from_sources`](Self::from_sources), which layers a user config file on top
/// of [`DEFAULT_CONFIG`](Self::DEFAULT_CONFIG).
#[derive(Clone, Debug)]
pub struct BenchgateConfig {
    workers: Workers,
    dataset_root: Utf8PathBuf,
    image_prefix: String,
    docker_binary: String,
    acquire_retries: RetryPolicy,
    timeouts: Timeouts,
    trials: NonZeroUsize,
    outcome_policy: OutcomePolicy,
}

impl BenchgateConfig {
    /// The default location of the config relative to the current directory.
    pub const CONFIG_PATH: &'static str = ".config/benchgate.toml";

    /// Contains the default config as a TOML file.
    ///
    /// User configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the config from the given file, or if not specified from `.config/benchgate.toml`
    /// in `cwd`.
    ///
    /// If no file is specified and `.config/benchgate.toml` doesn't exist, uses the default
    /// config. Relative paths in the config are resolved against `cwd`.
    pub fn from_sources(
        cwd: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(cwd, config_file, |config_file, unknown| {
            let mut unknown_str = String::new();
            for ignored_key in unknown {
                unknown_str.push_str("\n  - ");
                unknown_str.push_str(ignored_key);
            }
            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}");
        })
    }

    /// Returns the default config, with relative paths resolved against `cwd`.
    pub fn default_config(cwd: &Utf8Path) -> Self {
        let (config, unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {unknown:?}"
        );
        config
            .into_config(cwd)
            .expect("default config is always valid")
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        cwd: &Utf8Path,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = cwd.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        config
            .into_config(cwd)
            .map_err(|kind| ConfigParseError::new(config_file, kind))
    }

    /// Returns the configured number of workers.
    pub fn workers(&self) -> Workers {
        self.workers
    }

    /// Returns the directory dataset identifiers are resolved against.
    pub fn dataset_root(&self) -> &Utf8Path {
        &self.dataset_root
    }

    /// Returns the prefix for derived image names.
    pub fn image_prefix(&self) -> &str {
        &self.image_prefix
    }

    /// Returns the Docker CLI binary name or path.
    pub fn docker_binary(&self) -> &str {
        &self.docker_binary
    }

    /// Returns the retry policy for environment acquisition.
    pub fn acquire_retries(&self) -> RetryPolicy {
        self.acquire_retries
    }

    /// Returns the per-operation timeouts.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Returns the number of post-patch stability trials run during validation.
    pub fn trials(&self) -> NonZeroUsize {
        self.trials
    }

    /// Returns how the default parser folds XFAIL and ERROR outcomes.
    pub fn outcome_policy(&self) -> OutcomePolicy {
        self.outcome_policy
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(BenchgateConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: BenchgateConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // Both serde_path_to_error and the config crate report the key. Drop the key from
                // the config error for consistency.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BenchgateConfigDeserialize {
    workers: Workers,
    dataset_root: Utf8PathBuf,
    image_prefix: String,
    docker_binary: String,
    #[serde(deserialize_with = "deserialize_retry_policy")]
    acquire_retries: RetryPolicy,
    timeouts: Timeouts,
    stability: StabilityDeserialize,
    parser: OutcomePolicy,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StabilityDeserialize {
    trials: usize,
}

impl BenchgateConfigDeserialize {
    fn into_config(self, cwd: &Utf8Path) -> Result<BenchgateConfig, ConfigParseErrorKind> {
        let trials =
            NonZeroUsize::new(self.stability.trials).ok_or(ConfigParseErrorKind::InvalidValue {
                key: "stability.trials",
                reason: "at least one trial is required".to_owned(),
            })?;

        if let Some(key) = self.timeouts.first_zero() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key,
                reason: "timeouts must be non-zero".to_owned(),
            });
        }

        for (key, status) in [
            ("parser.xfail", self.parser.xfail),
            ("parser.error", self.parser.error),
        ] {
            if !status.is_parser_output() {
                return Err(ConfigParseErrorKind::InvalidValue {
                    key,
                    reason: format!("`{status}` is not a parser outcome (use pass, fail or skip)"),
                });
            }
        }

        let dataset_root = if self.dataset_root.is_absolute() {
            self.dataset_root
        } else {
            cwd.join(self.dataset_root)
        };

        Ok(BenchgateConfig {
            workers: self.workers,
            dataset_root,
            image_prefix: self.image_prefix,
            docker_binary: self.docker_binary,
            acquire_retries: self.acquire_retries,
            timeouts: self.timeouts,
            trials,
            outcome_policy: self.parser,
        })
    }
}
