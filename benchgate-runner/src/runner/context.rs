// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{BenchgateConfig, RetryPolicy, Timeouts},
    environment::EnvironmentProvider,
    parser::ParserRegistry,
    platform::Platform,
    store::ArtifactStore,
};
use benchgate_metadata::InstanceRecord;
use std::num::NonZeroUsize;

/// Everything an instance task needs, shared read-only between tasks.
///
/// Created once per run and handed to [`InstanceRunner`](super::InstanceRunner) behind an `Arc`.
#[derive(Debug)]
pub struct RunContext<P> {
    provider: P,
    parsers: ParserRegistry,
    store: ArtifactStore,
    platform: Platform,
    timeouts: Timeouts,
    acquire_retries: RetryPolicy,
    trials: NonZeroUsize,
    image_prefix: String,
}

impl<P: EnvironmentProvider> RunContext<P> {
    /// Creates a context from the config, with the built-in parsers.
    pub fn new(
        config: &BenchgateConfig,
        provider: P,
        store: ArtifactStore,
        platform: Platform,
    ) -> Self {
        Self {
            provider,
            parsers: ParserRegistry::new(config.outcome_policy()),
            store,
            platform,
            timeouts: *config.timeouts(),
            acquire_retries: config.acquire_retries(),
            trials: config.trials(),
            image_prefix: config.image_prefix().to_owned(),
        }
    }

    /// Replaces the parser registry.
    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    /// Replaces the retry policy for environment acquisition.
    pub fn with_acquire_retries(mut self, acquire_retries: RetryPolicy) -> Self {
        self.acquire_retries = acquire_retries;
        self
    }

    /// Replaces the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replaces the number of post-patch trials run during validation.
    pub fn with_trials(mut self, trials: NonZeroUsize) -> Self {
        self.trials = trials;
        self
    }

    /// The environment provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The parser registry.
    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    /// Where artifacts are written.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// The platform environments run on.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Per-operation timeouts.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Retry policy for environment acquisition.
    pub fn acquire_retries(&self) -> RetryPolicy {
        self.acquire_retries
    }

    /// Number of post-patch trials run during validation.
    pub fn trials(&self) -> NonZeroUsize {
        self.trials
    }

    /// The image an instance runs in: its own `docker_image`, or a name derived from its ID.
    pub fn image_for(&self, instance: &InstanceRecord) -> String {
        match &instance.docker_image {
            Some(image) if !image.trim().is_empty() => image.trim().to_owned(),
            _ => self
                .platform
                .default_image(&self.image_prefix, &instance.instance_id),
        }
    }
}
