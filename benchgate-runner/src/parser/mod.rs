// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning raw test logs into per-test statuses.
//!
//! A log parser is a pure function from log text to a [`StatusMap`]. Parsers are looked up by name
//! in a [`ParserRegistry`]; every instance record names the parser its test output needs.

mod default;
mod gotest;
mod libtest;

pub use default::DefaultParser;
pub use gotest::GoTestParser;
pub use libtest::LibtestParser;

use crate::errors::ConfigurationError;
use benchgate_metadata::{StatusMap, TestStatus};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Converts the text output of a test run into per-test statuses.
///
/// Implementations must only produce [`TestStatus::Pass`], [`TestStatus::Fail`] and
/// [`TestStatus::Skip`], and must ignore lines they don't understand.
pub trait LogParser: fmt::Debug + Send + Sync {
    /// Parses a log. ANSI escape sequences have already been removed.
    fn parse(&self, log: &str) -> StatusMap;
}

/// How the default parser folds outcomes that have no direct equivalent in [`TestStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutcomePolicy {
    /// The status an expected failure (`XFAIL`) maps to.
    pub xfail: TestStatus,

    /// The status an error during collection or setup (`ERROR`) maps to.
    pub error: TestStatus,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self {
            xfail: TestStatus::Fail,
            error: TestStatus::Fail,
        }
    }
}

/// A set of log parsers, keyed by name.
///
/// Names are matched case-insensitively, ignoring surrounding whitespace. An empty name refers to
/// [`DEFAULT_PARSER`](Self::DEFAULT_PARSER).
#[derive(Clone, Debug)]
pub struct ParserRegistry {
    parsers: BTreeMap<String, Arc<dyn LogParser>>,
}

impl ParserRegistry {
    /// The parser used when an instance doesn't name one.
    pub const DEFAULT_PARSER: &'static str = "default";

    /// Creates a registry with the built-in parsers.
    ///
    /// The default parser is also registered as `pytest`, `cargo` parses libtest output, and
    /// `gotest` parses verbose `go test` output.
    pub fn new(policy: OutcomePolicy) -> Self {
        let default: Arc<dyn LogParser> = Arc::new(DefaultParser::new(policy));

        let mut registry = Self::empty();
        registry.register_arc(Self::DEFAULT_PARSER, default.clone());
        registry.register_arc("pytest", default);
        registry.register("cargo", LibtestParser);
        registry.register("gotest", GoTestParser);
        registry
    }

    /// Creates a registry with no parsers at all.
    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Registers a parser under a name, replacing any parser previously registered under it.
    pub fn register(&mut self, name: &str, parser: impl LogParser + 'static) {
        self.register_arc(name, Arc::new(parser));
    }

    fn register_arc(&mut self, name: &str, parser: Arc<dyn LogParser>) {
        self.parsers.insert(normalize_name(name), parser);
    }

    /// Returns the names of all registered parsers, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.parsers.keys().map(|name| name.as_str())
    }

    /// Looks up a parser by name.
    ///
    /// This is done before any environment is acquired, so that a misconfigured instance fails
    /// early.
    pub fn resolve(&self, name: &str) -> Result<ResolvedParser<'_>, ConfigurationError> {
        let mut key = normalize_name(name);
        if key.is_empty() {
            key = Self::DEFAULT_PARSER.to_owned();
        }

        match self.parsers.get_key_value(&key) {
            Some((name, parser)) => Ok(ResolvedParser {
                name,
                parser: parser.as_ref(),
            }),
            None => Err(ConfigurationError::UnknownParser {
                name: name.to_owned(),
                known: self.names().map(ToOwned::to_owned).collect(),
            }),
        }
    }

    /// Parses a log with the parser registered under `name`.
    pub fn parse(&self, name: &str, log: &str) -> Result<StatusMap, ConfigurationError> {
        Ok(self.resolve(name)?.parse(log))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new(OutcomePolicy::default())
    }
}

/// A parser found in a [`ParserRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct ResolvedParser<'a> {
    name: &'a str,
    parser: &'a dyn LogParser,
}

impl<'a> ResolvedParser<'a> {
    /// The normalized name the parser was found under.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Parses a log, removing ANSI escape sequences first.
    pub fn parse(&self, log: &str) -> StatusMap {
        let stripped = strip_ansi_escapes::strip_str(log);
        self.parser.parse(&stripped)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
