// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
};
use benchgate_metadata::BenchgateExitCode;
use benchgate_runner::{
    config::{BenchgateConfig, Workers},
    dataset::{Dataset, PatchSource},
    environment::DockerProvider,
    platform::Platform,
    reporter::{DisplayReporter, RunEvent},
    runner::{EvaluationTask, InstanceRunner, InstanceRunnerBuilder, RunContext, ValidationTask},
    store::ArtifactStore,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use std::{
    collections::HashSet,
    io::{self, Write},
    sync::Arc,
};
use tracing::{info, warn};

/// Evaluate candidate patches against benchmark instances, or validate the instances themselves.
///
/// Every instance runs in its own isolated environment. Per-instance results are written under
/// the output directory as they complete, and a rerun skips instances that already have results.
#[derive(Debug, Parser)]
#[command(
    version,
    bin_name = "benchgate",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct BenchgateApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl BenchgateApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let cwd = current_dir()?;
        let config = self.config_opts.make_config(&cwd)?;

        match self.command {
            Command::Evaluate(opts) => opts.exec(&config, output),
            Command::Validate(opts) => opts.exec(&config, output),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/benchgate.toml in the current directory]
    #[arg(long, global = true, value_name = "PATH", alias = "config_file")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, cwd: &Utf8Path) -> Result<BenchgateConfig> {
        Ok(BenchgateConfig::from_sources(
            cwd,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate candidate patches against a dataset
    ///
    /// Each instance's test patch and candidate patch are applied in a fresh environment, the
    /// test suite is run, and the instance is resolved if every known test set holds.
    Evaluate(EvaluateOpts),

    /// Validate dataset instances by running their reference solution
    ///
    /// Derives the FAIL_TO_PASS and PASS_TO_PASS sets of each instance from a pre-patch run and
    /// several post-patch runs. Instances with at least one fail-to-pass test are valid.
    Validate(ValidateOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Platform of the instance environments
    #[arg(long, value_name = "PLATFORM", default_value_t)]
    platform: Platform,

    /// Number of instances to run concurrently [default: from config]
    #[arg(long, short = 'j', value_name = "N")]
    workers: Option<Workers>,

    /// Directory to write per-instance artifacts and aggregate results to
    #[arg(long, value_name = "DIR", alias = "output_dir")]
    output_dir: Utf8PathBuf,

    /// Rerun instances that already have results (0 or 1)
    #[arg(
        long,
        value_name = "0|1",
        default_value = "0",
        value_parser = BoolishValueParser::new(),
    )]
    overwrite: bool,
}

impl RunOpts {
    fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.output_dir.clone())
    }

    fn make_runner(
        &self,
        config: &BenchgateConfig,
        store: &ArtifactStore,
    ) -> Result<InstanceRunner> {
        let mut builder = InstanceRunnerBuilder::default();
        builder
            .set_workers(self.workers.unwrap_or_else(|| config.workers()))
            .set_overwrite(self.overwrite);
        Ok(builder.build(store)?)
    }

    fn make_context(
        &self,
        config: &BenchgateConfig,
        store: ArtifactStore,
    ) -> Arc<RunContext<DockerProvider>> {
        Arc::new(RunContext::new(
            config,
            DockerProvider::from_config(config),
            store,
            self.platform,
        ))
    }
}

#[derive(Debug, Args)]
struct EvaluateOpts {
    /// Dataset file (.jsonl or .json), or a dataset name under the configured dataset root
    #[arg(long, value_name = "DATASET")]
    dataset: String,

    /// Predictions file mapping instance IDs to `{"model_patch": ...}`, or `gold` to evaluate
    /// each instance's reference solution
    #[arg(long, value_name = "PATH|gold", alias = "patch_dir")]
    patch_dir: String,

    /// Dataset split to load, for dataset names [default: all splits]
    #[arg(long, value_name = "SPLIT")]
    split: Option<String>,

    /// Only evaluate these instances
    #[arg(long, value_name = "ID", num_args = 1.., alias = "instance_ids")]
    instance_ids: Vec<String>,

    #[clap(flatten)]
    run: RunOpts,
}

impl EvaluateOpts {
    fn exec(self, config: &BenchgateConfig, output: OutputContext) -> Result<i32> {
        let patch_source = PatchSource::from_arg(&self.patch_dir)?;
        let mut dataset =
            Dataset::load(&self.dataset, self.split.as_deref(), config.dataset_root())?;
        if !self.instance_ids.is_empty() {
            warn_unknown_ids(&dataset, &self.instance_ids);
            dataset.retain_ids(&self.instance_ids);
        }

        let dataset_len = dataset.len();
        let tasks: Vec<_> = dataset
            .into_entries()
            .into_iter()
            .filter_map(|entry| {
                let candidate_patch = patch_source.candidate_for(&entry)?;
                Some(EvaluationTask::new(entry, candidate_patch))
            })
            .collect();
        info!(
            "evaluating {} of {dataset_len} instances in `{}`",
            tasks.len(),
            self.dataset,
        );

        let store = self.run.store();
        let runner = self.run.make_runner(config, &store)?;
        let ctx = self.run.make_context(config, store.clone());

        let mut writer = EventWriter::new(&output);
        let run = runner.evaluate(ctx, tasks, |event| writer.write_event(event));

        let results_path = run.write_results(&store)?;
        info!("wrote results to `{results_path}`");
        if patch_source.is_gold() {
            let gold_path = run.write_gold_instances(&store)?;
            info!("wrote resolved instances to `{gold_path}`");
        }
        writer.finish()?;

        Ok(BenchgateExitCode::OK)
    }
}

#[derive(Debug, Args)]
struct ValidateOpts {
    /// JSONL file of instances to validate, or a directory of JSONL files
    #[arg(long, value_name = "PATH", alias = "input_dir")]
    input_dir: Utf8PathBuf,

    #[clap(flatten)]
    run: RunOpts,
}

impl ValidateOpts {
    fn exec(self, config: &BenchgateConfig, output: OutputContext) -> Result<i32> {
        let dataset = Dataset::load(self.input_dir.as_str(), None, config.dataset_root())?;
        let tasks: Vec<_> = dataset
            .into_entries()
            .into_iter()
            .map(ValidationTask::new)
            .collect();
        info!("validating {} instances from `{}`", tasks.len(), self.input_dir);

        let store = self.run.store();
        let runner = self.run.make_runner(config, &store)?;
        let ctx = self.run.make_context(config, store.clone());

        let mut writer = EventWriter::new(&output);
        let run = runner.validate(ctx, tasks, |event| writer.write_event(event));

        let results_path = run.write_results(&store)?;
        info!("wrote results to `{results_path}`");
        let validated_path = run.write_validated_instances(&store)?;
        info!("wrote valid instances to `{validated_path}`");
        writer.finish()?;

        Ok(BenchgateExitCode::OK)
    }
}

/// Writes reporter output to stderr, one event at a time.
///
/// Worker threads log to stderr too, so the stream is never held locked for the whole run. The
/// first write error is kept and reported once the run is over: results are written regardless.
struct EventWriter {
    reporter: DisplayReporter,
    buf: Vec<u8>,
    error: Option<io::Error>,
}

impl EventWriter {
    fn new(output: &OutputContext) -> Self {
        let should_colorize = output.color.should_colorize(supports_color::Stream::Stderr);
        Self {
            reporter: DisplayReporter::new(should_colorize, output.verbose),
            buf: Vec::new(),
            error: None,
        }
    }

    fn write_event(&mut self, event: RunEvent<'_>) {
        if self.error.is_some() {
            return;
        }
        self.buf.clear();
        let res = self
            .reporter
            .write_event(&event, &mut self.buf)
            .and_then(|()| {
                let mut stderr = io::stderr().lock();
                stderr.write_all(&self.buf)?;
                stderr.flush()
            });
        if let Err(err) = res {
            self.error = Some(err);
        }
    }

    fn finish(self) -> Result<()> {
        match self.error {
            Some(err) => Err(ExpectedError::write_event_error(err)),
            None => Ok(()),
        }
    }
}

fn warn_unknown_ids(dataset: &Dataset, instance_ids: &[String]) {
    let known: HashSet<_> = dataset
        .entries()
        .iter()
        .map(|entry| entry.instance_id.as_str())
        .collect();
    for instance_id in instance_ids {
        if !known.contains(instance_id.as_str()) {
            warn!("instance `{instance_id}` is not in the dataset, skipping");
        }
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().map_err(|err| ExpectedError::GetCurrentDirFailed { err })?;
    Utf8PathBuf::try_from(cwd).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
        path: err.into_path_buf(),
    })
}
