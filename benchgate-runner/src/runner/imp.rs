// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::RunContext;
use crate::{
    config::Workers,
    dataset::DatasetEntry,
    environment::EnvironmentProvider,
    errors::{
        ConfigurationError, DisplayErrorChain, InstanceError, RunnerBuildError, SummaryWriteError,
    },
    pipeline,
    reporter::events::{RunEvent, RunEventKind, RunMode, RunStats, Verdict},
    store::{
        ArtifactStore, GOLD_EVALUATED_FILE_NAME, RESULTS_FILE_NAME, VALIDATED_INSTANCES_FILE_NAME,
        VALIDATION_RESULTS_FILE_NAME,
    },
};
use benchgate_metadata::{
    EvaluationSummary, InstanceRecord, Report, ValidationResult, ValidationSummary,
};
use camino::Utf8PathBuf;
use futures::prelude::*;
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{runtime::Runtime, sync::mpsc::unbounded_channel, task::JoinError};
use tracing::{debug, warn};

/// A candidate patch to evaluate against an instance.
#[derive(Debug)]
pub struct EvaluationTask {
    instance_id: String,
    raw: Map<String, Value>,
    instance: Result<InstanceRecord, ConfigurationError>,
    candidate_patch: String,
}

impl EvaluationTask {
    /// Creates a task from a dataset entry and its candidate patch.
    pub fn new(entry: DatasetEntry, candidate_patch: impl Into<String>) -> Self {
        Self {
            instance_id: entry.instance_id,
            raw: entry.raw,
            instance: entry.record,
            candidate_patch: candidate_patch.into(),
        }
    }

    /// The instance this task is for.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// An instance whose known test sets are to be derived.
#[derive(Debug)]
pub struct ValidationTask {
    instance_id: String,
    raw: Map<String, Value>,
    instance: Result<InstanceRecord, ConfigurationError>,
}

impl ValidationTask {
    /// Creates a task from a dataset entry.
    pub fn new(entry: DatasetEntry) -> Self {
        Self {
            instance_id: entry.instance_id,
            raw: entry.raw,
            instance: entry.record,
        }
    }

    /// The instance this task is for.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Instance runner options.
#[derive(Debug, Default)]
pub struct InstanceRunnerBuilder {
    workers: Option<Workers>,
    overwrite: bool,
}

impl InstanceRunnerBuilder {
    /// Sets the number of instances to process simultaneously.
    pub fn set_workers(&mut self, workers: Workers) -> &mut Self {
        self.workers = Some(workers);
        self
    }

    /// If set, artifacts from previous runs are ignored and overwritten instead of reused.
    pub fn set_overwrite(&mut self, overwrite: bool) -> &mut Self {
        self.overwrite = overwrite;
        self
    }

    /// Creates a new instance runner writing to `store`, creating its output directory.
    pub fn build(self, store: &ArtifactStore) -> Result<InstanceRunner, RunnerBuildError> {
        let workers = self.workers.unwrap_or(Workers::NumCpus).compute().max(1);

        fs::create_dir_all(store.root()).map_err(|err| RunnerBuildError::OutputDirCreate {
            dir: store.root().to_owned(),
            err,
        })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("benchgate-worker")
            .build()
            .map_err(RunnerBuildError::TokioRuntimeCreate)?;

        Ok(InstanceRunner {
            runtime,
            workers,
            overwrite: self.overwrite,
        })
    }
}

/// Processes instances concurrently, each in its own environment.
///
/// Created using [`InstanceRunnerBuilder::build`].
#[derive(Debug)]
pub struct InstanceRunner {
    runtime: Runtime,
    workers: usize,
    overwrite: bool,
}

impl InstanceRunner {
    /// The maximum number of instances processed at a time.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Evaluates candidate patches.
    ///
    /// The callback is called on the current thread with an event for every instance. A failure
    /// of one instance, panics included, never affects the others: it is recorded in the result.
    pub fn evaluate<P, F>(
        &self,
        ctx: Arc<RunContext<P>>,
        tasks: Vec<EvaluationTask>,
        callback: F,
    ) -> EvaluationRun
    where
        P: EnvironmentProvider,
        F: FnMut(RunEvent<'_>),
    {
        let submitted_ids: Vec<_> = tasks.iter().map(|task| task.instance_id.clone()).collect();
        let mut collector = Collector::new(
            RunMode::Evaluate,
            ctx.store(),
            callback,
            tasks.len(),
            self.workers,
        );

        let mut records = Vec::with_capacity(tasks.len());
        let mut jobs = Vec::new();
        for task in tasks {
            let EvaluationTask {
                instance_id,
                raw,
                instance,
                candidate_patch,
            } = task;

            let instance = match instance {
                Ok(instance) => instance,
                Err(err) => {
                    collector.finished(instance_id, Err(err.into()), Duration::ZERO, 0);
                    continue;
                }
            };
            records.push((instance_id.clone(), raw, candidate_patch.clone()));

            if candidate_patch.trim().is_empty() {
                collector.empty_patch(instance_id);
                continue;
            }
            if !self.overwrite {
                if let Some(report) = ctx.store().cached_report(&instance_id) {
                    collector.cached(instance_id, report);
                    continue;
                }
            }

            let ctx = ctx.clone();
            let job = async move { pipeline::evaluate(&ctx, &instance, &candidate_patch).await };
            jobs.push((instance_id, job));
        }

        self.schedule(jobs, &mut collector);
        let outcome = collector.finish();

        let success_ids = ids_where(&outcome.outcomes, |report| report.resolved);
        let failure_ids = ids_where(&outcome.outcomes, |report| !report.resolved);
        let error_ids: Vec<_> = outcome.errors.keys().cloned().collect();
        let summary = EvaluationSummary {
            submitted: submitted_ids.len(),
            submitted_ids,
            empty_patch: outcome.empty_patch.len(),
            empty_patch_ids: outcome.empty_patch,
            success: success_ids.len(),
            success_ids,
            failure: failure_ids.len(),
            failure_ids,
            error: error_ids.len(),
            error_ids,
        };

        EvaluationRun {
            stats: outcome.stats,
            summary,
            reports: outcome.outcomes,
            errors: outcome.errors,
            records,
        }
    }

    /// Validates instances, deriving their known test sets.
    ///
    /// Like [`evaluate`](Self::evaluate), failures are isolated per instance.
    pub fn validate<P, F>(
        &self,
        ctx: Arc<RunContext<P>>,
        tasks: Vec<ValidationTask>,
        callback: F,
    ) -> ValidationRun
    where
        P: EnvironmentProvider,
        F: FnMut(RunEvent<'_>),
    {
        let submitted = tasks.len();
        let mut collector = Collector::new(
            RunMode::Validate,
            ctx.store(),
            callback,
            submitted,
            self.workers,
        );

        let mut records = Vec::with_capacity(tasks.len());
        let mut jobs = Vec::new();
        for task in tasks {
            let ValidationTask {
                instance_id,
                raw,
                instance,
            } = task;

            let instance = match instance {
                Ok(instance) => instance,
                Err(err) => {
                    collector.finished(instance_id, Err(err.into()), Duration::ZERO, 0);
                    continue;
                }
            };
            records.push((instance_id.clone(), raw));

            if !self.overwrite {
                if let Some(result) = ctx.store().cached_validation(&instance_id) {
                    collector.cached(instance_id, result);
                    continue;
                }
            }

            let ctx = ctx.clone();
            let job = async move { pipeline::validate(&ctx, &instance).await };
            jobs.push((instance_id, job));
        }

        self.schedule(jobs, &mut collector);
        let outcome = collector.finish();

        let valid_ids = ids_where(&outcome.outcomes, ValidationResult::is_valid);
        let invalid_ids = ids_where(&outcome.outcomes, |result| !result.is_valid());
        let error_ids: Vec<_> = outcome.errors.keys().cloned().collect();
        let summary = ValidationSummary {
            submitted,
            valid: valid_ids.len(),
            valid_ids,
            invalid: invalid_ids.len(),
            invalid_ids,
            error: error_ids.len(),
            error_ids,
        };

        ValidationRun {
            stats: outcome.stats,
            summary,
            results: outcome.outcomes,
            errors: outcome.errors,
            records,
        }
    }

    /// Runs jobs with at most `workers` in flight, reporting to the collector as they start and
    /// finish.
    fn schedule<T, Fut, F>(&self, jobs: Vec<(String, Fut)>, collector: &mut Collector<'_, T, F>)
    where
        T: InstanceOutcome,
        Fut: Future<Output = Result<T, InstanceError>> + Send + 'static,
        F: FnMut(RunEvent<'_>),
    {
        if jobs.is_empty() {
            return;
        }
        debug!(jobs = jobs.len(), workers = self.workers, "scheduling instances");

        self.runtime.block_on(async move {
            let (started_tx, mut started_rx) = unbounded_channel::<String>();

            let mut finished = stream::iter(jobs)
                .map(|(instance_id, job)| {
                    let started_tx = started_tx.clone();
                    let task_id = instance_id.clone();
                    let handle = tokio::spawn(async move {
                        // The receiver outlives every task.
                        let _ = started_tx.send(task_id);
                        job.await
                    });
                    async move { (instance_id, handle.await) }
                })
                .buffer_unordered(self.workers);

            let mut start_times = HashMap::new();
            loop {
                tokio::select! {
                    // Starts are sent before the corresponding result can be ready, so handling
                    // them first keeps events for each instance in order.
                    biased;

                    Some(instance_id) = started_rx.recv() => {
                        start_times.insert(instance_id.clone(), Instant::now());
                        collector.started(&instance_id, start_times.len());
                    }
                    next = finished.next() => {
                        let Some((instance_id, res)) = next else {
                            break;
                        };
                        let time_taken = start_times
                            .remove(&instance_id)
                            .map_or(Duration::ZERO, |start| start.elapsed());
                        let res = res.unwrap_or_else(|err| Err(join_error_to_instance_error(err)));
                        collector.finished(instance_id, res, time_taken, start_times.len());
                    }
                }
            }
        });
    }
}

fn join_error_to_instance_error(err: JoinError) -> InstanceError {
    let message = if err.is_panic() {
        let payload = err.into_panic();
        if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "(non-string panic payload)".to_owned()
        }
    } else {
        "task was cancelled".to_owned()
    };
    InstanceError::Panicked { message }
}

fn ids_where<T>(outcomes: &BTreeMap<String, T>, mut pred: impl FnMut(&T) -> bool) -> Vec<String> {
    outcomes
        .iter()
        .filter(|(_, outcome)| pred(outcome))
        .map(|(instance_id, _)| instance_id.clone())
        .collect()
}

/// A successful per-instance result.
trait InstanceOutcome: Send + 'static {
    fn verdict(&self) -> Verdict<'static>;
}

impl InstanceOutcome for Report {
    fn verdict(&self) -> Verdict<'static> {
        if self.resolved {
            Verdict::Resolved
        } else {
            Verdict::Unresolved
        }
    }
}

impl InstanceOutcome for ValidationResult {
    fn verdict(&self) -> Verdict<'static> {
        if self.is_valid() {
            Verdict::Valid {
                fail_to_pass: self.fail_to_pass.len(),
            }
        } else {
            Verdict::Invalid
        }
    }
}

/// Turns per-instance results into events, stats and error files.
struct Collector<'a, T, F> {
    mode: RunMode,
    start: Instant,
    store: &'a ArtifactStore,
    callback: F,
    stats: RunStats,
    outcomes: BTreeMap<String, T>,
    errors: BTreeMap<String, InstanceError>,
    empty_patch: Vec<String>,
}

struct CollectedOutcomes<T> {
    stats: RunStats,
    outcomes: BTreeMap<String, T>,
    errors: BTreeMap<String, InstanceError>,
    empty_patch: Vec<String>,
}

impl<'a, T, F> Collector<'a, T, F>
where
    T: InstanceOutcome,
    F: FnMut(RunEvent<'_>),
{
    fn new(
        mode: RunMode,
        store: &'a ArtifactStore,
        callback: F,
        instance_count: usize,
        workers: usize,
    ) -> Self {
        let mut collector = Self {
            mode,
            start: Instant::now(),
            store,
            callback,
            stats: RunStats::new(instance_count),
            outcomes: BTreeMap::new(),
            errors: BTreeMap::new(),
            empty_patch: Vec::new(),
        };
        collector.emit(RunEventKind::RunStarted {
            mode,
            instance_count,
            workers,
        });
        collector
    }

    fn emit(&mut self, kind: RunEventKind<'_>) {
        (self.callback)(RunEvent {
            elapsed: self.start.elapsed(),
            kind,
        });
    }

    fn started(&mut self, instance_id: &str, running: usize) {
        self.emit(RunEventKind::InstanceStarted {
            instance_id,
            running,
        });
    }

    fn cached(&mut self, instance_id: String, outcome: T) {
        let verdict = outcome.verdict();
        debug!(%instance_id, "reusing result from a previous run");
        self.stats.on_verdict(&verdict, true);
        self.emit(RunEventKind::InstanceCached {
            instance_id: &instance_id,
            verdict,
        });
        self.outcomes.insert(instance_id, outcome);
    }

    fn empty_patch(&mut self, instance_id: String) {
        self.stats.on_empty_patch();
        self.emit(RunEventKind::InstanceEmptyPatch {
            instance_id: &instance_id,
        });
        self.empty_patch.push(instance_id);
    }

    fn finished(
        &mut self,
        instance_id: String,
        res: Result<T, InstanceError>,
        time_taken: Duration,
        running: usize,
    ) {
        match res {
            Ok(outcome) => {
                self.store.clear_error(&instance_id);
                let verdict = outcome.verdict();
                self.stats.on_verdict(&verdict, false);
                self.emit(RunEventKind::InstanceFinished {
                    instance_id: &instance_id,
                    verdict,
                    time_taken,
                    running,
                });
                self.outcomes.insert(instance_id, outcome);
            }
            Err(err) => {
                warn!(
                    %instance_id,
                    kind = err.kind_str(),
                    "{}",
                    DisplayErrorChain::new(&err)
                );
                if let Err(write_err) = self.store.write_error(&instance_id, &err) {
                    warn!(%instance_id, "{}", DisplayErrorChain::new(&write_err));
                }

                let verdict = Verdict::Errored(&err);
                self.stats.on_verdict(&verdict, false);
                self.emit(RunEventKind::InstanceFinished {
                    instance_id: &instance_id,
                    verdict,
                    time_taken,
                    running,
                });
                self.errors.insert(instance_id, err);
            }
        }
    }

    fn finish(mut self) -> CollectedOutcomes<T> {
        let stats = self.stats;
        let mode = self.mode;
        self.emit(RunEventKind::RunFinished { mode, stats });

        self.empty_patch.sort_unstable();
        CollectedOutcomes {
            stats,
            outcomes: self.outcomes,
            errors: self.errors,
            empty_patch: self.empty_patch,
        }
    }
}

/// The outcome of [`InstanceRunner::evaluate`].
#[derive(Debug)]
pub struct EvaluationRun {
    stats: RunStats,
    summary: EvaluationSummary,
    reports: BTreeMap<String, Report>,
    errors: BTreeMap<String, InstanceError>,
    // Well-formed records in input order, with their candidate patches.
    records: Vec<(String, Map<String, Value>, String)>,
}

impl EvaluationRun {
    /// Counts accumulated over the run.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The aggregate summary, as written to `results.json`.
    pub fn summary(&self) -> &EvaluationSummary {
        &self.summary
    }

    /// Reports for every instance that ran to completion, including ones read back from a
    /// previous run.
    pub fn reports(&self) -> &BTreeMap<String, Report> {
        &self.reports
    }

    /// Errors for every instance that couldn't be evaluated.
    pub fn errors(&self) -> &BTreeMap<String, InstanceError> {
        &self.errors
    }

    /// Writes `results.json`.
    pub fn write_results(&self, store: &ArtifactStore) -> Result<Utf8PathBuf, SummaryWriteError> {
        store.write_summary(RESULTS_FILE_NAME, &self.summary)
    }

    /// Writes `gold_patch_evaluated_instances.jsonl`: the records of resolved instances, each
    /// with the patch it was evaluated with as `pred_patch`.
    ///
    /// Used when the candidate patches are the instances' own solutions, to keep only the
    /// instances whose solution checks out.
    pub fn write_gold_instances(
        &self,
        store: &ArtifactStore,
    ) -> Result<Utf8PathBuf, SummaryWriteError> {
        let resolved = self
            .records
            .iter()
            .filter(|(instance_id, _, _)| {
                self.reports
                    .get(instance_id)
                    .is_some_and(|report| report.resolved)
            })
            .map(|(_, raw, candidate_patch)| {
                let mut record = raw.clone();
                record.insert(
                    "pred_patch".to_owned(),
                    Value::String(candidate_patch.clone()),
                );
                record
            });
        store.write_jsonl(GOLD_EVALUATED_FILE_NAME, resolved)
    }
}

/// The outcome of [`InstanceRunner::validate`].
#[derive(Debug)]
pub struct ValidationRun {
    stats: RunStats,
    summary: ValidationSummary,
    results: BTreeMap<String, ValidationResult>,
    errors: BTreeMap<String, InstanceError>,
    // Well-formed records in input order.
    records: Vec<(String, Map<String, Value>)>,
}

impl ValidationRun {
    /// Counts accumulated over the run.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The aggregate summary, as written to `validation_results.json`.
    pub fn summary(&self) -> &ValidationSummary {
        &self.summary
    }

    /// Results for every instance that ran to completion, including ones read back from a
    /// previous run.
    pub fn results(&self) -> &BTreeMap<String, ValidationResult> {
        &self.results
    }

    /// Errors for every instance that couldn't be validated.
    pub fn errors(&self) -> &BTreeMap<String, InstanceError> {
        &self.errors
    }

    /// Writes `validation_results.json`.
    pub fn write_results(&self, store: &ArtifactStore) -> Result<Utf8PathBuf, SummaryWriteError> {
        store.write_summary(VALIDATION_RESULTS_FILE_NAME, &self.summary)
    }

    /// Writes `validated_instances.jsonl`: every valid instance's record, with the fields of its
    /// validation result merged in.
    pub fn write_validated_instances(
        &self,
        store: &ArtifactStore,
    ) -> Result<Utf8PathBuf, SummaryWriteError> {
        let path = store.root().join(VALIDATED_INSTANCES_FILE_NAME);
        let mut validated = Vec::new();
        for (instance_id, raw) in &self.records {
            let Some(result) = self.results.get(instance_id) else {
                continue;
            };
            if !result.is_valid() {
                continue;
            }

            let fields = serde_json::to_value(result).map_err(|err| {
                SummaryWriteError::Serialize {
                    path: path.clone(),
                    err,
                }
            })?;
            let mut record = raw.clone();
            if let Value::Object(fields) = fields {
                record.extend(fields);
            }
            validated.push(record);
        }
        store.write_jsonl(VALIDATED_INSTANCES_FILE_NAME, validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;

    #[tokio::test]
    async fn panics_become_instance_errors() {
        let err = tokio::spawn(async { panic!("static message") })
            .await
            .unwrap_err();
        assert_eq!(
            join_error_to_instance_error(err).to_string(),
            "instance task panicked: static message"
        );

        let code = 7;
        let err = tokio::spawn(async move { panic!("exit code {code}") })
            .await
            .unwrap_err();
        assert_eq!(
            join_error_to_instance_error(err).to_string(),
            "instance task panicked: exit code 7"
        );

        let err = tokio::spawn(async { std::panic::panic_any(42_u32) })
            .await
            .unwrap_err();
        assert_eq!(
            join_error_to_instance_error(err).to_string(),
            "instance task panicked: (non-string panic payload)"
        );
    }

    #[test]
    fn builder_creates_output_dir() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("out/nested"));

        let mut builder = InstanceRunnerBuilder::default();
        builder.set_workers(Workers::Count(3)).set_overwrite(true);
        let runner = builder.build(&store).unwrap();
        assert_eq!(runner.workers(), 3);
        assert!(store.root().is_dir());
    }
}
