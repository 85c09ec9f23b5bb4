// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driving a single instance through an environment.
//!
//! Each function here owns one instance from parser lookup to environment release. The environment
//! is released on every path once acquired, and raw logs are written out as soon as they're
//! captured so that they survive later failures.

use crate::{
    environment::{CommandOutput, Environment, EnvironmentProvider},
    errors::{
        ConfigurationError, DisplayErrorChain, EnvironmentError, InfrastructureError,
        InstanceError, PatchApplicationError, PatchKind, TimeoutError,
    },
    judge::{KnownSets, judge},
    parser::ResolvedParser,
    platform::Platform,
    runner::RunContext,
    stability,
    store::{POST_PATCH_LOG_FILE_NAME, PRE_PATCH_LOG_FILE_NAME, REPORT_FILE_NAME, STATUS_FILE_NAME},
};
use benchgate_metadata::{InstanceRecord, Report, StatusMap, ValidationResult};
use std::{fmt, future::Future, time::Duration};
use swrite::{SWrite, swrite};
use tracing::{debug, info, warn};

/// Extra time given to an environment to report its own timeout before the pipeline gives up on
/// it.
const TIMEOUT_GRACE: Duration = Duration::from_secs(30);

/// A step of the pipeline that can time out or fail in the environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    /// Creating the environment.
    Acquire,
    /// Applying the test patch.
    TestPatch,
    /// Applying the candidate patch.
    CandidatePatch,
    /// Applying the solution patch.
    SolutionPatch,
    /// Looking for the repository root after a patch failed to apply.
    RepoRootProbe,
    /// Writing the test script for instances without print commands.
    TestScript,
    /// Running the rebuild commands.
    Rebuild,
    /// Running the test commands.
    Test,
    /// Running the print commands.
    Print,
    /// Tearing down the environment.
    Release,
}

impl PipelineStage {
    fn for_patch(kind: PatchKind) -> Self {
        match kind {
            PatchKind::Test => Self::TestPatch,
            PatchKind::Candidate => Self::CandidatePatch,
            PatchKind::Solution => Self::SolutionPatch,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Acquire => "environment acquisition",
            Self::TestPatch => "test patch application",
            Self::CandidatePatch => "candidate patch application",
            Self::SolutionPatch => "solution patch application",
            Self::RepoRootProbe => "repository root probe",
            Self::TestScript => "test script setup",
            Self::Rebuild => "rebuild",
            Self::Test => "test run",
            Self::Print => "log capture",
            Self::Release => "environment release",
        };
        f.write_str(s)
    }
}

/// Evaluates a candidate patch against an instance with a single test run.
///
/// Writes `post_patch_log.txt`, `status.json` and `report.json`.
pub(crate) async fn evaluate<P: EnvironmentProvider>(
    ctx: &RunContext<P>,
    instance: &InstanceRecord,
    candidate_patch: &str,
) -> Result<Report, InstanceError> {
    let parser = ctx.parsers().resolve(instance.parser_name())?;
    let known = KnownSets::from_instance(instance)?;
    require_field(instance, "test_patch", &instance.test_patch)?;

    let mut env = acquire(ctx, instance).await?;
    let res = evaluate_in(ctx, &mut env, instance, candidate_patch, parser).await;
    let post_patch_status = finish(ctx, &mut env, instance, res).await?;

    let report = judge(&instance.instance_id, &known, &post_patch_status);
    ctx.store()
        .write_json(&instance.instance_id, REPORT_FILE_NAME, &report)?;
    info!(
        instance_id = %instance.instance_id,
        resolved = report.resolved,
        "evaluated instance"
    );
    Ok(report)
}

async fn evaluate_in<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &mut E,
    instance: &InstanceRecord,
    candidate_patch: &str,
    parser: ResolvedParser<'_>,
) -> Result<StatusMap, InstanceError> {
    let instance_id = instance.instance_id.as_str();

    apply_patch(ctx, env, instance_id, &instance.test_patch, PatchKind::Test).await?;
    apply_patch(ctx, env, instance_id, candidate_patch, PatchKind::Candidate).await?;
    rebuild(ctx, env, instance).await?;

    let log = run_tests(ctx, env, instance).await?;
    ctx.store()
        .write_text(instance_id, POST_PATCH_LOG_FILE_NAME, &log)?;

    let status = parser.parse(&log);
    debug!(instance_id, parser = parser.name(), tests = status.len(), "parsed log");
    ctx.store().write_json(instance_id, STATUS_FILE_NAME, &status)?;
    Ok(status)
}

/// Validates an instance: runs its tests before and after the solution patch, then derives the
/// known test sets.
///
/// The two runs use separate environments. The post-patch run is repeated for each stability trial
/// without rebuilding in between. Writes `pre_patch_log.txt`, `post_patch_log.txt` and
/// `status.json`.
pub(crate) async fn validate<P: EnvironmentProvider>(
    ctx: &RunContext<P>,
    instance: &InstanceRecord,
) -> Result<ValidationResult, InstanceError> {
    let parser = ctx.parsers().resolve(instance.parser_name())?;
    require_field(instance, "test_patch", &instance.test_patch)?;
    require_field(instance, "patch", &instance.patch)?;
    let instance_id = instance.instance_id.as_str();

    let mut env = acquire(ctx, instance).await?;
    let res = pre_patch_in(ctx, &mut env, instance, parser).await;
    let pre_patch_status = finish(ctx, &mut env, instance, res).await?;
    drop(env);

    let mut env = acquire(ctx, instance).await?;
    let res = post_patch_in(ctx, &mut env, instance, parser).await;
    let post_patch_status = finish(ctx, &mut env, instance, res).await?;

    let result = stability::compare(instance_id, pre_patch_status, post_patch_status);
    ctx.store().write_json(instance_id, STATUS_FILE_NAME, &result)?;
    info!(
        instance_id,
        fail_to_pass = result.fail_to_pass.len(),
        pass_to_pass = result.pass_to_pass.len(),
        "validated instance"
    );
    Ok(result)
}

async fn pre_patch_in<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &mut E,
    instance: &InstanceRecord,
    parser: ResolvedParser<'_>,
) -> Result<StatusMap, InstanceError> {
    let instance_id = instance.instance_id.as_str();

    apply_patch(ctx, env, instance_id, &instance.test_patch, PatchKind::Test).await?;
    rebuild(ctx, env, instance).await?;

    let log = run_tests(ctx, env, instance).await?;
    ctx.store()
        .write_text(instance_id, PRE_PATCH_LOG_FILE_NAME, &log)?;
    Ok(parser.parse(&log))
}

async fn post_patch_in<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &mut E,
    instance: &InstanceRecord,
    parser: ResolvedParser<'_>,
) -> Result<StatusMap, InstanceError> {
    let instance_id = instance.instance_id.as_str();

    apply_patch(ctx, env, instance_id, &instance.test_patch, PatchKind::Test).await?;
    apply_patch(ctx, env, instance_id, &instance.patch, PatchKind::Solution).await?;
    rebuild(ctx, env, instance).await?;

    let trial_count = ctx.trials().get();
    let mut trials = Vec::with_capacity(trial_count);
    let mut combined_log = String::new();
    for trial in 1..=trial_count {
        let log = run_tests(ctx, env, instance).await?;
        swrite!(
            combined_log,
            "trial {trial} of {trial_count}\n\n========\n\n{log}\n\n"
        );
        // Rewritten after every trial so that a failing trial still leaves the earlier logs.
        ctx.store()
            .write_text(instance_id, POST_PATCH_LOG_FILE_NAME, &combined_log)?;

        let status = parser.parse(&log);
        debug!(instance_id, trial, tests = status.len(), "parsed trial log");
        trials.push(status);
    }

    Ok(stability::reconcile_trials(&trials))
}

fn require_field(
    instance: &InstanceRecord,
    field: &'static str,
    value: &str,
) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        Err(ConfigurationError::MissingField {
            instance_id: instance.instance_id.clone(),
            field,
        })
    } else {
        Ok(())
    }
}

/// Runs `fut` under `budget` plus a grace period.
///
/// The outer error is a timeout, whether reported by the environment or observed here. The inner
/// error is any other environment failure.
async fn guarded<T>(
    stage: PipelineStage,
    budget: Duration,
    fut: impl Future<Output = Result<T, EnvironmentError>>,
) -> Result<Result<T, EnvironmentError>, TimeoutError> {
    match tokio::time::timeout(budget + TIMEOUT_GRACE, fut).await {
        Ok(Err(EnvironmentError::Timeout { .. })) | Err(_) => Err(TimeoutError {
            stage,
            timeout: budget,
        }),
        Ok(res) => Ok(res),
    }
}

async fn acquire<P: EnvironmentProvider>(
    ctx: &RunContext<P>,
    instance: &InstanceRecord,
) -> Result<P::Environment, InstanceError> {
    let instance_id = instance.instance_id.as_str();
    let image = ctx.image_for(instance);
    let timeout = ctx.timeouts().acquire;
    let mut backoff = ctx.acquire_retries().backoff();

    let mut attempt = 0;
    loop {
        attempt += 1;
        let fut = ctx
            .provider()
            .acquire(&image, instance_id, ctx.platform(), timeout);
        let err: InstanceError = match guarded(PipelineStage::Acquire, timeout, fut).await {
            Ok(Ok(env)) => {
                debug!(instance_id, %image, attempt, "acquired environment");
                return Ok(env);
            }
            Ok(Err(err)) => InfrastructureError::Acquire {
                image: image.clone(),
                err,
            }
            .into(),
            Err(err) => err.into(),
        };

        match backoff.next() {
            Some(delay) => {
                warn!(
                    instance_id,
                    attempt,
                    "{}, retrying in {}",
                    DisplayErrorChain::new(&err),
                    humantime::format_duration(delay),
                );
                tokio::time::sleep(delay).await;
            }
            None => return Err(err),
        }
    }
}

/// Releases the environment, then combines the outcome of the work done in it with the outcome of
/// the release.
///
/// An error from the work takes precedence over a release failure.
async fn finish<E: Environment, T>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &mut E,
    instance: &InstanceRecord,
    res: Result<T, InstanceError>,
) -> Result<T, InstanceError> {
    let timeout = ctx.timeouts().release;
    let released: Result<(), InstanceError> =
        match guarded(PipelineStage::Release, timeout, env.release(timeout)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(InfrastructureError::Release { err }.into()),
            Err(err) => Err(err.into()),
        };

    match (res, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!(
                instance_id = %instance.instance_id,
                "{}",
                DisplayErrorChain::new(&release_err)
            );
            Err(err)
        }
    }
}

async fn apply_patch<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &mut E,
    instance_id: &str,
    diff: &str,
    kind: PatchKind,
) -> Result<(), InstanceError> {
    let stage = PipelineStage::for_patch(kind);
    let timeout = ctx.timeouts().patch;

    let first_err = match guarded(stage, timeout, env.apply_patch(diff, true, timeout)).await? {
        Ok(_) => {
            debug!(instance_id, "applied {kind}");
            return Ok(());
        }
        Err(err) => err,
    };

    // Some images check the repository out below the default working directory.
    let Some(root) = probe_repo_root(ctx, env, instance_id).await? else {
        return Err(PatchApplicationError::new(instance_id, kind, first_err).into());
    };

    debug!(instance_id, %root, "retrying {kind} from repository root");
    let default_workdir = env.workdir().to_owned();
    env.set_workdir(root);
    let retried = guarded(stage, timeout, env.apply_patch(diff, true, timeout)).await;
    env.set_workdir(default_workdir);

    match retried? {
        Ok(_) => {
            debug!(instance_id, "applied {kind} from repository root");
            Ok(())
        }
        Err(err) => Err(PatchApplicationError::new(instance_id, kind, err).into()),
    }
}

/// Returns the repository root if it differs from the current working directory.
async fn probe_repo_root<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &E,
    instance_id: &str,
) -> Result<Option<String>, InstanceError> {
    let platform = ctx.platform();
    let probe = format!(
        "{} ; {}",
        platform.repo_root_probe(),
        platform.print_workdir()
    );
    let timeout = ctx.timeouts().patch;

    let output = match guarded(PipelineStage::RepoRootProbe, timeout, env.run(&probe, timeout))
        .await?
    {
        Ok(output) => output,
        Err(err) => {
            warn!(
                instance_id,
                "repository root probe failed: {}",
                DisplayErrorChain::new(&err)
            );
            return Ok(None);
        }
    };

    let root = output
        .output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .filter(|root| *root != env.workdir())
        .map(ToOwned::to_owned);
    Ok(root)
}

async fn run_command<E: Environment>(
    env: &E,
    stage: PipelineStage,
    timeout: Duration,
    command: &str,
) -> Result<CommandOutput, InstanceError> {
    match guarded(stage, timeout, env.run(command, timeout)).await? {
        Ok(output) => Ok(output),
        Err(err) => Err(InfrastructureError::Command { stage, err }.into()),
    }
}

async fn rebuild<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &E,
    instance: &InstanceRecord,
) -> Result<(), InstanceError> {
    let command = instance.rebuild_command();
    if command.trim().is_empty() {
        return Ok(());
    }

    let output = run_command(env, PipelineStage::Rebuild, ctx.timeouts().rebuild, &command).await?;
    if !output.success() {
        // Builds often fail partially; the test run decides.
        warn!(
            instance_id = %instance.instance_id,
            exit_code = ?output.exit_code,
            "rebuild exited unsuccessfully, continuing"
        );
    }
    Ok(())
}

/// Runs the test commands, then returns the log printed by the print commands.
async fn run_tests<E: Environment>(
    ctx: &RunContext<impl EnvironmentProvider>,
    env: &E,
    instance: &InstanceRecord,
) -> Result<String, InstanceError> {
    let platform = ctx.platform();
    let timeouts = ctx.timeouts();
    let mut test_command = instance.test_command();
    let mut print_command = instance.print_command();

    if print_command.trim().is_empty() {
        // Without print commands, the test output is redirected to a file and printed from there.
        let script = platform.legacy_script();
        let write_command = platform.write_file_command(script, &test_command);
        let output =
            run_command(env, PipelineStage::TestScript, timeouts.print, &write_command).await?;
        if !output.success() {
            return Err(InfrastructureError::Command {
                stage: PipelineStage::TestScript,
                err: EnvironmentError::CommandFailed {
                    command: write_command,
                    exit_code: output.exit_code,
                    stderr: output.output.trim().to_owned(),
                },
            }
            .into());
        }

        test_command = platform.run_script_command(script, Platform::LEGACY_LOG_FILE);
        print_command = platform.cat_command(Platform::LEGACY_LOG_FILE);
    }

    if test_command.trim().is_empty() {
        debug!(instance_id = %instance.instance_id, "no test commands to run");
    } else {
        let output = run_command(env, PipelineStage::Test, timeouts.test, &test_command).await?;
        debug!(
            instance_id = %instance.instance_id,
            exit_code = ?output.exit_code,
            "test commands finished"
        );
    }

    let output = run_command(env, PipelineStage::Print, timeouts.print, &print_command).await?;
    if !output.success() {
        warn!(
            instance_id = %instance.instance_id,
            exit_code = ?output.exit_code,
            "print commands exited unsuccessfully"
        );
    }
    Ok(output.output)
}
