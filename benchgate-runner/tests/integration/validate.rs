// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use benchgate_metadata::{TestStatus, ValidationSummary};
use benchgate_runner::{
    config::Workers,
    errors::{ConfigurationError, InstanceError},
    runner::{InstanceRunnerBuilder, ValidationRun, ValidationTask},
    store::{
        ArtifactStore, POST_PATCH_LOG_FILE_NAME, PRE_PATCH_LOG_FILE_NAME, STATUS_FILE_NAME,
        VALIDATED_INSTANCES_FILE_NAME, VALIDATION_RESULTS_FILE_NAME,
    },
};
use camino::Utf8Path;
use camino_tempfile::tempdir;
use color_eyre::eyre::{Result, ensure};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;

fn run_validation(
    provider: &ScriptedProvider,
    out: &Utf8Path,
    tasks: Vec<ValidationTask>,
) -> Result<ValidationRun> {
    let mut builder = InstanceRunnerBuilder::default();
    builder.set_workers(Workers::Count(4));
    let runner = builder.build(&ArtifactStore::new(out))?;
    Ok(runner.validate(context(provider.clone(), out), tasks, |_| {}))
}

fn scripts() -> [(&'static str, InstanceScript); 2] {
    let before = log(&[("PASSED", "a"), ("PASSED", "b"), ("FAILED", "c")]);
    [
        (
            "org__valid-1",
            InstanceScript {
                before: vec![before.clone()],
                after: vec![
                    log(&[("PASSED", "a"), ("PASSED", "b"), ("PASSED", "c"), ("PASSED", "d")]),
                    // `b` is flaky: one failing trial is enough to exclude it.
                    log(&[("PASSED", "a"), ("FAILED", "b"), ("PASSED", "c"), ("PASSED", "d")]),
                    log(&[("PASSED", "a"), ("PASSED", "b"), ("PASSED", "c")]),
                ],
                fix_patch: fix_for("org__valid-1"),
                ..InstanceScript::default()
            },
        ),
        (
            "org__invalid-1",
            InstanceScript {
                before: vec![before.clone()],
                after: vec![before],
                fix_patch: fix_for("org__invalid-1"),
                ..InstanceScript::default()
            },
        ),
    ]
}

fn tasks() -> Vec<ValidationTask> {
    vec![
        ValidationTask::new(entry(
            "org__valid-1",
            json!({"repo": "org/valid", "FAIL_TO_PASS": ["stale"]}),
        )),
        ValidationTask::new(entry("org__invalid-1", json!({}))),
    ]
}

#[test]
fn validate_derives_known_sets() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let provider = ScriptedProvider::new(scripts());

    let run = run_validation(&provider, out, tasks())?;

    assert_eq!(
        run.summary(),
        &ValidationSummary {
            submitted: 2,
            valid: 1,
            valid_ids: vec!["org__valid-1".to_owned()],
            invalid: 1,
            invalid_ids: vec!["org__invalid-1".to_owned()],
            error: 0,
            error_ids: vec![],
        }
    );

    let result = &run.results()["org__valid-1"];
    assert_eq!(result.pass_to_pass, ["a"]);
    // `d` didn't exist before the solution and passed whenever it ran, but it's missing from one
    // trial, so it counts as skipped.
    assert_eq!(result.fail_to_pass, ["c"]);
    assert_eq!(
        result.execution.post_patch_status,
        btreemap! {
            "a".to_owned() => TestStatus::Pass,
            "b".to_owned() => TestStatus::Fail,
            "c".to_owned() => TestStatus::Pass,
            "d".to_owned() => TestStatus::Skip,
        }
    );

    // Pre-patch and post-patch runs use separate environments.
    assert_eq!(provider.acquisitions("org__valid-1"), 2);
    assert_eq!(provider.released(), 4);

    let instance_dir = out.join("org__valid-1");
    let pre_log = fs::read_to_string(instance_dir.join(PRE_PATCH_LOG_FILE_NAME))?;
    assert_eq!(pre_log, log(&[("PASSED", "a"), ("PASSED", "b"), ("FAILED", "c")]));
    let post_log = fs::read_to_string(instance_dir.join(POST_PATCH_LOG_FILE_NAME))?;
    for trial in 1..=3 {
        ensure!(
            post_log.contains(&format!("trial {trial} of 3")),
            "post-patch log is missing trial {trial}:\n{post_log}"
        );
    }
    let status: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(instance_dir.join(STATUS_FILE_NAME))?)?;
    assert_eq!(status["FAIL_TO_PASS"], json!(["c"]));
    assert_eq!(status["pre_patch_status"]["c"], "fail");

    let store = ArtifactStore::new(out);
    run.write_results(&store)?;
    run.write_validated_instances(&store)?;

    let written: ValidationSummary =
        serde_json::from_str(&fs::read_to_string(out.join(VALIDATION_RESULTS_FILE_NAME))?)?;
    assert_eq!(&written, run.summary());

    let validated = fs::read_to_string(out.join(VALIDATED_INSTANCES_FILE_NAME))?;
    let records: Vec<serde_json::Value> = validated
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["instance_id"], "org__valid-1");
    assert_eq!(record["repo"], "org/valid");
    // Derived sets replace whatever the record carried.
    assert_eq!(record["FAIL_TO_PASS"], json!(["c"]));
    assert_eq!(record["PASS_TO_PASS"], json!(["a"]));
    assert_eq!(record["post_patch_status"]["d"], "skip");

    Ok(())
}

#[test]
fn validate_resumes_from_status() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();

    let first = run_validation(&ScriptedProvider::new(scripts()), out, tasks())?;
    let provider = ScriptedProvider::new(scripts());
    let second = run_validation(&provider, out, tasks())?;

    assert_eq!(provider.total_acquisitions(), 0);
    assert_eq!(second.results(), first.results());
    assert_eq!(second.stats().cached, 2);

    Ok(())
}

#[test]
fn missing_solution_patch_is_a_configuration_error() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let provider = ScriptedProvider::new(scripts());

    let run = run_validation(
        &provider,
        out,
        vec![ValidationTask::new(entry("org__nopatch-1", json!({"patch": ""})))],
    )?;

    assert_eq!(run.summary().error_ids, ["org__nopatch-1"]);
    assert!(matches!(
        &run.errors()["org__nopatch-1"],
        InstanceError::Configuration(ConfigurationError::MissingField { field: "patch", .. })
    ));
    assert_eq!(provider.total_acquisitions(), 0);

    Ok(())
}
