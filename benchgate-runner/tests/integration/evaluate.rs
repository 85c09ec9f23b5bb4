// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use benchgate_metadata::{EvaluationSummary, Report};
use benchgate_runner::{
    config::Workers,
    errors::{ConfigurationError, InfrastructureError, InstanceError, TimeoutError},
    pipeline::PipelineStage,
    platform::Platform,
    runner::{EvaluationRun, EvaluationTask, InstanceRunnerBuilder},
    store::{
        ArtifactStore, ERROR_FILE_NAME, GOLD_EVALUATED_FILE_NAME, POST_PATCH_LOG_FILE_NAME,
        REPORT_FILE_NAME, RESULTS_FILE_NAME, STATUS_FILE_NAME,
    },
};
use camino::Utf8Path;
use camino_tempfile::tempdir;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;

fn scripted(instance_id: &'static str) -> (&'static str, InstanceScript) {
    (
        instance_id,
        InstanceScript {
            before: vec![log(&[("PASSED", "a"), ("FAILED", "c")])],
            after: vec![log(&[("PASSED", "a"), ("PASSED", "c")])],
            fix_patch: fix_for(instance_id),
            ..InstanceScript::default()
        },
    )
}

fn known_sets() -> serde_json::Value {
    json!({"PASS_TO_PASS": ["a"], "FAIL_TO_PASS": ["c"]})
}

fn run_evaluation(
    provider: &ScriptedProvider,
    out: &Utf8Path,
    overwrite: bool,
    tasks: Vec<EvaluationTask>,
) -> Result<(EvaluationRun, EventLog)> {
    let mut builder = InstanceRunnerBuilder::default();
    builder.set_workers(Workers::Count(2)).set_overwrite(overwrite);
    let runner = builder.build(&ArtifactStore::new(out))?;

    let mut events = EventLog::default();
    let run = runner.evaluate(context(provider.clone(), out), tasks, |event| {
        events.record(event)
    });
    Ok((run, events))
}

fn standard_tasks() -> Vec<EvaluationTask> {
    vec![
        EvaluationTask::new(entry("org__repo-1", known_sets()), fix_for("org__repo-1")),
        EvaluationTask::new(entry("org__repo-2", known_sets()), "diff --git a/x b/x"),
        EvaluationTask::new(entry("org__repo-3", known_sets()), " \n\t"),
    ]
}

#[test]
fn evaluate_classifies_instances() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let provider = ScriptedProvider::new([
        scripted("org__repo-1"),
        scripted("org__repo-2"),
        scripted("org__repo-3"),
    ]);

    let (run, events) = run_evaluation(&provider, out, false, standard_tasks())?;

    assert_eq!(
        run.summary(),
        &EvaluationSummary {
            submitted: 3,
            submitted_ids: vec![
                "org__repo-1".to_owned(),
                "org__repo-2".to_owned(),
                "org__repo-3".to_owned(),
            ],
            empty_patch: 1,
            empty_patch_ids: vec!["org__repo-3".to_owned()],
            success: 1,
            success_ids: vec!["org__repo-1".to_owned()],
            failure: 1,
            failure_ids: vec!["org__repo-2".to_owned()],
            error: 0,
            error_ids: vec![],
        }
    );
    assert!(run.stats().is_success());

    // Empty patches never reach an environment; every acquired environment is released.
    assert_eq!(provider.acquisitions("org__repo-3"), 0);
    assert_eq!(provider.total_acquisitions(), 2);
    assert_eq!(provider.released(), 2);

    let report = &run.reports()["org__repo-2"];
    assert!(!report.resolved);
    assert_eq!(report.pass_to_pass.success, ["a"]);
    assert_eq!(report.fail_to_pass.failure, ["c"]);

    let instance_dir = out.join("org__repo-1");
    let status: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(instance_dir.join(STATUS_FILE_NAME))?)?;
    assert_eq!(status, json!({"a": "pass", "c": "pass"}));
    assert_eq!(
        fs::read_to_string(instance_dir.join(POST_PATCH_LOG_FILE_NAME))?,
        log(&[("PASSED", "a"), ("PASSED", "c")])
    );
    ensure!(
        !out.join("org__repo-3").exists(),
        "empty patch instances have no artifacts"
    );

    run.write_results(&ArtifactStore::new(out))?;
    let written: EvaluationSummary =
        serde_json::from_str(&fs::read_to_string(out.join(RESULTS_FILE_NAME))?)?;
    assert_eq!(&written, run.summary());

    for instance_id in ["org__repo-1", "org__repo-2"] {
        let started = events.position(&format!("started:{instance_id}"));
        let finished = events.position(&format!("finished:{instance_id}"));
        ensure!(
            started.is_some() && started < finished,
            "{instance_id} started before finishing: {:?}",
            events.events
        );
    }
    assert_eq!(events.events.first().map(String::as_str), Some("run-started:3"));
    assert_eq!(events.events.last().map(String::as_str), Some("run-finished"));
    ensure!(events.position("empty:org__repo-3").is_some());

    Ok(())
}

#[test]
fn resume_reuses_reports_without_acquiring() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let scripts = [scripted("org__repo-1"), scripted("org__repo-2")];

    let (first, _) = run_evaluation(
        &ScriptedProvider::new(scripts.clone()),
        out,
        false,
        standard_tasks(),
    )?;
    let report_path = out.join("org__repo-1").join(REPORT_FILE_NAME);
    let original = fs::read(&report_path)?;

    let provider = ScriptedProvider::new(scripts.clone());
    let (second, events) = run_evaluation(&provider, out, false, standard_tasks())?;
    assert_eq!(provider.total_acquisitions(), 0);
    assert_eq!(fs::read(&report_path)?, original);
    assert_eq!(second.summary(), first.summary());
    assert_eq!(second.stats().cached, 2);
    ensure!(events.position("cached:org__repo-1").is_some());
    ensure!(events.position("started:org__repo-1").is_none());

    // A report without a verdict is not reused.
    fs::write(
        out.join("org__repo-2").join(REPORT_FILE_NAME),
        r#"{"instance_id": "org__repo-2"}"#,
    )?;
    let provider = ScriptedProvider::new(scripts.clone());
    run_evaluation(&provider, out, false, standard_tasks())?;
    assert_eq!(provider.acquisitions("org__repo-1"), 0);
    assert_eq!(provider.acquisitions("org__repo-2"), 1);

    let provider = ScriptedProvider::new(scripts);
    run_evaluation(&provider, out, true, standard_tasks())?;
    assert_eq!(provider.total_acquisitions(), 2);

    Ok(())
}

#[test]
fn panicking_instance_is_isolated() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let (_, mut panicking) = scripted("org__boom-1");
    panicking.panic_on_acquire = true;
    let provider = ScriptedProvider::new([
        scripted("org__repo-1"),
        ("org__boom-1", panicking),
        scripted("org__repo-2"),
    ]);

    let tasks = vec![
        EvaluationTask::new(entry("org__repo-1", known_sets()), fix_for("org__repo-1")),
        EvaluationTask::new(entry("org__boom-1", known_sets()), fix_for("org__boom-1")),
        EvaluationTask::new(entry("org__repo-2", known_sets()), fix_for("org__repo-2")),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(run.summary().success_ids, ["org__repo-1", "org__repo-2"]);
    assert_eq!(run.summary().error_ids, ["org__boom-1"]);
    assert!(matches!(
        run.errors()["org__boom-1"],
        InstanceError::Panicked { ref message } if message == "scripted panic for org__boom-1"
    ));
    let error_text = fs::read_to_string(out.join("org__boom-1").join(ERROR_FILE_NAME))?;
    ensure!(
        error_text.contains("instance task panicked"),
        "unexpected error file: {error_text}"
    );

    Ok(())
}

#[test]
fn misconfigured_instances_fail_before_acquiring() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let provider = ScriptedProvider::new([scripted("org__parser-1"), scripted("org__bad-1")]);

    let tasks = vec![
        EvaluationTask::new(
            entry("org__parser-1", json!({"log_parser": "no-such-parser"})),
            fix_for("org__parser-1"),
        ),
        EvaluationTask::new(
            entry("org__bad-1", json!({"test_patch": 42})),
            fix_for("org__bad-1"),
        ),
        EvaluationTask::new(
            entry("org__dup-1", json!({"FAIL_TO_PASS": ["c", "c"]})),
            fix_for("org__dup-1"),
        ),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(provider.total_acquisitions(), 0);
    assert_eq!(
        run.summary().error_ids,
        ["org__bad-1", "org__dup-1", "org__parser-1"]
    );
    assert!(matches!(
        &run.errors()["org__parser-1"],
        InstanceError::Configuration(ConfigurationError::UnknownParser { name, .. })
            if name == "no-such-parser"
    ));
    assert!(matches!(
        &run.errors()["org__bad-1"],
        InstanceError::Configuration(ConfigurationError::MalformedRecord { .. })
    ));
    assert!(matches!(
        &run.errors()["org__dup-1"],
        InstanceError::Configuration(ConfigurationError::DuplicateKnownTest { .. })
    ));

    Ok(())
}

#[test]
fn patches_retry_from_repository_root() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let (_, mut nested) = scripted("org__nested-1");
    nested.repo_root = Some(format!("{DEFAULT_WORKDIR}/nested"));
    let (_, mut rejected) = scripted("org__rejected-1");
    rejected.rejected_patches = vec![fix_for("org__rejected-1")];
    let provider = ScriptedProvider::new([
        ("org__nested-1", nested),
        ("org__rejected-1", rejected),
    ]);

    let tasks = vec![
        EvaluationTask::new(entry("org__nested-1", known_sets()), fix_for("org__nested-1")),
        EvaluationTask::new(
            entry("org__rejected-1", known_sets()),
            fix_for("org__rejected-1"),
        ),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(run.summary().success_ids, ["org__nested-1"]);
    assert_eq!(run.summary().error_ids, ["org__rejected-1"]);
    assert!(matches!(
        &run.errors()["org__rejected-1"],
        InstanceError::PatchApplication(_)
    ));
    // The rejected instance's environment is still released.
    assert_eq!(provider.released(), 2);

    Ok(())
}

#[test]
fn acquisition_is_retried() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let (_, mut flaky) = scripted("org__flaky-1");
    flaky.failing_acquires = 1;
    let (_, mut broken) = scripted("org__broken-1");
    broken.failing_acquires = 10;
    let provider = ScriptedProvider::new([("org__flaky-1", flaky), ("org__broken-1", broken)]);

    let tasks = vec![
        EvaluationTask::new(entry("org__flaky-1", known_sets()), fix_for("org__flaky-1")),
        EvaluationTask::new(entry("org__broken-1", known_sets()), fix_for("org__broken-1")),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(run.summary().success_ids, ["org__flaky-1"]);
    assert_eq!(run.summary().error_ids, ["org__broken-1"]);
    // One retry each.
    assert_eq!(provider.acquisitions("org__flaky-1"), 2);
    assert_eq!(provider.acquisitions("org__broken-1"), 2);

    Ok(())
}

#[test]
fn gold_instances_list_resolved_records() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let provider = ScriptedProvider::new([scripted("org__repo-1"), scripted("org__repo-2")]);

    let tasks = vec![
        EvaluationTask::new(
            entry(
                "org__repo-1",
                json!({"PASS_TO_PASS": ["a"], "FAIL_TO_PASS": ["c"], "repo": "org/repo"}),
            ),
            fix_for("org__repo-1"),
        ),
        // The fix doesn't touch any known fail-to-pass test.
        EvaluationTask::new(
            entry("org__repo-2", json!({"FAIL_TO_PASS": ["z"]})),
            fix_for("org__repo-2"),
        ),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;
    run.write_gold_instances(&ArtifactStore::new(out))?;

    let contents = fs::read_to_string(out.join(GOLD_EVALUATED_FILE_NAME))?;
    let records: Vec<serde_json::Value> = contents
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["instance_id"], "org__repo-1");
    assert_eq!(records[0]["repo"], "org/repo");
    assert_eq!(records[0]["pred_patch"], fix_for("org__repo-1"));

    let report: Report = serde_json::from_str(&fs::read_to_string(
        out.join("org__repo-1").join(REPORT_FILE_NAME),
    )?)?;
    assert!(report.resolved);

    Ok(())
}

#[test]
fn timed_out_instance_is_isolated() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let (_, mut hanging) = scripted("org__slow-1");
    hanging.timed_out_commands = vec!["run-tests".to_owned()];
    let provider = ScriptedProvider::new([
        scripted("org__repo-1"),
        ("org__slow-1", hanging),
        scripted("org__repo-2"),
    ]);

    let tasks = vec![
        EvaluationTask::new(entry("org__repo-1", known_sets()), fix_for("org__repo-1")),
        EvaluationTask::new(entry("org__slow-1", known_sets()), fix_for("org__slow-1")),
        EvaluationTask::new(entry("org__repo-2", known_sets()), fix_for("org__repo-2")),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(run.summary().success_ids, ["org__repo-1", "org__repo-2"]);
    assert_eq!(run.summary().error_ids, ["org__slow-1"]);
    assert!(matches!(
        &run.errors()["org__slow-1"],
        InstanceError::Timeout(TimeoutError {
            stage: PipelineStage::Test,
            ..
        })
    ));
    // The log was never printed, and the environment is still released.
    assert!(!provider.commands("org__slow-1").iter().any(|c| c == PRINT_COMMAND));
    assert_eq!(provider.released(), 3);
    let error_text = fs::read_to_string(out.join("org__slow-1").join(ERROR_FILE_NAME))?;
    ensure!(
        error_text.contains("test run timed out"),
        "unexpected error file: {error_text}"
    );

    Ok(())
}

#[test]
fn test_script_is_used_without_print_commands() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let provider = ScriptedProvider::new([scripted("org__legacy-1")]);

    let mut extra = known_sets();
    extra["print_cmds"] = json!([]);
    let tasks = vec![EvaluationTask::new(
        entry("org__legacy-1", extra),
        fix_for("org__legacy-1"),
    )];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(run.summary().success_ids, ["org__legacy-1"]);
    let platform = Platform::Linux;
    let script = platform.legacy_script();
    assert_eq!(
        provider.commands("org__legacy-1"),
        [
            platform.write_file_command(script, "run-tests"),
            platform.run_script_command(script, Platform::LEGACY_LOG_FILE),
            platform.cat_command(Platform::LEGACY_LOG_FILE),
        ]
    );
    assert_eq!(
        fs::read_to_string(out.join("org__legacy-1").join(POST_PATCH_LOG_FILE_NAME))?,
        log(&[("PASSED", "a"), ("PASSED", "c")])
    );

    Ok(())
}

#[test]
fn release_failure_fails_the_instance() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path();
    let (_, mut stuck) = scripted("org__stuck-1");
    stuck.failing_release = true;
    let provider = ScriptedProvider::new([scripted("org__repo-1"), ("org__stuck-1", stuck)]);

    let tasks = vec![
        EvaluationTask::new(entry("org__repo-1", known_sets()), fix_for("org__repo-1")),
        EvaluationTask::new(entry("org__stuck-1", known_sets()), fix_for("org__stuck-1")),
    ];
    let (run, _) = run_evaluation(&provider, out, false, tasks)?;

    assert_eq!(run.summary().success_ids, ["org__repo-1"]);
    assert_eq!(run.summary().error_ids, ["org__stuck-1"]);
    assert!(matches!(
        &run.errors()["org__stuck-1"],
        InstanceError::Infrastructure(InfrastructureError::Release { .. })
    ));
    // The tests ran and their log was kept, but no verdict was recorded.
    let instance_dir = out.join("org__stuck-1");
    ensure!(instance_dir.join(POST_PATCH_LOG_FILE_NAME).exists());
    ensure!(!instance_dir.join(REPORT_FILE_NAME).exists());

    Ok(())
}
