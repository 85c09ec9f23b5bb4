// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use benchgate_runner::{
    config::{BenchgateConfig, RetryPolicy},
    dataset::DatasetEntry,
    environment::{CommandOutput, Environment, EnvironmentProvider},
    errors::EnvironmentError,
    platform::Platform,
    reporter::{RunEvent, RunEventKind},
    runner::RunContext,
    store::ArtifactStore,
};
use camino::Utf8Path;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub(crate) const DEFAULT_WORKDIR: &str = "/testbed";
pub(crate) const PRINT_COMMAND: &str = "print-log";

/// How a scripted environment behaves for one instance.
#[derive(Clone, Debug, Default)]
pub(crate) struct InstanceScript {
    /// Logs printed before the fixing patch is applied, one per print, repeating the last.
    pub(crate) before: Vec<String>,

    /// Logs printed once the fixing patch is applied, one per print, repeating the last.
    pub(crate) after: Vec<String>,

    /// The patch that switches from `before` to `after` logs.
    pub(crate) fix_patch: String,

    /// If set, patches only apply in this directory, which the repository root probe reports.
    pub(crate) repo_root: Option<String>,

    /// Patches that never apply.
    pub(crate) rejected_patches: Vec<String>,

    /// Panic while acquiring the environment.
    pub(crate) panic_on_acquire: bool,

    /// Fail this many acquisitions before succeeding.
    pub(crate) failing_acquires: usize,

    /// Commands for which the environment reports a timeout.
    pub(crate) timed_out_commands: Vec<String>,

    /// Fail every release.
    pub(crate) failing_release: bool,
}

/// An environment provider driven entirely by [`InstanceScript`]s.
#[derive(Clone, Debug, Default)]
pub(crate) struct ScriptedProvider {
    scripts: Arc<HashMap<String, InstanceScript>>,
    acquisitions: Arc<Mutex<HashMap<String, usize>>>,
    commands: Arc<Mutex<HashMap<String, Vec<String>>>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub(crate) fn new(scripts: impl IntoIterator<Item = (&'static str, InstanceScript)>) -> Self {
        Self {
            scripts: Arc::new(
                scripts
                    .into_iter()
                    .map(|(instance_id, script)| (instance_id.to_owned(), script))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// The number of acquire calls for an instance, failed ones included.
    pub(crate) fn acquisitions(&self, instance_id: &str) -> usize {
        self.acquisitions
            .lock()
            .unwrap()
            .get(instance_id)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn total_acquisitions(&self) -> usize {
        self.acquisitions.lock().unwrap().values().sum()
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Every command run for an instance, across all of its environments.
    pub(crate) fn commands(&self, instance_id: &str) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .get(instance_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl EnvironmentProvider for ScriptedProvider {
    type Environment = ScriptedEnvironment;

    async fn acquire(
        &self,
        _image: &str,
        instance_id: &str,
        platform: Platform,
        _timeout: Duration,
    ) -> Result<ScriptedEnvironment, EnvironmentError> {
        let attempt = {
            let mut acquisitions = self.acquisitions.lock().unwrap();
            let count = acquisitions.entry(instance_id.to_owned()).or_default();
            *count += 1;
            *count
        };
        let script = self
            .scripts
            .get(instance_id)
            .cloned()
            .unwrap_or_default();

        if script.panic_on_acquire {
            panic!("scripted panic for {instance_id}");
        }
        if attempt <= script.failing_acquires {
            return Err(EnvironmentError::CommandFailed {
                command: "scripted acquire".to_owned(),
                exit_code: Some(125),
                stderr: "no such image".to_owned(),
            });
        }

        Ok(ScriptedEnvironment {
            instance_id: instance_id.to_owned(),
            script,
            platform,
            workdir: DEFAULT_WORKDIR.to_owned(),
            state: Mutex::new(EnvState::default()),
            commands: self.commands.clone(),
            released: self.released.clone(),
            is_released: false,
        })
    }
}

#[derive(Debug, Default)]
struct EnvState {
    fixed: bool,
    prints: usize,
    /// Files written into the working directory.
    files: HashMap<String, String>,
}

impl EnvState {
    /// The next log for the current patch state.
    fn next_log(&mut self, script: &InstanceScript) -> String {
        let logs = if self.fixed {
            &script.after
        } else {
            &script.before
        };
        let log = logs
            .get(self.prints)
            .or(logs.last())
            .cloned()
            .unwrap_or_default();
        self.prints += 1;
        log
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedEnvironment {
    instance_id: String,
    script: InstanceScript,
    platform: Platform,
    workdir: String,
    state: Mutex<EnvState>,
    commands: Arc<Mutex<HashMap<String, Vec<String>>>>,
    released: Arc<AtomicUsize>,
    is_released: bool,
}

fn ok(output: impl Into<String>) -> Result<CommandOutput, EnvironmentError> {
    Ok(CommandOutput {
        output: output.into(),
        exit_code: Some(0),
    })
}

impl Environment for ScriptedEnvironment {
    async fn apply_patch(
        &self,
        diff: &str,
        _verbose: bool,
        _timeout: Duration,
    ) -> Result<CommandOutput, EnvironmentError> {
        let wrong_dir = self
            .script
            .repo_root
            .as_ref()
            .is_some_and(|root| *root != self.workdir);
        if wrong_dir || self.script.rejected_patches.iter().any(|p| p == diff) {
            return Err(EnvironmentError::PatchRejected {
                exit_code: Some(1),
                output: "error: patch failed".to_owned(),
            });
        }

        if diff == self.script.fix_patch {
            self.state.lock().unwrap().fixed = true;
        }
        Ok(CommandOutput {
            output: "Applied patch cleanly.".to_owned(),
            exit_code: Some(0),
        })
    }

    async fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, EnvironmentError> {
        self.commands
            .lock()
            .unwrap()
            .entry(self.instance_id.clone())
            .or_default()
            .push(command.to_owned());

        if self.script.timed_out_commands.iter().any(|c| c == command) {
            return Err(EnvironmentError::Timeout { timeout });
        }

        if command.starts_with(self.platform.repo_root_probe()) {
            let output = self.script.repo_root.as_deref().unwrap_or(&self.workdir);
            return ok(format!("{output}\n"));
        }

        let mut state = self.state.lock().unwrap();
        if command == PRINT_COMMAND {
            return ok(state.next_log(&self.script));
        }

        // The legacy flow: write the test script, run it into the log file, print the log file.
        let script = self.platform.legacy_script();
        let log_file = Platform::LEGACY_LOG_FILE;
        if let Some(contents) = command
            .strip_prefix(&format!("cat > {script} <<'BENCHGATE_EOF'\n"))
            .and_then(|rest| rest.strip_suffix("\nBENCHGATE_EOF"))
        {
            state.files.insert(script.to_owned(), contents.to_owned());
            return ok("");
        }
        if command == self.platform.run_script_command(script, log_file) {
            if !state.files.contains_key(script) {
                return Ok(CommandOutput {
                    output: format!("bash: {script}: No such file or directory\n"),
                    exit_code: Some(127),
                });
            }
            let log = state.next_log(&self.script);
            state.files.insert(log_file.to_owned(), log);
            return ok("");
        }
        if command == self.platform.cat_command(log_file) {
            return match state.files.get(log_file) {
                Some(log) => ok(log.clone()),
                None => Ok(CommandOutput {
                    output: format!("cat: {log_file}: No such file or directory\n"),
                    exit_code: Some(1),
                }),
            };
        }

        ok("")
    }

    fn workdir(&self) -> &str {
        &self.workdir
    }

    fn set_workdir(&mut self, dir: String) {
        self.workdir = dir;
    }

    async fn release(&mut self, _timeout: Duration) -> Result<(), EnvironmentError> {
        if self.script.failing_release {
            return Err(EnvironmentError::CommandFailed {
                command: "scripted release".to_owned(),
                exit_code: Some(1),
                stderr: "container is busy".to_owned(),
            });
        }
        if !self.is_released {
            self.is_released = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A default-parser log line for each `(outcome, test)` pair.
pub(crate) fn log(lines: &[(&str, &str)]) -> String {
    lines
        .iter()
        .map(|(outcome, test)| format!("{outcome} {test}\n"))
        .collect()
}

/// A dataset entry with scripted commands.
pub(crate) fn entry(instance_id: &str, extra: Value) -> DatasetEntry {
    let mut record = json!({
        "instance_id": instance_id,
        "test_patch": format!("test patch for {instance_id}"),
        "patch": format!("fix for {instance_id}"),
        "test_cmds": ["run-tests"],
        "print_cmds": [PRINT_COMMAND],
        "log_parser": "pytest",
    });
    if let (Value::Object(record), Value::Object(extra)) = (&mut record, extra) {
        record.extend(extra);
    }
    let Value::Object(raw) = record else {
        unreachable!("record is an object");
    };
    let record = serde_json::from_value(Value::Object(raw.clone())).map_err(|err| {
        benchgate_runner::errors::ConfigurationError::MalformedRecord {
            instance_id: instance_id.to_owned(),
            err,
        }
    });
    DatasetEntry {
        instance_id: instance_id.to_owned(),
        raw,
        record,
    }
}

pub(crate) fn fix_for(instance_id: &str) -> String {
    format!("fix for {instance_id}")
}

pub(crate) fn context(
    provider: ScriptedProvider,
    out: &Utf8Path,
) -> Arc<RunContext<ScriptedProvider>> {
    let config = BenchgateConfig::default_config(out);
    Arc::new(
        RunContext::new(&config, provider, ArtifactStore::new(out), Platform::Linux)
            .with_acquire_retries(RetryPolicy::new_without_delay(1)),
    )
}

/// Records events as `kind:instance` strings.
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    pub(crate) events: Vec<String>,
}

impl EventLog {
    pub(crate) fn record(&mut self, event: RunEvent<'_>) {
        let s = match event.kind {
            RunEventKind::RunStarted { instance_count, .. } => {
                format!("run-started:{instance_count}")
            }
            RunEventKind::InstanceStarted { instance_id, .. } => format!("started:{instance_id}"),
            RunEventKind::InstanceCached { instance_id, .. } => format!("cached:{instance_id}"),
            RunEventKind::InstanceEmptyPatch { instance_id } => format!("empty:{instance_id}"),
            RunEventKind::InstanceFinished { instance_id, .. } => {
                format!("finished:{instance_id}")
            }
            RunEventKind::RunFinished { .. } => "run-finished".to_owned(),
        };
        self.events.push(s);
    }

    pub(crate) fn position(&self, event: &str) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }
}
