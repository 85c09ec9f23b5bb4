// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{CommandOutput, Environment, EnvironmentProvider};
use crate::{config::BenchgateConfig, errors::EnvironmentError, platform::Platform};
use std::{
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Runs each instance in its own Docker container, driven through the Docker CLI.
///
/// Containers are started detached with a command that keeps them alive. Every subsequent command
/// is a `docker exec` into the container, and the container is force-removed on release.
#[derive(Clone, Debug)]
pub struct DockerProvider {
    binary: String,
}

impl DockerProvider {
    /// Creates a provider that invokes the given Docker CLI binary.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Creates a provider using the `docker-binary` setting.
    pub fn from_config(config: &BenchgateConfig) -> Self {
        Self::new(config.docker_binary())
    }
}

impl DockerProvider {
    async fn remove_stale(&self, name: &str, timeout: Duration) {
        let args = ["rm".to_owned(), "-f".to_owned(), name.to_owned()];
        match docker(&self.binary, &args, None, timeout).await {
            Ok(output) if output.status_success => {
                debug!(container = name, "removed container after failed start");
            }
            // Usually the container was never created.
            Ok(output) => {
                debug!(
                    container = name,
                    stderr = output.stderr.trim(),
                    "no container to remove after failed start"
                );
            }
            Err(err) => {
                warn!(container = name, "failed to remove container after failed start: {err}");
            }
        }
    }
}

impl Default for DockerProvider {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl EnvironmentProvider for DockerProvider {
    type Environment = DockerEnvironment;

    async fn acquire(
        &self,
        image: &str,
        instance_id: &str,
        platform: Platform,
        timeout: Duration,
    ) -> Result<DockerEnvironment, EnvironmentError> {
        let name = container_name(instance_id);
        let mut args = vec![
            "run".to_owned(),
            "-d".to_owned(),
            "--name".to_owned(),
            name.clone(),
            "-w".to_owned(),
            platform.default_workdir().to_owned(),
            image.to_owned(),
        ];
        args.extend(keepalive_command(platform).iter().map(|&s| s.to_owned()));

        // A failed or timed-out start can still leave a created container behind.
        let output = match docker(&self.binary, &args, None, timeout).await {
            Ok(output) if output.status_success => output,
            Ok(output) => {
                self.remove_stale(&name, timeout).await;
                return Err(EnvironmentError::CommandFailed {
                    command: display_command(&self.binary, &args),
                    exit_code: output.exit_code,
                    stderr: output.stderr.trim().to_owned(),
                });
            }
            Err(err) => {
                self.remove_stale(&name, timeout).await;
                return Err(err);
            }
        };

        let container_id = output.stdout.trim().to_owned();
        debug!(instance_id, image, %container_id, "started container");

        Ok(DockerEnvironment {
            binary: self.binary.clone(),
            container_id,
            platform,
            workdir: platform.default_workdir().to_owned(),
            released: false,
        })
    }
}

/// A running container created by [`DockerProvider`].
///
/// If the environment is dropped without being released, removal of the container is started in
/// the background.
#[derive(Debug)]
pub struct DockerEnvironment {
    binary: String,
    container_id: String,
    platform: Platform,
    workdir: String,
    released: bool,
}

impl DockerEnvironment {
    /// The ID of the container backing this environment.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    fn exec_args(&self, stdin: bool, program: &[&str]) -> Vec<String> {
        let mut args = vec!["exec".to_owned()];
        if stdin {
            args.push("-i".to_owned());
        }
        args.extend([
            "-w".to_owned(),
            self.workdir.clone(),
            self.container_id.clone(),
        ]);
        args.extend(program.iter().map(|&s| s.to_owned()));
        args
    }

    fn shell_args(&self, command: &str) -> Vec<String> {
        match self.platform {
            Platform::Linux => {
                // Redirect stderr for the whole script so that both streams are interleaved.
                let script = format!("exec 2>&1\n{command}");
                self.exec_args(false, &["bash", "-lc", &script])
            }
            Platform::Windows => {
                let script = format!("& {{ {command} }} *>&1");
                self.exec_args(false, &["powershell", "-NoProfile", "-Command", &script])
            }
        }
    }

    fn patch_strategies(&self, verbose: bool) -> Vec<Vec<&'static str>> {
        let git_apply = |reject: bool| {
            let mut argv = vec!["git", "apply"];
            if verbose {
                argv.push("--verbose");
            }
            if reject {
                argv.push("--reject");
            }
            argv.push("-");
            argv
        };

        let mut strategies = vec![git_apply(false), git_apply(true)];
        if self.platform == Platform::Linux {
            strategies.push(vec!["patch", "--batch", "--fuzz=5", "-p1"]);
        }
        strategies
    }
}

impl Environment for DockerEnvironment {
    async fn apply_patch(
        &self,
        diff: &str,
        verbose: bool,
        timeout: Duration,
    ) -> Result<CommandOutput, EnvironmentError> {
        let deadline = Instant::now() + timeout;
        let mut last = None;

        for strategy in self.patch_strategies(verbose) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EnvironmentError::Timeout { timeout });
            }

            let args = self.exec_args(true, &strategy);
            let output = docker(&self.binary, &args, Some(diff), remaining).await?;
            let combined = output.combined();
            if output.status_success {
                debug!(
                    container_id = %self.container_id,
                    strategy = %strategy.join(" "),
                    "applied patch"
                );
                return Ok(CommandOutput {
                    output: combined,
                    exit_code: output.exit_code,
                });
            }

            debug!(
                container_id = %self.container_id,
                strategy = %strategy.join(" "),
                exit_code = ?output.exit_code,
                "patch strategy failed"
            );
            last = Some((output.exit_code, combined));
        }

        let (exit_code, output) = last.unwrap_or_default();
        Err(EnvironmentError::PatchRejected { exit_code, output })
    }

    async fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, EnvironmentError> {
        let args = self.shell_args(command);
        let output = docker(&self.binary, &args, None, timeout).await?;
        Ok(CommandOutput {
            output: output.combined(),
            exit_code: output.exit_code,
        })
    }

    fn workdir(&self) -> &str {
        &self.workdir
    }

    fn set_workdir(&mut self, dir: String) {
        self.workdir = dir;
    }

    async fn release(&mut self, timeout: Duration) -> Result<(), EnvironmentError> {
        if self.released {
            return Ok(());
        }

        let args = ["rm".to_owned(), "-f".to_owned(), self.container_id.clone()];
        let output = docker(&self.binary, &args, None, timeout).await?;
        if !output.status_success {
            return Err(EnvironmentError::CommandFailed {
                command: display_command(&self.binary, &args),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            });
        }

        self.released = true;
        debug!(container_id = %self.container_id, "removed container");
        Ok(())
    }
}

impl Drop for DockerEnvironment {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(
            container_id = %self.container_id,
            "environment dropped without release, removing container in the background"
        );
        let res = std::process::Command::new(&self.binary)
            .args(["rm", "-f", &self.container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(err) = res {
            warn!(container_id = %self.container_id, "failed to spawn container removal: {err}");
        }
    }
}

struct DockerOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    status_success: bool,
}

impl DockerOutput {
    fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

async fn docker(
    binary: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<DockerOutput, EnvironmentError> {
    let command = display_command(binary, args);
    debug!(%command, "running docker");

    let mut cmd = tokio::process::Command::new(binary);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| EnvironmentError::Exec {
        command: command.clone(),
        err,
    })?;

    let child_stdin = child.stdin.take();
    let write_stdin = async move {
        if let (Some(mut pipe), Some(input)) = (child_stdin, stdin) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };

    // Dropping the child on timeout kills it.
    let res = tokio::time::timeout(timeout, async {
        let (written, output) = futures::join!(write_stdin, child.wait_with_output());
        written.and(output)
    })
    .await;

    let output = match res {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(EnvironmentError::Exec { command, err }),
        Err(_) => return Err(EnvironmentError::Timeout { timeout }),
    };

    Ok(DockerOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        status_success: output.status.success(),
    })
}

fn display_command(binary: &str, args: &[String]) -> String {
    shell_words::join(std::iter::once(binary).chain(args.iter().map(|s| s.as_str())))
}

fn keepalive_command(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Linux => &["tail", "-f", "/dev/null"],
        Platform::Windows => &[
            "powershell",
            "-NoProfile",
            "-Command",
            "while ($true) { Start-Sleep -Seconds 3600 }",
        ],
    }
}

fn container_name(instance_id: &str) -> String {
    let sanitized: String = instance_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("benchgate-{sanitized}-{:08x}", rand::random::<u32>())
}
