// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints out instance statuses as a run progresses.

use super::events::{RunEvent, RunEventKind, RunMode, RunStats, Verdict};
use crate::errors::DisplayErrorChain;
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    time::Duration,
};

#[derive(Debug, Default, Clone)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    error: Style,
    instance_id: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.error = Style::new().magenta().bold();
        self.instance_id = Style::new().blue().bold();
    }
}

/// Writes human-readable status lines for [`RunEvent`]s.
#[derive(Debug)]
pub struct DisplayReporter {
    styles: Styles,
    instance_count: usize,
    finished: usize,
    show_errors: bool,
}

impl DisplayReporter {
    /// Creates a new reporter.
    ///
    /// If `show_errors` is set, the full error chain of each failed instance is printed below its
    /// status line.
    pub fn new(should_colorize: bool, show_errors: bool) -> Self {
        let mut styles = Styles::default();
        if should_colorize {
            styles.colorize();
        }
        Self {
            styles,
            instance_count: 0,
            finished: 0,
            show_errors,
        }
    }

    /// Writes an event.
    pub fn write_event(&mut self, event: &RunEvent<'_>, writer: &mut dyn Write) -> io::Result<()> {
        match &event.kind {
            RunEventKind::RunStarted {
                mode,
                instance_count,
                workers,
            } => {
                self.instance_count = *instance_count;
                self.finished = 0;
                writeln!(
                    writer,
                    "{:>12} {} {} with {} {} ({mode})",
                    "Starting".style(self.styles.pass),
                    instance_count.style(self.styles.count),
                    instances_str(*instance_count),
                    workers.style(self.styles.count),
                    if *workers == 1 { "worker" } else { "workers" },
                )?;
            }
            RunEventKind::InstanceStarted { .. } => {}
            RunEventKind::InstanceCached {
                instance_id,
                verdict,
            } => {
                self.finished += 1;
                write!(
                    writer,
                    "{:>12} {:>11} ",
                    "CACHED".style(self.styles.skip),
                    ""
                )?;
                self.write_counter_and_id(instance_id, writer)?;
                writeln!(writer, ": {}", self.verdict_str(verdict))?;
            }
            RunEventKind::InstanceEmptyPatch { instance_id } => {
                self.finished += 1;
                write!(writer, "{:>12} {:>11} ", "EMPTY".style(self.styles.skip), "")?;
                self.write_counter_and_id(instance_id, writer)?;
                writeln!(writer)?;
            }
            RunEventKind::InstanceFinished {
                instance_id,
                verdict,
                time_taken,
                ..
            } => {
                self.finished += 1;
                let (status, style) = match verdict {
                    Verdict::Resolved => ("RESOLVED", self.styles.pass),
                    Verdict::Unresolved => ("UNRESOLVED", self.styles.fail),
                    Verdict::Valid { .. } => ("VALID", self.styles.pass),
                    Verdict::Invalid => ("INVALID", self.styles.fail),
                    Verdict::Errored(_) => ("ERROR", self.styles.error),
                };
                write!(
                    writer,
                    "{:>12} {} ",
                    status.style(style),
                    DisplayBracketedDuration(*time_taken)
                )?;
                self.write_counter_and_id(instance_id, writer)?;

                match verdict {
                    Verdict::Valid { fail_to_pass } => {
                        writeln!(
                            writer,
                            ": {} fail-to-pass",
                            fail_to_pass.style(self.styles.count)
                        )?;
                    }
                    Verdict::Errored(err) => {
                        writeln!(writer, ": {} error", err.kind_str())?;
                        if self.show_errors {
                            for line in DisplayErrorChain::new(*err).to_string().lines() {
                                writeln!(writer, "{:>12} {line}", "")?;
                            }
                        }
                    }
                    _ => writeln!(writer)?,
                }
            }
            RunEventKind::RunFinished { mode, stats } => {
                self.write_summary(*mode, stats, event.elapsed, writer)?;
            }
        }

        Ok(())
    }

    fn write_counter_and_id(&self, instance_id: &str, writer: &mut dyn Write) -> io::Result<()> {
        let width = self.instance_count.to_string().len();
        write!(
            writer,
            "({:>width$}/{}) {}",
            self.finished,
            self.instance_count,
            instance_id.style(self.styles.instance_id),
        )
    }

    fn verdict_str(&self, verdict: &Verdict<'_>) -> String {
        match verdict {
            Verdict::Resolved => "resolved".style(self.styles.pass).to_string(),
            Verdict::Unresolved => "unresolved".style(self.styles.fail).to_string(),
            Verdict::Valid { fail_to_pass } => format!(
                "{} ({} fail-to-pass)",
                "valid".style(self.styles.pass),
                fail_to_pass.style(self.styles.count)
            ),
            Verdict::Invalid => "invalid".style(self.styles.fail).to_string(),
            Verdict::Errored(err) => format!("{} error", err.kind_str())
                .style(self.styles.error)
                .to_string(),
        }
    }

    fn write_summary(
        &self,
        mode: RunMode,
        stats: &RunStats,
        elapsed: Duration,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let summary_style = if stats.is_success() {
            self.styles.pass
        } else {
            self.styles.fail
        };
        write!(
            writer,
            "{}\n{:>12} ",
            "-".repeat(12),
            "Summary".style(summary_style)
        )?;
        // Right-aligned to 8 characters, with 3 digits after the decimal point.
        write!(writer, "[{:>8.3}s] ", elapsed.as_secs_f64())?;
        write!(
            writer,
            "{} {} submitted: ",
            stats.submitted.style(self.styles.count),
            instances_str(stats.submitted),
        )?;

        let (success, failure) = match mode {
            RunMode::Evaluate => ("resolved", "unresolved"),
            RunMode::Validate => ("valid", "invalid"),
        };
        write!(
            writer,
            "{} {}, {} {}",
            stats.success.style(self.styles.count),
            success.style(self.styles.pass),
            stats.failure.style(self.styles.count),
            failure.style(self.styles.fail),
        )?;
        if mode == RunMode::Evaluate {
            write!(
                writer,
                ", {} {}",
                stats.empty_patch.style(self.styles.count),
                "empty".style(self.styles.skip),
            )?;
        }
        write!(
            writer,
            ", {} {}",
            stats.error.style(self.styles.count),
            "errored".style(self.styles.error),
        )?;
        if stats.cached > 0 {
            write!(
                writer,
                " ({} reused from a previous run)",
                stats.cached.style(self.styles.count)
            )?;
        }
        writeln!(writer)
    }
}

fn instances_str(count: usize) -> &'static str {
    if count == 1 { "instance" } else { "instances" }
}

struct DisplayBracketedDuration(Duration);

impl std::fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(f, "[{:>8.3}s]", self.0.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InstanceError;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn event(elapsed_secs: u64, kind: RunEventKind<'_>) -> RunEvent<'_> {
        RunEvent {
            elapsed: Duration::from_secs(elapsed_secs),
            kind,
        }
    }

    #[test]
    fn evaluate_run_output() {
        let err = InstanceError::Panicked {
            message: "boom".to_owned(),
        };
        let mut stats = RunStats::new(4);
        stats.on_verdict(&Verdict::Resolved, true);
        stats.on_empty_patch();
        stats.on_verdict(&Verdict::Unresolved, false);
        stats.on_verdict(&Verdict::Errored(&err), false);

        let events = [
            event(
                0,
                RunEventKind::RunStarted {
                    mode: RunMode::Evaluate,
                    instance_count: 4,
                    workers: 2,
                },
            ),
            event(
                0,
                RunEventKind::InstanceCached {
                    instance_id: "org__a-1",
                    verdict: Verdict::Resolved,
                },
            ),
            event(
                0,
                RunEventKind::InstanceEmptyPatch {
                    instance_id: "org__b-2",
                },
            ),
            event(
                0,
                RunEventKind::InstanceStarted {
                    instance_id: "org__c-3",
                    running: 1,
                },
            ),
            event(
                12,
                RunEventKind::InstanceFinished {
                    instance_id: "org__c-3",
                    verdict: Verdict::Unresolved,
                    time_taken: Duration::from_millis(12_345),
                    running: 0,
                },
            ),
            event(
                13,
                RunEventKind::InstanceFinished {
                    instance_id: "org__d-4",
                    verdict: Verdict::Errored(&err),
                    time_taken: Duration::from_millis(500),
                    running: 0,
                },
            ),
            event(
                14,
                RunEventKind::RunFinished {
                    mode: RunMode::Evaluate,
                    stats,
                },
            ),
        ];

        let mut reporter = DisplayReporter::new(false, true);
        let mut out = Vec::new();
        for event in &events {
            reporter.write_event(event, &mut out).unwrap();
        }

        assert_eq!(
            String::from_utf8(out).unwrap(),
            indoc! {"
                    Starting 4 instances with 2 workers (evaluate)
                      CACHED             (1/4) org__a-1: resolved
                       EMPTY             (2/4) org__b-2
                  UNRESOLVED [  12.345s] (3/4) org__c-3
                       ERROR [   0.500s] (4/4) org__d-4: panic error
                             instance task panicked: boom
                ------------
                     Summary [  14.000s] 4 instances submitted: 1 resolved, 1 unresolved, 1 empty, 1 errored (1 reused from a previous run)
            "}
        );
    }

    #[test]
    fn validate_summary() {
        let mut stats = RunStats::new(1);
        stats.on_verdict(&Verdict::Valid { fail_to_pass: 3 }, false);

        let mut reporter = DisplayReporter::new(false, false);
        let mut out = Vec::new();
        reporter
            .write_event(
                &event(
                    1,
                    RunEventKind::RunFinished {
                        mode: RunMode::Validate,
                        stats,
                    },
                ),
                &mut out,
            )
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "------------\n     Summary [   1.000s] 1 instance submitted: 1 valid, 0 invalid, 0 errored\n"
        );
    }
}
