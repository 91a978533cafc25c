// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

use crate::pipeline::events::{ProgressSink, TaskEvent};
use crate::utils::formatting::{format_cost, format_number};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner on stderr that follows a pipeline run.
///
/// When stderr is not a TTY (piped output, CI) or quiet mode is on, the bar
/// is hidden and events only reach the log.
///
/// # Example
///
/// ```no_run
/// use specforge::pipeline::events::{ProgressSink, TaskEvent};
/// use specforge::utils::progress::TerminalProgress;
///
/// let progress = TerminalProgress::new(false);
/// progress.publish("t-1", TaskEvent::Progress { message: "Running planner".to_string() });
/// progress.finish();
/// ```
pub struct TerminalProgress {
    bar: ProgressBar,
    is_tty: bool,
}

impl TerminalProgress {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        let is_tty = Term::stderr().is_term() && !quiet;
        let bar = if is_tty {
            let spinner = ProgressBar::new_spinner();
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(spinner_style());
        Self { bar, is_tty }
    }

    /// Clear the spinner. Safe to call more than once.
    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }

    #[must_use]
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    fn line(&self, text: String) {
        if self.is_tty {
            self.bar.println(text);
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to parse progress template: {e}");
            ProgressStyle::default_spinner()
        })
}

impl std::fmt::Debug for TerminalProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalProgress")
            .field("is_tty", &self.is_tty)
            .finish_non_exhaustive()
    }
}

impl ProgressSink for TerminalProgress {
    fn publish(&self, task_id: &str, event: TaskEvent) {
        tracing::debug!(task_id, kind = event.kind(), "Task event");

        match event {
            TaskEvent::Start { message } | TaskEvent::Progress { message } => {
                self.bar.set_message(message);
            }
            TaskEvent::Chunk {
                stage,
                index,
                total,
                succeeded,
                ..
            } => {
                self.bar
                    .set_message(format!("{}: chunk {}/{}", stage, index, total));
                if !succeeded {
                    self.line(format!(
                        "{} {} chunk {}/{} skipped",
                        style("!").yellow(),
                        stage,
                        index,
                        total
                    ));
                }
            }
            TaskEvent::Complete {
                stage,
                input_tokens,
                output_tokens,
                cost,
                ..
            } => {
                self.line(format!(
                    "{} {} ({} in / {} out, {})",
                    style("done").green(),
                    stage,
                    format_number(input_tokens),
                    format_number(output_tokens),
                    format_cost(cost)
                ));
            }
            TaskEvent::Finished {
                total_cost,
                elapsed,
                ..
            } => {
                self.line(format!(
                    "{} {} in {}",
                    style("finished").green().bold(),
                    format_cost(total_cost),
                    elapsed
                ));
                self.finish();
            }
            TaskEvent::Failed { stage, message } => {
                self.line(format!(
                    "{} {}: {}",
                    style("failed").red().bold(),
                    stage.as_deref().unwrap_or("run"),
                    message
                ));
                self.bar.abandon();
            }
        }
    }
}
