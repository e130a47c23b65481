//! Task orchestration.
//!
//! The [`Orchestrator`] executes a [`TaskPlan`] with bounded parallelism.
//! Each task runs on the blocking pool: it builds one observation stack,
//! reduces it once per statistic and writes the artifacts. Tasks share
//! nothing mutable, so they can finish in any order.
//!
//! # Cancellation and timeouts
//!
//! Every task gets a child of the run's [`CancellationToken`]. A per-task
//! timer cancels the child when the timeout elapses. The token is polled
//! while the stack is built and once more before the first write, so an
//! interrupted task leaves nothing behind; writes themselves are atomic.

mod plan;

pub use plan::{PlanError, PlannedTask, StatisticOutput, Task, TaskPlan};

use crate::grid::SpatialGrid;
use crate::output::{is_complete, OutputWriter};
use crate::stack::{SourceCatalog, SourceSpec, StackBuilder, StackError};
use crate::window::TimeWindow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runtime limits of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum concurrently running tasks
    pub max_in_flight: usize,
    /// Per-task timeout; `None` for no limit
    pub task_timeout: Option<Duration>,
    /// Skip tasks whose artifacts are all complete
    pub skip_existing: bool,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_in_flight: crate::config::default_max_in_flight(),
            task_timeout: None,
            skip_existing: false,
        }
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Artifacts written (only the missing ones when resuming)
    Written {
        paths: Vec<PathBuf>,
        observations: usize,
    },
    /// Every artifact already existed
    Skipped,
    /// Run cancelled before the task wrote anything
    Cancelled,
    /// Task exceeded its timeout before writing anything
    TimedOut,
    Failed { error: String },
}

/// Result of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task: Task,
    pub outcome: TaskOutcome,
    pub elapsed: Duration,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<TaskReport>,
}

impl RunSummary {
    fn count(&self, matches: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| matches(&r.outcome)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Written { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Cancelled))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::TimedOut))
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Failed { .. }))
    }

    /// True when every task wrote or skipped.
    pub fn is_success(&self) -> bool {
        self.reports
            .iter()
            .all(|r| matches!(r.outcome, TaskOutcome::Written { .. } | TaskOutcome::Skipped))
    }
}

/// Everything a task needs, shared read-only across the pool.
struct TaskContext {
    catalog: Arc<dyn SourceCatalog>,
    grid: SpatialGrid,
    sources: Vec<SourceSpec>,
    measurements: Vec<String>,
    range: TimeWindow,
    statistics: Vec<StatisticOutput>,
    writer: OutputWriter,
    skip_existing: bool,
}

/// Runs task plans against a catalog.
pub struct Orchestrator {
    context: Arc<TaskContext>,
    limits: ExecutionLimits,
}

impl Orchestrator {
    /// `range` is the global time range; observations outside it are never
    /// stacked, even when a window extends past it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        grid: SpatialGrid,
        sources: Vec<SourceSpec>,
        measurements: Vec<String>,
        range: TimeWindow,
        statistics: Vec<StatisticOutput>,
        writer: OutputWriter,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            context: Arc::new(TaskContext {
                catalog,
                grid,
                sources,
                measurements,
                range,
                statistics,
                writer,
                skip_existing: limits.skip_existing,
            }),
            limits,
        }
    }

    /// Executes every task of `plan` and waits for all of them.
    ///
    /// Cancelling `cancel` lets running tasks stop at their next check and
    /// reports the rest as cancelled.
    pub async fn run(&self, plan: &TaskPlan, cancel: CancellationToken) -> RunSummary {
        let started = Instant::now();
        info!(
            tasks = plan.len(),
            artifacts = plan.artifact_count(),
            max_in_flight = self.limits.max_in_flight,
            "Starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.limits.max_in_flight.max(1)));
        let mut running = JoinSet::new();
        let mut summary = RunSummary::default();

        // Tasks are spawned only once a permit is free, so at most
        // `max_in_flight` futures exist at any time.
        for planned in plan.tasks() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                summary.reports.push(TaskReport {
                    task: planned.task,
                    outcome: TaskOutcome::Cancelled,
                    elapsed: Duration::ZERO,
                });
                continue;
            };
            while let Some(joined) = running.try_join_next() {
                collect(&mut summary, joined);
            }

            let planned = planned.clone();
            let context = Arc::clone(&self.context);
            let run_token = cancel.clone();
            let timeout = self.limits.task_timeout;

            running.spawn(async move {
                let _permit = permit;
                let task = planned.task;
                let task_started = Instant::now();

                let task_token = run_token.child_token();
                if let Some(timeout) = timeout {
                    let timer_token = task_token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(timeout) => timer_token.cancel(),
                            _ = timer_token.cancelled() => {}
                        }
                    });
                }

                let blocking_token = task_token.clone();
                let outcome = match tokio::task::spawn_blocking(move || {
                    execute(&context, &planned, &blocking_token, &run_token)
                })
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => TaskOutcome::Failed {
                        error: format!("task panicked: {}", e),
                    },
                };
                // Stops the timer
                task_token.cancel();

                TaskReport {
                    task,
                    outcome,
                    elapsed: task_started.elapsed(),
                }
            });
        }

        while let Some(joined) = running.join_next().await {
            collect(&mut summary, joined);
        }

        info!(
            written = summary.written(),
            skipped = summary.skipped(),
            failed = summary.failures().count(),
            cancelled = summary.cancelled(),
            timed_out = summary.timed_out(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );
        summary
    }
}

fn collect(summary: &mut RunSummary, joined: Result<TaskReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => {
            log_report(&report);
            summary.reports.push(report);
        }
        Err(join_err) => {
            warn!(error = %join_err, "Task driver panicked");
        }
    }
}

fn log_report(report: &TaskReport) {
    let elapsed_ms = report.elapsed.as_millis() as u64;
    match &report.outcome {
        TaskOutcome::Written {
            paths,
            observations,
        } => debug!(
            task = %report.task,
            artifacts = paths.len(),
            observations,
            elapsed_ms,
            "Task complete"
        ),
        TaskOutcome::Skipped => debug!(task = %report.task, "Task skipped, artifacts exist"),
        TaskOutcome::Cancelled => debug!(task = %report.task, "Task cancelled"),
        TaskOutcome::TimedOut => warn!(task = %report.task, elapsed_ms, "Task timed out"),
        TaskOutcome::Failed { error } => warn!(task = %report.task, error = %error, "Task failed"),
    }
}

/// Interrupt state of a task, if any.
fn interruption(task_token: &CancellationToken, run_token: &CancellationToken) -> Option<TaskOutcome> {
    if run_token.is_cancelled() {
        Some(TaskOutcome::Cancelled)
    } else if task_token.is_cancelled() {
        Some(TaskOutcome::TimedOut)
    } else {
        None
    }
}

/// Runs one task to completion on the current (blocking) thread.
fn execute(
    context: &TaskContext,
    planned: &PlannedTask,
    task_token: &CancellationToken,
    run_token: &CancellationToken,
) -> TaskOutcome {
    let task = &planned.task;

    let pending: Vec<usize> = (0..planned.paths.len())
        .filter(|&i| !(context.skip_existing && is_complete(&planned.paths[i])))
        .collect();
    if pending.is_empty() {
        return TaskOutcome::Skipped;
    }
    if let Some(outcome) = interruption(task_token, run_token) {
        return outcome;
    }

    let geometry = context.grid.geometry(task.tile);
    let builder = StackBuilder::new(
        context.catalog.as_ref(),
        &context.sources,
        &context.measurements,
        context.range,
    );
    let stack = match builder.build(&geometry, &task.window, task_token) {
        Ok(stack) => stack,
        Err(StackError::Cancelled) => {
            return interruption(task_token, run_token).unwrap_or(TaskOutcome::Cancelled);
        }
        Err(e) => return TaskOutcome::Failed { error: e.to_string() },
    };

    let results: Vec<_> = pending
        .iter()
        .map(|&i| {
            let output = &context.statistics[i];
            (output, output.statistic.reduce(&stack))
        })
        .collect();

    if let Some(outcome) = interruption(task_token, run_token) {
        return outcome;
    }

    let mut paths = Vec::with_capacity(results.len());
    for (output, result) in &results {
        match context
            .writer
            .write(result, &geometry, &task.window, &output.artifact)
        {
            Ok(path) => paths.push(path),
            Err(e) => return TaskOutcome::Failed { error: e.to_string() },
        }
    }

    TaskOutcome::Written {
        paths,
        observations: stack.len(),
    }
}

#[cfg(test)]
mod tests;
