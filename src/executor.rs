//! Wave-parallel execution of a task plan.
//!
//! Every wave of a [`Plan`] is launched at once, one tokio task per graph
//! task, and awaited as a whole before the next wave starts. This gives a
//! strict happens-before relation between waves and none within a wave.
//! When a task fails, the rest of its wave still runs to completion, but no
//! further wave is started.

mod diagnostics;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::{Plan, TaskContext, TaskGraph};
use crate::error::BuildError;
use crate::session::BuildSession;
use crate::utils::{as_overhead, STYLE_BUILD, STYLE_TASK};

pub use diagnostics::{BuildReport, TaskExecution, TaskStatus};

/// Why no further wave is started.
enum Halt {
    Failed,
    TimedOut,
}

/// Runs goals against an immutable task graph.
///
/// Holds no artifact state of its own, everything produced lives in the
/// [`BuildSession`] passed to each run.
#[derive(Clone)]
pub struct Orchestrator {
    graph: Arc<TaskGraph>,
    timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            timeout: None,
        }
    }

    /// Once a cycle has run for this long, no further wave is started.
    /// Tasks already running are never cancelled.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Runs the goal tasks and everything they depend on.
    pub async fn run<I, S>(&self, session: &Arc<BuildSession>, goal: I) -> Result<BuildReport, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plan = self.graph.resolve_order(goal)?;
        self.execute(session, &plan).await
    }

    /// Re-runs the changed tasks and every task depending on them, together
    /// with everything those need. A composed artifact therefore always sees
    /// inputs from the same cycle. Aggregate tasks are left out of the
    /// closure, since they would pull in the whole graph.
    pub async fn run_incremental<I, S>(
        &self,
        session: &Arc<BuildSession>,
        changed: I,
    ) -> Result<BuildReport, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut goal = Vec::new();
        for name in self.graph.dependents(changed)? {
            if !self.graph.is_group(&name)? {
                goal.push(name);
            }
        }

        let plan = self.graph.resolve_order(&goal)?;
        self.execute(session, &plan).await
    }

    /// Runs a resolved plan as one build cycle.
    pub async fn execute(&self, session: &Arc<BuildSession>, plan: &Plan) -> Result<BuildReport, BuildError> {
        let cycle = session.begin_cycle();
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);

        info!(cycle, tasks = plan.len(), "starting build cycle");
        for (i, wave) in plan.waves().iter().enumerate() {
            debug!(cycle, wave = i, tasks = ?wave, "planned wave");
        }

        let root_span = info_span!("build", cycle);
        root_span.pb_set_length(plan.len() as u64);
        root_span.pb_set_style(&STYLE_BUILD);
        root_span.pb_set_message("Building tasks...");

        let mut report = BuildReport {
            cycle,
            ..BuildReport::default()
        };

        let halt = self
            .run_waves(session, plan, cycle, deadline, &root_span, &mut report)
            .instrument(root_span.clone())
            .await?;

        report.violations = session.take_violations();
        report.duration = started.elapsed();

        match halt {
            None => {
                info!(cycle, "build cycle finished {}", as_overhead(started.into_std()));
                Ok(report)
            }
            Some(Halt::Failed) => {
                error!(cycle, failed = ?report.failed(), "build cycle failed");
                Err(BuildError::Failed {
                    failed: report.failed(),
                    skipped: report.skipped(),
                    report: Box::new(report),
                })
            }
            Some(Halt::TimedOut) => {
                error!(cycle, abandoned = ?report.abandoned(), "build cycle timed out");
                Err(BuildError::TimedOut {
                    abandoned: report.abandoned(),
                    skipped: report.skipped(),
                    report: Box::new(report),
                })
            }
        }
    }

    async fn run_waves(
        &self,
        session: &Arc<BuildSession>,
        plan: &Plan,
        cycle: u64,
        deadline: Option<Instant>,
        root_span: &tracing::Span,
        report: &mut BuildReport,
    ) -> Result<Option<Halt>, BuildError> {
        let mut halt = None;

        for wave in plan.waves() {
            if halt.is_some() {
                for name in wave {
                    warn!(task = %name, "skipped");
                    report.statuses.insert(name.clone(), TaskStatus::Skipped);
                    root_span.pb_inc(1);
                }
                continue;
            }

            let mut handles = Vec::with_capacity(wave.len());

            for name in wave {
                let task = self.graph.task(name)?;

                let span = info_span!("task", name = %name);
                span.pb_set_style(&STYLE_TASK);
                span.pb_set_message(&format!("Running {name}"));

                let context = TaskContext {
                    name: name.clone(),
                    cycle,
                    session: session.clone(),
                    span: span.clone(),
                };

                let action = task.action.clone();
                let handle = tokio::spawn(
                    async move {
                        let start = Instant::now();
                        let result = action(context).await;
                        (start, start.elapsed(), result)
                    }
                    .instrument(span),
                );

                handles.push((name.clone(), handle));
            }

            // The whole wave is awaited even if some task already failed.
            for (name, handle) in handles {
                let status = match handle.await {
                    Ok((start, duration, result)) => {
                        report
                            .executions
                            .insert(name.clone(), TaskExecution { start, duration });

                        let resolved = start + duration;
                        match result {
                            _ if deadline.is_some_and(|deadline| resolved > deadline) => {
                                warn!(task = %name, "resolved after the build timed out, not counted as succeeded");
                                TaskStatus::Abandoned
                            }
                            Ok(()) => {
                                session.mark_succeeded(&name);
                                TaskStatus::Succeeded
                            }
                            Err(err) => {
                                error!(task = %name, "{err}");
                                TaskStatus::Failed(err.to_string())
                            }
                        }
                    }
                    Err(err) => {
                        error!(task = %name, "task panicked: {err}");
                        TaskStatus::Failed(format!("Task panicked: {err}"))
                    }
                };

                match status {
                    TaskStatus::Failed(_) if halt.is_none() => halt = Some(Halt::Failed),
                    TaskStatus::Abandoned => halt = Some(Halt::TimedOut),
                    _ => {}
                }

                report.statuses.insert(name, status);
                root_span.pb_inc(1);
            }
        }

        Ok(halt)
    }
}
