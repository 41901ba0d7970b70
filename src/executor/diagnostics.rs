use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::time::Duration;

use tokio::time::Instant;

use crate::blueprint::TaskGraph;
use crate::core::ArcStr;
use crate::service::LintViolation;

/// Timing of a single task run.
#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Outcome of a task in one build cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    /// The action returned an error or panicked.
    Failed(String),
    /// Not started, because an earlier wave failed or timed out.
    Skipped,
    /// Still running when the cycle timed out. Whatever it committed before
    /// resolving stays in place, but it does not count as succeeded.
    Abandoned,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Succeeded => f.write_str("succeeded"),
            TaskStatus::Failed(reason) => write!(f, "failed: {reason}"),
            TaskStatus::Skipped => f.write_str("skipped"),
            TaskStatus::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Per-task record of one build cycle.
///
/// Returned by a successful run and carried by [`BuildError`](crate::BuildError)
/// for a failed one.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub cycle: u64,
    /// Status of every task in the plan.
    pub statuses: BTreeMap<ArcStr, TaskStatus>,
    /// Timings of the tasks whose action was invoked.
    pub executions: BTreeMap<ArcStr, TaskExecution>,
    /// Lint violations reported during the cycle.
    pub violations: Vec<LintViolation>,
    pub duration: Duration,
}

impl BuildReport {
    fn with_status(&self, wanted: fn(&TaskStatus) -> bool) -> Vec<ArcStr> {
        self.statuses
            .iter()
            .filter(|(_, status)| wanted(status))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn succeeded(&self) -> Vec<ArcStr> {
        self.with_status(|status| *status == TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> Vec<ArcStr> {
        self.with_status(|status| matches!(status, TaskStatus::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<ArcStr> {
        self.with_status(|status| *status == TaskStatus::Skipped)
    }

    pub fn abandoned(&self) -> Vec<ArcStr> {
        self.with_status(|status| *status == TaskStatus::Abandoned)
    }

    /// Every task in the plan succeeded.
    pub fn is_success(&self) -> bool {
        self.statuses.values().all(|status| *status == TaskStatus::Succeeded)
    }

    /// Renders the task graph as a Mermaid diagram, coloured by outcome.
    ///
    /// * **Green to yellow**: succeeded, from fastest to slowest
    /// * **Red**: failed
    /// * **Orange**: abandoned
    /// * **Grey**: skipped
    /// * **Blue**: not part of this cycle
    pub fn render_mermaid(&self, graph: &TaskGraph) -> String {
        let mut f = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_mermaid(&mut f, graph);
        f
    }

    fn write_mermaid(&self, f: &mut String, graph: &TaskGraph) -> fmt::Result {
        writeln!(f, "graph LR")?;

        let (min_time, max_time) = self
            .executions
            .values()
            .map(|exec| exec.duration.as_secs_f64())
            .fold(None, |acc: Option<(f64, f64)>, secs| match acc {
                Some((min, max)) => Some((min.min(secs), max.max(secs))),
                None => Some((secs, secs)),
            })
            .unwrap_or((0.0, 0.0));

        // Avoid dividing by zero when every task took the same time.
        let span = if (max_time - min_time).abs() < f64::EPSILON {
            1.0
        } else {
            max_time - min_time
        };

        let ids: BTreeMap<&ArcStr, usize> = graph.names().enumerate().map(|(i, name)| (name, i)).collect();

        for (name, &id) in &ids {
            let label = name.replace('"', "\\\"");

            let (extra, color) = match self.statuses.get(*name) {
                Some(TaskStatus::Succeeded) => {
                    let duration = self
                        .executions
                        .get(*name)
                        .map(|exec| exec.duration)
                        .unwrap_or_default();
                    let t = (duration.as_secs_f64() - min_time) / span;
                    // 0.0 green, 1.0 yellow
                    let r = (255.0 * t.clamp(0.0, 1.0)) as u8;
                    (format!("{duration:.2?}"), format!("#{r:02X}FF00"))
                }
                Some(TaskStatus::Failed(_)) => ("failed".to_string(), "#FF4D4D".to_string()),
                Some(TaskStatus::Abandoned) => ("abandoned".to_string(), "#FFA500".to_string()),
                Some(TaskStatus::Skipped) => ("skipped".to_string(), "#D3D3D3".to_string()),
                None => ("not run".to_string(), "#ADD8E6".to_string()),
            };

            writeln!(f, "    {id}[\"{label}\\n{extra}\"]")?;
            writeln!(f, "    style {id} fill:{color}")?;
        }

        for (source, target) in graph.edges() {
            if let (Some(source), Some(target)) = (ids.get(source), ids.get(target)) {
                writeln!(f, "    {source} --> {target}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Blueprint;

    #[test]
    fn test_render_mermaid_by_status() {
        let mut blueprint = Blueprint::new();
        blueprint.declare("a", &[], |_| async { Ok(()) }).unwrap();
        blueprint.declare("b", &["a"], |_| async { Ok(()) }).unwrap();
        blueprint.declare("c", &["b"], |_| async { Ok(()) }).unwrap();
        blueprint.declare("d", &[], |_| async { Ok(()) }).unwrap();
        let graph = blueprint.finish().unwrap();

        let mut report = BuildReport::default();
        report.statuses.insert("a".into(), TaskStatus::Succeeded);
        report.statuses.insert("b".into(), TaskStatus::Failed("boom".into()));
        report.statuses.insert("c".into(), TaskStatus::Skipped);
        report.executions.insert(
            "a".into(),
            TaskExecution {
                start: Instant::now(),
                duration: Duration::from_millis(5),
            },
        );

        let rendered = report.render_mermaid(&graph);

        assert!(rendered.starts_with("graph LR\n"));
        assert!(rendered.contains("[\"a\\n5.00ms\"]"));
        assert!(rendered.contains("fill:#00FF00"));
        assert!(rendered.contains("[\"b\\nfailed\"]"));
        assert!(rendered.contains("[\"c\\nskipped\"]"));
        assert!(rendered.contains("[\"d\\nnot run\"]"));
        assert_eq!(rendered.matches("-->").count(), 2);

        assert_eq!(report.failed(), vec![ArcStr::from("b")]);
        assert_eq!(report.skipped(), vec![ArcStr::from("c")]);
        assert!(!report.is_success());
    }
}
