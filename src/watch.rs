//! Watch mode.
//!
//! Split into two halves:
//!
//! 1. **File watcher**: uses the `notify` crate to monitor the static roots of
//!    every watch rule recursively, debounced so that rapid saves arrive as a
//!    single batch. Each batch of changed paths is forwarded over a channel.
//! 2. **Coordinator**: a single event loop receiving those batches. Changed
//!    paths are matched against the watch rules, the named tasks are expanded
//!    to everything depending on them, and the result is submitted as the
//!    goal of the next build cycle.
//!
//! ## Coalescing
//!
//! Only one cycle is ever in flight. Goals submitted while a cycle runs are
//! merged into a single pending goal, which starts as soon as the running
//! cycle settles. Failed cycles are reported and never retried.

use std::collections::BTreeSet;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::ArcStr;
use crate::error::{BuildError, GraphError, WatchError};
use crate::executor::{BuildReport, Orchestrator};
use crate::session::BuildSession;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A glob pattern and the tasks that read the files it matches.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pattern: Pattern,
    tasks: Vec<ArcStr>,
}

impl WatchRule {
    pub fn new<I, S>(pattern: &str, tasks: I) -> Result<Self, glob::PatternError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
            tasks: tasks.into_iter().map(Into::into).collect(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn tasks(&self) -> &[ArcStr] {
        &self.tasks
    }

    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.pattern.matches_with(path.as_str(), MATCH_OPTIONS)
    }

    /// Anchors the rule at the canonical location of its static root, which
    /// is also returned as the directory to watch.
    pub fn resolve(&self) -> Result<(Utf8PathBuf, WatchRule), WatchError> {
        let (root, pattern) = resolve_watch_path(self.pattern())?;
        let rule = WatchRule {
            pattern,
            tasks: self.tasks.clone(),
        };
        Ok((root, rule))
    }
}

/// Names of the tasks whose rules match any of the paths.
pub fn affected<'a>(rules: &'a [WatchRule], paths: &[Utf8PathBuf]) -> BTreeSet<&'a ArcStr> {
    rules
        .iter()
        .filter(|rule| paths.iter().any(|path| rule.matches(path)))
        .flat_map(|rule| rule.tasks.iter())
        .collect()
}

/// Decides when a submitted goal may start.
#[derive(Debug, Default)]
pub struct Coalescer {
    in_flight: bool,
    pending: Option<BTreeSet<ArcStr>>,
}

impl Coalescer {
    /// Returns the goal to start right away, or `None` if a cycle is already
    /// in flight, in which case the goal joins the pending one.
    pub fn submit(&mut self, goal: BTreeSet<ArcStr>) -> Option<BTreeSet<ArcStr>> {
        if self.in_flight {
            self.pending.get_or_insert_with(BTreeSet::new).extend(goal);
            None
        } else {
            self.in_flight = true;
            Some(goal)
        }
    }

    /// Marks the running cycle as settled and hands out the pending goal, if
    /// any, as the next one to start.
    pub fn complete(&mut self) -> Option<BTreeSet<ArcStr>> {
        let next = self.pending.take();
        self.in_flight = next.is_some();
        next
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

type Cycle = JoinHandle<Result<BuildReport, BuildError>>;

/// Runs incremental build cycles in response to file changes.
pub struct Coordinator {
    orchestrator: Orchestrator,
    session: Arc<BuildSession>,
    rules: Vec<WatchRule>,
    coalescer: Coalescer,
    cycles: u64,
}

impl Coordinator {
    /// Fails if a rule names a task the graph doesn't have.
    pub fn new(orchestrator: Orchestrator, session: Arc<BuildSession>, rules: Vec<WatchRule>) -> Result<Self, GraphError> {
        for task in rules.iter().flat_map(WatchRule::tasks) {
            if !orchestrator.graph().contains(task) {
                return Err(GraphError::UnknownTask(task.clone()));
            }
        }

        Ok(Self {
            orchestrator,
            session,
            rules,
            coalescer: Coalescer::default(),
            cycles: 0,
        })
    }

    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Processes batches of changed paths until the channel closes, then
    /// lets the in-flight and pending cycles finish.
    pub async fn run(&mut self, mut events: UnboundedReceiver<Vec<Utf8PathBuf>>) -> Result<(), WatchError> {
        let mut cycle: Option<Cycle> = None;

        loop {
            tokio::select! {
                batch = events.recv() => match batch {
                    Some(paths) => {
                        if let Some(goal) = self.on_change(&paths)? {
                            cycle = Some(self.start(goal));
                        }
                    }
                    None => break,
                },
                result = settle(&mut cycle), if cycle.is_some() => {
                    cycle = self.on_settled(result);
                }
            }
        }

        while cycle.is_some() {
            let result = settle(&mut cycle).await;
            cycle = self.on_settled(result);
        }

        Ok(())
    }

    fn on_change(&mut self, paths: &[Utf8PathBuf]) -> Result<Option<BTreeSet<ArcStr>>, GraphError> {
        let tasks = affected(&self.rules, paths);
        if tasks.is_empty() {
            debug!(?paths, "no rule matched");
            return Ok(None);
        }

        let goal = self.orchestrator.graph().dependents(tasks)?;
        info!(?goal, "change detected");

        if self.coalescer.is_in_flight() {
            debug!("build in flight, rebuild queued");
        }

        Ok(self.coalescer.submit(goal))
    }

    fn on_settled(&mut self, result: Result<Result<BuildReport, BuildError>, tokio::task::JoinError>) -> Option<Cycle> {
        match result {
            Ok(Ok(report)) => info!(cycle = report.cycle, "rebuild complete, watching for changes..."),
            Ok(Err(err)) => error!("{err}"),
            Err(err) => error!("build cycle panicked: {err}"),
        }

        self.coalescer.complete().map(|goal| self.start(goal))
    }

    fn start(&mut self, goal: BTreeSet<ArcStr>) -> Cycle {
        self.cycles += 1;
        let orchestrator = self.orchestrator.clone();
        let session = self.session.clone();

        tokio::spawn(async move { orchestrator.run_incremental(&session, &goal).await })
    }
}

/// Waits for the in-flight cycle, leaving `None` behind.
async fn settle(cycle: &mut Option<Cycle>) -> Result<Result<BuildReport, BuildError>, tokio::task::JoinError> {
    match cycle.as_mut() {
        Some(handle) => {
            let result = handle.await;
            *cycle = None;
            result
        }
        None => std::future::pending().await,
    }
}

/// Canonical directory to watch for a glob, and the glob anchored there.
///
/// The directory is the part of the glob before its first wildcard. A glob
/// naming a single file is watched through the file's directory, so that
/// editors replacing the file on save are still noticed.
pub fn resolve_watch_path(glob: impl AsRef<str>) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let (base, rest) = split_glob(Utf8Path::new(glob.as_ref()));
    let base = base.canonicalize_utf8()?;
    let escaped = Pattern::escape(base.as_str());

    if rest.as_str().is_empty() {
        let dir = match base.parent() {
            Some(parent) if base.is_file() => parent.to_path_buf(),
            _ => base,
        };
        return Ok((dir, Pattern::new(&escaped)?));
    }

    let pattern = Pattern::new(&format!("{escaped}/{rest}"))?;
    Ok((base, pattern))
}

/// Literal leading components of a glob, and everything from the first
/// wildcard on.
fn split_glob(glob: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let mut base = Utf8PathBuf::new();
    let mut rest = Utf8PathBuf::new();

    for component in glob.components() {
        if rest.as_str().is_empty() && !component.as_str().contains(['*', '?', '[']) {
            base.push(component);
        } else {
            rest.push(component);
        }
    }

    if base.as_str().is_empty() {
        base.push(".");
    }

    (base, rest)
}

/// Drops every root already covered by another one, watches being
/// recursive.
pub fn collapse_watch_paths(paths: impl IntoIterator<Item = Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut roots: Vec<_> = paths.into_iter().collect();
    roots.sort();
    roots.dedup_by(|root, kept| root.starts_with(&*kept));
    roots
}

/// Watches the roots of every rule and drives the coordinator with the
/// changes. Runs until the watcher shuts down.
#[cfg(feature = "live")]
pub async fn watch(mut coordinator: Coordinator) -> Result<(), WatchError> {
    use std::time::Duration;

    use notify::{EventKind, RecursiveMode};
    use notify_debouncer_full::{DebounceEventResult, new_debouncer};

    let mut watched = Vec::new();
    let mut rules = Vec::new();

    for rule in coordinator.rules() {
        match rule.resolve() {
            Ok((root, rule)) => {
                watched.push(root);
                rules.push(rule);
            }
            Err(err) => error!("failed to resolve path {}: {err}", rule.pattern()),
        }
    }
    coordinator.rules = rules;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths: Vec<Utf8PathBuf> = events
                    .iter()
                    .filter(|de| {
                        matches!(
                            de.event.kind,
                            EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                        )
                    })
                    .flat_map(|de| &de.event.paths)
                    .filter_map(|path| Utf8PathBuf::try_from(path.clone()).ok())
                    .collect();

                if !paths.is_empty() {
                    // The receiver is gone once the coordinator stops.
                    let _ = tx.send(paths);
                }
            }
            Err(errors) => {
                for err in errors {
                    error!("watch error: {err}");
                }
            }
        }
    })?;

    for path in collapse_watch_paths(watched) {
        info!("watching {path}");
        debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    coordinator.run(rx).await
}
