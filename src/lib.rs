#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod core;
mod error;
mod executor;
pub mod pipeline;
mod producer;
mod project;
#[cfg(feature = "server")]
mod server;
pub mod service;
mod session;
mod utils;
pub mod watch;

use std::sync::Arc;

#[cfg(feature = "live")]
use tracing::{error, info};
#[cfg(all(feature = "live", not(feature = "server")))]
use tracing::warn;

pub use crate::blueprint::{Blueprint, BoxFuture, Plan, TaskContext, TaskDef, TaskGraph, TaskResult};
pub use crate::core::{ArcStr, Artifact, ArtifactKind, Variant};
pub use crate::error::*;
pub use crate::executor::{BuildReport, Orchestrator, TaskExecution, TaskStatus};
pub use crate::producer::{Producer, Stamp, compose};
pub use crate::project::{BuildOptions, LintSettings, Project, WatchGlobs, classify};
pub use crate::session::BuildSession;
pub use crate::utils::{as_overhead, init_logging};

use crate::service::Services;
use crate::watch::WatchRule;

/// Settings of a watch session.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Port to serve the output directory on.
    pub serve: Option<u16>,
    /// Command started once the initial build is done, e.g. a test runner.
    pub test_runner: Option<Vec<String>>,
}

/// The standard distribution build of one project.
///
/// Owns the declared task graph and the session every cycle writes into.
pub struct Dist {
    project: Project,
    orchestrator: Orchestrator,
    session: Arc<BuildSession>,
    rules: Vec<WatchRule>,
}

impl Dist {
    pub fn new(project: Project, services: Services, options: &BuildOptions) -> Result<Self, ConfigError> {
        let graph = pipeline::declare(&project, services, options)?;
        let rules = pipeline::watch_rules(&project, &graph, true)?;
        let session = Arc::new(BuildSession::new(project.out_dir.clone(), project.base_name()));
        let orchestrator = Orchestrator::new(graph).with_timeout(options.timeout);

        Ok(Self {
            project,
            orchestrator,
            session,
            rules,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn session(&self) -> &Arc<BuildSession> {
        &self.session
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Produces every artifact in every enabled variant.
    pub async fn build(&self) -> Result<BuildReport, BuildError> {
        self.orchestrator.run(&self.session, [pipeline::BUILD]).await
    }

    /// Runs every configured linter.
    pub async fn lint(&self) -> Result<BuildReport, BuildError> {
        self.orchestrator.run(&self.session, [pipeline::LINT]).await
    }

    /// The task graph as a Mermaid diagram.
    pub fn graph(&self) -> String {
        self.orchestrator.graph().to_string()
    }

    /// The task graph as a Mermaid diagram coloured by the outcome of a cycle.
    pub fn render(&self, report: &BuildReport) -> String {
        report.render_mermaid(self.orchestrator.graph())
    }

    /// Builds and lints once, then rebuilds whatever a file change affects
    /// until the watcher shuts down. Failed cycles are reported and do not
    /// end the session.
    #[cfg(feature = "live")]
    pub async fn watch(&self, options: WatchOptions) -> Result<(), WatchError> {
        info!("running initial build...");
        match self
            .orchestrator
            .run(&self.session, [pipeline::BUILD, pipeline::LINT])
            .await
        {
            Ok(report) => info!(tasks = report.statuses.len(), "initial build completed"),
            Err(err) => error!("{err}"),
        }

        #[cfg(feature = "server")]
        let _server = options.serve.map(|port| {
            let dir = self.project.out_dir.clone();
            tokio::spawn(async move {
                if let Err(err) = server::serve(dir, port).await {
                    error!("HTTP server stopped: {err}");
                }
            })
        });

        #[cfg(not(feature = "server"))]
        if options.serve.is_some() {
            warn!("built without the `server` feature, not serving");
        }

        let _runner = match &options.test_runner {
            Some(command) => Some(self.spawn_runner(command)?),
            None => None,
        };

        let coordinator = watch::Coordinator::new(
            self.orchestrator.clone(),
            self.session.clone(),
            self.rules.clone(),
        )?;

        info!("now watching for changes...");
        watch::watch(coordinator).await
    }

    /// Starts the command in the project root. The process is killed when
    /// the returned handle is dropped.
    #[cfg(feature = "live")]
    fn spawn_runner(&self, command: &[String]) -> Result<tokio::process::Child, WatchError> {
        let Some((program, args)) = command.split_first() else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty test runner command").into());
        };

        info!("starting {program}");
        let child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.project.root)
            .kill_on_drop(true)
            .spawn()?;

        Ok(child)
    }
}
