use std::fmt;

use thiserror::Error;

use crate::core::{ArcStr, ArtifactKind, Variant};
use crate::executor::BuildReport;

/// Errors raised while declaring or resolving the task graph. These are
/// reported before any build starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is already declared")]
    DuplicateTask(ArcStr),

    #[error("Task '{task}' cannot depend on '{dependency}', this would create a cycle")]
    CyclicDependency { task: ArcStr, dependency: ArcStr },

    #[error("Task '{0}' is not declared")]
    UnknownTask(ArcStr),
}

/// The external tool a [`TransformationError`] originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Bundler,
    StyleCompiler,
    Minifier,
    CssToCode,
    Linter,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Service::Bundler => "bundler",
            Service::StyleCompiler => "style compiler",
            Service::Minifier => "minifier",
            Service::CssToCode => "css-to-code converter",
            Service::Linter => "linter",
        })
    }
}

/// A transformation service rejected its input or could not be run at all.
#[derive(Debug, Error)]
#[error("The {service} failed:\n{cause}")]
pub struct TransformationError {
    pub service: Service,
    pub cause: anyhow::Error,
}

impl TransformationError {
    pub fn new(service: Service, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            service,
            cause: cause.into(),
        }
    }
}

/// Failure of a single task action. The task is marked as failed and every
/// task depending on it is skipped for the rest of the cycle.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Transformation(#[from] TransformationError),

    #[error("Cannot compose a {js} bundle with {css} style code")]
    VariantMismatch { js: Variant, css: Variant },

    #[error("Cannot compose a bundle from cycle {js} with style code from cycle {css}")]
    CycleMismatch { js: u64, css: u64 },

    #[error("Expected a '{expected}' artifact, got '{found}'")]
    UnexpectedKind {
        expected: ArtifactKind,
        found: ArtifactKind,
    },

    #[error("Input '{kind}' ({variant}) has not been produced yet")]
    MissingInput { kind: ArtifactKind, variant: Variant },

    #[error("Found {0} lint violation(s)")]
    Lint(usize),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't write artifact.\n{0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a whole build cycle.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(
        "Build failed. Failed: [{}]. Skipped: [{}].",
        .failed.join(", "),
        .skipped.join(", ")
    )]
    Failed {
        failed: Vec<ArcStr>,
        skipped: Vec<ArcStr>,
        report: Box<BuildReport>,
    },

    #[error(
        "Build timed out. Abandoned: [{}]. Skipped: [{}].",
        .abandoned.join(", "),
        .skipped.join(", ")
    )]
    TimedOut {
        abandoned: Vec<ArcStr>,
        skipped: Vec<ArcStr>,
        report: Box<BuildReport>,
    },
}

impl BuildError {
    /// The per-task report of the cycle, if the cycle got to run at all.
    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            BuildError::Graph(_) => None,
            BuildError::Failed { report, .. } | BuildError::TimedOut { report, .. } => Some(report),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read package manifest '{0}'.\n{1}")]
    Read(camino::Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse package manifest.\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Package name '{0}' cannot be turned into a global name")]
    InvalidName(String),

    #[error("Package manifest has no \"tsumiki.aliases\", two global aliases are required")]
    MissingAliases,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Couldn't compile watch pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[cfg(feature = "live")]
    #[error(transparent)]
    Notify(#[from] notify::Error),
}
