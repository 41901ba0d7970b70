//! Opaque transformation services.
//!
//! The orchestrator never bundles, compiles, minifies or lints anything by
//! itself. It calls into the traits defined here and treats every call as a
//! single asynchronous step that either produces content or fails with a
//! [`TransformationError`].

mod esbuild;
mod inject;
mod lint;
mod sass;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransformationError;
use crate::project::Project;

pub use self::esbuild::{EsbuildBundler, EsbuildMinifier};
pub use self::inject::StyleInjector;
pub use self::lint::CommandLinter;
pub use self::sass::{GrassCompiler, GrassMinifier};

/// Settings forwarded to the bundler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConfig {
    /// Name the bundle binds its exports to in the global scope.
    pub global_name: String,
}

#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, entry: &Utf8Path, config: &BundleConfig) -> Result<String, TransformationError>;
}

#[async_trait]
pub trait StyleCompiler: Send + Sync {
    async fn compile(&self, source: &Utf8Path) -> Result<String, TransformationError>;
}

#[async_trait]
pub trait Minifier: Send + Sync {
    async fn minify(&self, content: &str) -> Result<String, TransformationError>;
}

/// Turns a stylesheet into script that injects it when evaluated.
pub trait CssToCode: Send + Sync {
    fn css_to_code(&self, css: &str) -> String;
}

#[async_trait]
pub trait Linter: Send + Sync {
    async fn lint(&self, paths: &[Utf8PathBuf]) -> Result<Vec<LintViolation>, TransformationError>;
}

/// A single complaint of a linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintViolation {
    pub file: Option<Utf8PathBuf>,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl fmt::Display for LintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}: {}", self.line, self.column, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The full set of services a pipeline is wired with.
#[derive(Clone)]
pub struct Services {
    pub bundler: Arc<dyn Bundler>,
    pub style: Arc<dyn StyleCompiler>,
    pub js_minifier: Arc<dyn Minifier>,
    pub css_minifier: Arc<dyn Minifier>,
    pub css_to_code: Arc<dyn CssToCode>,
    pub js_linter: Option<Arc<dyn Linter>>,
    pub style_linter: Option<Arc<dyn Linter>>,
    /// Lints the type declarations shipped next to the bundle.
    pub types_linter: Option<Arc<dyn Linter>>,
}

impl Services {
    /// `esbuild` for scripts, `grass` for styles, and the linter commands
    /// configured in the project.
    pub fn standard(project: &Project) -> Self {
        let linter = |command: &[String]| -> Option<Arc<dyn Linter>> {
            let (program, args) = command.split_first()?;
            Some(Arc::new(
                CommandLinter::new(program.as_str())
                    .args(args.iter().cloned())
                    .current_dir(project.root.clone()),
            ))
        };

        Self {
            bundler: Arc::new(EsbuildBundler::default()),
            style: Arc::new(GrassCompiler::default()),
            js_minifier: Arc::new(EsbuildMinifier::default()),
            css_minifier: Arc::new(GrassMinifier),
            css_to_code: Arc::new(StyleInjector),
            js_linter: linter(&project.lint.js_command),
            style_linter: linter(&project.lint.style_command),
            types_linter: linter(&project.lint.types_command),
        }
    }
}
