use async_trait::async_trait;
use camino::Utf8Path;

use super::{Minifier, StyleCompiler};
use crate::error::{Service, TransformationError};

/// Compiles Sass/SCSS stylesheets with the `grass` crate.
///
/// Compilation is CPU bound, so it is moved off the control thread.
#[derive(Debug, Clone, Default)]
pub struct GrassCompiler {
    load_paths: Vec<camino::Utf8PathBuf>,
}

impl GrassCompiler {
    /// Additional directories searched by `@use` and `@import`.
    pub fn load_path(mut self, path: impl Into<camino::Utf8PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }
}

#[async_trait]
impl StyleCompiler for GrassCompiler {
    async fn compile(&self, source: &Utf8Path) -> Result<String, TransformationError> {
        let source = source.to_owned();
        let load_paths = self.load_paths.clone();

        tokio::task::spawn_blocking(move || {
            let options = grass::Options::default().load_paths(&load_paths);
            grass::from_path(&source, &options)
                .map_err(|err| TransformationError::new(Service::StyleCompiler, anyhow::anyhow!("{err}")))
        })
        .await
        .map_err(|err| TransformationError::new(Service::StyleCompiler, err))?
    }
}

/// Minifies plain CSS by running it through `grass` in compressed mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrassMinifier;

#[async_trait]
impl Minifier for GrassMinifier {
    async fn minify(&self, content: &str) -> Result<String, TransformationError> {
        let content = content.to_owned();

        tokio::task::spawn_blocking(move || {
            let options = grass::Options::default().style(grass::OutputStyle::Compressed);
            grass::from_string(content, &options)
                .map_err(|err| TransformationError::new(Service::Minifier, anyhow::anyhow!("{err}")))
        })
        .await
        .map_err(|err| TransformationError::new(Service::Minifier, err))?
    }
}
