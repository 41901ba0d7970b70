use std::process::Stdio;

use async_trait::async_trait;
use camino::Utf8Path;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{BundleConfig, Bundler, Minifier};
use crate::error::{Service, TransformationError};

/// Bundles the entry module with the `esbuild` executable.
///
/// **Note:** requires the `esbuild` binary to be available in the system
/// PATH, or configured through [`EsbuildBundler::program`].
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: String,
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self {
            program: String::from("esbuild"),
        }
    }
}

impl EsbuildBundler {
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn bundle(&self, entry: &Utf8Path, config: &BundleConfig) -> Result<String, TransformationError> {
        let output = Command::new(&self.program)
            .arg(entry.as_str())
            .arg("--bundle")
            .arg("--format=iife")
            .arg(format!("--global-name={}", config.global_name))
            .arg("--charset=utf8")
            .arg("--legal-comments=none")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| TransformationError::new(Service::Bundler, err))?;

        finish(Service::Bundler, output)
    }
}

/// Minifies script with `esbuild`, reading the source from stdin.
#[derive(Debug, Clone)]
pub struct EsbuildMinifier {
    program: String,
}

impl Default for EsbuildMinifier {
    fn default() -> Self {
        Self {
            program: String::from("esbuild"),
        }
    }
}

impl EsbuildMinifier {
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Minifier for EsbuildMinifier {
    async fn minify(&self, content: &str) -> Result<String, TransformationError> {
        let error = |err: std::io::Error| TransformationError::new(Service::Minifier, err);

        let mut child = Command::new(&self.program)
            .arg("--minify")
            .arg("--loader=js")
            .arg("--charset=utf8")
            .arg("--legal-comments=none")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await.map_err(error)?;
            // Dropping closes the pipe, esbuild waits for EOF.
        }

        let output = child.wait_with_output().await.map_err(error)?;
        finish(Service::Minifier, output)
    }
}

fn finish(service: Service, output: std::process::Output) -> Result<String, TransformationError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TransformationError::new(
            service,
            anyhow::anyhow!("esbuild exited with {}:\n{}", output.status, stderr.trim()),
        ));
    }

    String::from_utf8(output.stdout).map_err(|err| TransformationError::new(service, err))
}
