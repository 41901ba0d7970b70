use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tokio::process::Command;

use super::{LintViolation, Linter};
use crate::error::{Service, TransformationError};

/// `path:line:column: message`, the format shared by most linters' compact
/// reporters.
static VIOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<file>[^:\s][^:]*):(?P<line>\d+):(?P<column>\d+):?\s*(?P<message>.+)$")
        .expect("Error compiling lint output pattern")
});

/// Runs an external linter executable over a list of files.
///
/// A zero exit status means a clean run. Otherwise every output line in the
/// compact `path:line:column: message` format becomes a violation; if none
/// parse, the raw output is reported as a single violation.
#[derive(Debug, Clone)]
pub struct CommandLinter {
    program: String,
    args: Vec<String>,
    current_dir: Option<Utf8PathBuf>,
}

impl CommandLinter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Linter for CommandLinter {
    async fn lint(&self, paths: &[Utf8PathBuf]) -> Result<Vec<LintViolation>, TransformationError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(paths.iter().map(|path| path.as_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|err| TransformationError::new(Service::Linter, err))?;

        if output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut violations = parse_violations(&stdout);
        violations.extend(parse_violations(&stderr));

        if violations.is_empty() {
            let raw = format!("{}\n{}", stdout.trim(), stderr.trim());
            violations.push(LintViolation {
                file: None,
                line: 0,
                column: 0,
                message: format!("{} exited with {}: {}", self.program, output.status, raw.trim()),
            });
        }

        Ok(violations)
    }
}

pub(crate) fn parse_violations(output: &str) -> Vec<LintViolation> {
    output
        .lines()
        .filter_map(|line| VIOLATION.captures(line))
        .filter_map(|caps| {
            Some(LintViolation {
                file: Some(Utf8Path::new(caps.name("file")?.as_str()).to_path_buf()),
                line: caps.name("line")?.as_str().parse().ok()?,
                column: caps.name("column")?.as_str().parse().ok()?,
                message: caps.name("message")?.as_str().trim().to_string(),
            })
        })
        .collect()
}
