use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::core::{ArcStr, Artifact, ArtifactKind, Variant};
use crate::service::LintViolation;

/// State shared by every build cycle of one orchestrator invocation.
///
/// Holds the output directory, the latest artifact of every
/// (identity, variant) pair, and the set of tasks that have succeeded at
/// least once. Nothing here is global, so independent sessions can run side
/// by side.
#[derive(Debug)]
pub struct BuildSession {
    out_dir: Utf8PathBuf,
    base_name: String,
    cycle: AtomicU64,
    artifacts: Mutex<HashMap<(ArtifactKind, Variant), Artifact>>,
    succeeded: Mutex<HashSet<ArcStr>>,
    violations: Mutex<Vec<LintViolation>>,
}

impl BuildSession {
    /// `base_name` is the file stem shared by every output file.
    pub fn new(out_dir: impl Into<Utf8PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            base_name: base_name.into(),
            cycle: AtomicU64::new(0),
            artifacts: Mutex::default(),
            succeeded: Mutex::default(),
            violations: Mutex::default(),
        }
    }

    pub fn out_dir(&self) -> &Utf8Path {
        &self.out_dir
    }

    /// Number of the most recently started cycle, 0 before the first one.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Where an artifact of this identity and variant is written to.
    pub fn destination(&self, kind: ArtifactKind, variant: Variant) -> Option<Utf8PathBuf> {
        kind.file_name(&self.base_name, variant)
            .map(|name| self.out_dir.join(name))
    }

    pub fn artifact(&self, kind: ArtifactKind, variant: Variant) -> Option<Artifact> {
        lock(&self.artifacts).get(&(kind, variant)).cloned()
    }

    /// Writes the artifact to its destination, then publishes it to the
    /// in-memory store. On failure neither happens.
    pub async fn commit(&self, artifact: Artifact) -> std::io::Result<Option<Utf8PathBuf>> {
        let path = self.destination(artifact.kind, artifact.variant);

        if let Some(path) = &path {
            tokio::fs::create_dir_all(&self.out_dir).await?;
            write_atomic(path, artifact.content.as_bytes()).await?;
            info!(path = %path, bytes = artifact.len(), "wrote {}", artifact.kind);
        }

        lock(&self.artifacts).insert((artifact.kind, artifact.variant), artifact);
        Ok(path)
    }

    pub(crate) fn mark_succeeded(&self, task: &ArcStr) {
        lock(&self.succeeded).insert(task.clone());
    }

    /// Tasks that have succeeded in some cycle of this session.
    pub fn succeeded(&self) -> HashSet<ArcStr> {
        lock(&self.succeeded).clone()
    }

    pub fn report_violations(&self, violations: impl IntoIterator<Item = LintViolation>) {
        lock(&self.violations).extend(violations);
    }

    pub(crate) fn take_violations(&self) -> Vec<LintViolation> {
        std::mem::take(&mut *lock(&self.violations))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes to a hidden sibling first and renames it into place, so readers
/// never observe a half-written file.
async fn write_atomic(path: &Utf8Path, content: &[u8]) -> std::io::Result<()> {
    let name = path.file_name().unwrap_or("artifact");
    let temp = path.with_file_name(format!(".{name}.tmp"));

    if let Err(err) = tokio::fs::write(&temp, content).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(err);
    }

    tokio::fs::rename(&temp, path).await
}
