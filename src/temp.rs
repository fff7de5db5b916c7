use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context as _;

use crate::error::PipelineResult;

/// Registry of ephemeral directories owned by one pipeline run.
///
/// Every scratch path is registered at creation time; a single
/// [`dispose`](Self::dispose) call releases everything. Disposal is
/// idempotent, tolerates paths that were never created, and never fails
/// the run (failures are logged). Dropping the registry disposes as well,
/// so early returns from the coordinator cannot leak scratch space.
#[derive(Debug, Default)]
pub struct TempRegistry {
    paths: Mutex<Vec<PathBuf>>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a unique scratch directory under the system temp dir and
    /// register it for disposal.
    pub fn create_dir(&self, label: &str) -> PipelineResult<PathBuf> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!(
            "stitchrun_{label}_{}_{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create scratch directory '{}'", path.display()))?;
        self.register(path.clone());
        Ok(path)
    }

    pub fn register(&self, path: PathBuf) {
        self.paths
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(path);
    }

    /// Snapshot of currently registered paths (diagnostics only).
    pub fn registered(&self) -> Vec<PathBuf> {
        self.paths
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Remove every registered path. Draining the registry makes a second
    /// call a no-op.
    pub fn dispose(&self) {
        let drained: Vec<PathBuf> = {
            let mut guard = self.paths.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for path in drained {
            remove_best_effort(&path);
        }
    }
}

fn remove_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove scratch directory"
        );
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}
