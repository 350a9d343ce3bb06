//! Deletion of the uploaded files a job consumed.
//!
//! A [`TempFileSet`] is built once a job passes validation and is consumed
//! by [`TempFileSet::cleanup`], so each path gets exactly one deletion
//! attempt. A set dropped without being cleaned up (a panicking or aborted
//! job task) performs the same deletion synchronously from `Drop`.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Outcome of one cleanup pass. Failures are logged, never returned as
/// errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    /// Paths that were already gone.
    pub missing: usize,
    pub failed: usize,
}

/// The temporary input files owned by one job.
#[derive(Debug, Default)]
pub struct TempFileSet {
    paths: Vec<PathBuf>,
}

impl TempFileSet {
    /// Track `paths`, ignoring repeats.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let paths = paths
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        Self { paths }
    }

    /// A set that deletes nothing, for jobs that must leave inputs alone.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Delete every tracked path, logging and continuing past failures.
    pub async fn cleanup(mut self) -> CleanupReport {
        let paths = std::mem::take(&mut self.paths);
        let mut report = CleanupReport::default();

        for path in &paths {
            let result = tokio::fs::remove_file(path).await;
            record(&mut report, path, result);
        }

        if !paths.is_empty() {
            tracing::debug!(
                removed = report.removed,
                missing = report.missing,
                failed = report.failed,
                "Cleaned up job inputs"
            );
        }
        report
    }
}

fn record(report: &mut CleanupReport, path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => report.removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Input already removed");
            report.missing += 1;
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove job input");
            report.failed += 1;
        }
    }
}

impl Drop for TempFileSet {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }
        tracing::warn!(
            count = self.paths.len(),
            "Job ended without cleanup, removing inputs now"
        );
        let mut report = CleanupReport::default();
        for path in self.paths.drain(..) {
            let result = std::fs::remove_file(&path);
            record(&mut report, &path, result);
        }
    }
}
