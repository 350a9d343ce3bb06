//! Job orchestration: validation, bounded re-encoding and archive streaming.
//!
//! A job runs in two phases. [`Orchestrator::shuffle`] and
//! [`Orchestrator::extract`] validate the request and do the work that must
//! happen before a response is committed, returning an [`ArchiveJob`]. The
//! job is then written either to any async sink ([`ArchiveJob::write_to`])
//! or to a streamed HTTP body ([`ArchiveJob::into_body`]). Inputs are
//! cleaned up exactly once on every path after validation succeeds.

pub mod archive;
pub mod cleanup;
mod extract;
mod job;
pub mod partition;
mod shuffle;

pub use archive::{ArchiveSummary, ArchiveWriter, EntrySource};
pub use cleanup::{CleanupReport, TempFileSet};
pub use extract::ExtractRequest;
pub use job::ArchiveJob;
pub use partition::{partition, TaskAssignment};
pub use shuffle::{ShuffleRequest, UnitFailure};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use mediabatch_av::Transcoder;
use mediabatch_common::media::sniff_path;
use mediabatch_common::paths::StorageRoot;
use mediabatch_common::{Error, MediaKind, OwnerId, Result, SniffedType};

/// Tunables for job execution.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Re-encode units in flight at once.
    pub max_concurrency: usize,
    /// Capacity of the pipe between archive writer and response body.
    pub archive_buffer_bytes: usize,
    /// Delete job inputs once the job is over.
    pub delete_inputs: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            archive_buffer_bytes: 64 * 1024,
            delete_inputs: true,
        }
    }
}

/// Which files a job may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileScope {
    /// Relative references inside one owner's upload directory.
    Owner(OwnerId),
    /// Plain filesystem paths, for local command-line jobs.
    Local,
}

impl fmt::Display for FileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileScope::Owner(owner) => write!(f, "{owner}"),
            FileScope::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Shuffle,
    Extract,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Shuffle => f.write_str("shuffle"),
            JobKind::Extract => f.write_str("extract"),
        }
    }
}

/// Runs SHUFFLE and EXTRACT jobs against a [`Transcoder`].
#[derive(Clone)]
pub struct Orchestrator {
    transcoder: Arc<dyn Transcoder>,
    storage: StorageRoot,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        storage: StorageRoot,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transcoder,
            storage,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn storage(&self) -> &StorageRoot {
        &self.storage
    }

    /// Resolve a file reference within `scope`.
    fn resolve(&self, scope: &FileScope, reference: &str) -> Result<PathBuf> {
        match scope {
            FileScope::Owner(owner) => self.storage.resolve(owner, reference),
            FileScope::Local if reference.is_empty() => {
                Err(Error::validation("empty file reference"))
            }
            FileScope::Local => Ok(PathBuf::from(reference)),
        }
    }

    /// Resolve a reference, require a regular file and sniff its content.
    async fn inspect(
        &self,
        scope: &FileScope,
        reference: &str,
    ) -> Result<(PathBuf, Option<SniffedType>)> {
        let path = self.resolve(scope, reference)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(Error::validation(format!("not a regular file: {reference}")));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("file", reference));
            }
            Err(e) => return Err(e.into()),
        }

        let sniffed = sniff_blocking(path.clone()).await?;
        Ok((path, sniffed))
    }

    fn temp_files(&self, paths: impl IntoIterator<Item = PathBuf>) -> TempFileSet {
        if self.settings.delete_inputs {
            TempFileSet::new(paths)
        } else {
            TempFileSet::empty()
        }
    }
}

async fn sniff_blocking(path: PathBuf) -> Result<Option<SniffedType>> {
    tokio::task::spawn_blocking(move || sniff_path(&path))
        .await
        .map_err(|e| Error::internal(format!("sniff task failed: {e}")))?
        .map_err(Error::from)
}

/// Require a sniffed kind, naming the file in the error.
fn expect_kind(reference: &str, sniffed: Option<SniffedType>, kind: MediaKind) -> Result<SniffedType> {
    match sniffed {
        Some(s) if s.kind == kind => Ok(s),
        Some(s) => Err(Error::validation(format!(
            "{reference} is {}, expected {kind}",
            s.mime
        ))),
        None => Err(Error::validation(format!(
            "{reference} is not a recognised {kind} file"
        ))),
    }
}
