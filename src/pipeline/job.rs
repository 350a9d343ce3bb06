//! A validated job ready to be written as an archive.

use std::time::Instant;

use axum::body::Body;
use bytes::Bytes;
use mediabatch_av::FrameSource;
use mediabatch_common::{Error, ImageFormat, JobId, Result};
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::archive::{response_body, ArchiveSummary, ArchiveWriter, EntrySource};
use super::cleanup::TempFileSet;
use super::JobKind;

/// A settled SHUFFLE unit.
#[derive(Debug)]
pub(crate) struct CompletedUnit {
    pub archive_path: String,
    pub source: EntrySource,
    pub transcoded: bool,
}

pub(crate) enum JobContent {
    /// Entries in completion order.
    Shuffle(Vec<CompletedUnit>),
    /// A running decoder and the frame already pulled from it.
    Extract {
        format: ImageFormat,
        first: Option<Bytes>,
        frames: Box<dyn FrameSource>,
    },
}

/// A job that passed validation and is ready to stream.
///
/// Dropping it without writing still deletes its inputs.
pub struct ArchiveJob {
    id: JobId,
    kind: JobKind,
    span: Span,
    content: JobContent,
    temp_files: TempFileSet,
    started: Instant,
}

impl ArchiveJob {
    pub(crate) fn new(
        id: JobId,
        kind: JobKind,
        span: Span,
        content: JobContent,
        temp_files: TempFileSet,
        started: Instant,
    ) -> Self {
        Self {
            id,
            kind,
            span,
            content,
            temp_files,
            started,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Write the archive into `sink`, then clean up.
    pub async fn write_to<W>(self, sink: W) -> Result<(ArchiveSummary, W)>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let ArchiveJob {
            span,
            content,
            temp_files,
            started,
            ..
        } = self;

        async move {
            let result = write_content(content, ArchiveWriter::new(sink)).await;
            temp_files.cleanup().await;
            log_outcome(result.as_ref().map(|(summary, _)| summary), started);
            result
        }
        .instrument(span)
        .await
    }

    /// Stream the archive as a response body.
    ///
    /// The archive is written by a background task into a pipe of
    /// `buffer` bytes. Dropping the body cancels that task, which stops any
    /// running decoder; inputs are cleaned up in every case.
    pub fn into_body(self, buffer: usize) -> Body {
        let ArchiveJob {
            span,
            content,
            temp_files,
            started,
            ..
        } = self;

        let (reader, pipe) = tokio::io::duplex(buffer);
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        tokio::spawn(
            async move {
                tracing::info!("Sending archive");
                let result = tokio::select! {
                    written = write_content(content, ArchiveWriter::new(pipe)) => {
                        written.map(|(summary, _pipe)| summary)
                    }
                    _ = cancel.cancelled() => {
                        Err(Error::Job("client disconnected".to_string()))
                    }
                };

                temp_files.cleanup().await;
                log_outcome(result.as_ref(), started);
                let _ = outcome_tx.send(result.map(|_| ()).map_err(|e| e.to_string()));
            }
            .instrument(span),
        );

        response_body(reader, outcome_rx, guard)
    }
}

async fn write_content<W>(
    content: JobContent,
    mut writer: ArchiveWriter<W>,
) -> Result<(ArchiveSummary, W)>
where
    W: AsyncWrite + Unpin + Send,
{
    match content {
        JobContent::Shuffle(units) => {
            let total = units.len();
            for (i, unit) in units.into_iter().enumerate() {
                writer.append(&unit.archive_path, unit.source).await?;
                tracing::debug!(entry = %unit.archive_path, "Zipped entry {} of {}", i + 1, total);
            }
        }
        JobContent::Extract {
            format,
            first,
            mut frames,
        } => {
            let mut next = first;
            let mut index = 0usize;
            while let Some(frame) = next {
                index += 1;
                let name = format!("img{index}.{}", format.extension());
                writer.append(&name, EntrySource::Bytes(frame)).await?;
                next = frames.next_frame().await?;
            }
            tracing::debug!(frames = index, "Extraction finished");
        }
    }

    writer.finish().await
}

fn log_outcome(result: std::result::Result<&ArchiveSummary, &Error>, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(summary) => tracing::info!(
            entries = summary.entries,
            bytes = summary.bytes,
            elapsed_ms,
            "Archive complete"
        ),
        Err(e) => tracing::warn!(error = %e, elapsed_ms, "Archive aborted"),
    }
}
