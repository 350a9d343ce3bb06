//! EXTRACT: sample a video into numbered still images.

use std::time::Instant;

use mediabatch_av::TranscodeMode;
use mediabatch_common::{Error, ImageFormat, JobId, MediaKind, Result};
use serde::Deserialize;
use tracing::Instrument;

use super::job::{ArchiveJob, JobContent};
use super::{expect_kind, FileScope, JobKind, Orchestrator};

/// Parameters of an EXTRACT job.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequest {
    /// Reference to the video, resolved within the job's scope.
    pub file: String,
    /// Target MIME type.
    #[serde(rename = "mimetype")]
    pub target: String,
    /// Frames sampled per second of video.
    pub fps: f64,
}

impl Orchestrator {
    /// Validate an EXTRACT request, start the decoder and wait for its first
    /// frame.
    ///
    /// A source that fails before producing anything is reported here as an
    /// error, with inputs already cleaned up. Later failures can only
    /// truncate the archive stream.
    pub async fn extract(&self, scope: FileScope, request: ExtractRequest) -> Result<ArchiveJob> {
        let job_id = JobId::new();
        let span = tracing::info_span!(
            "job",
            job_id = %job_id,
            kind = %JobKind::Extract,
            owner = %scope
        );

        self.extract_in_job(job_id, scope, request)
            .instrument(span)
            .await
    }

    async fn extract_in_job(
        &self,
        job_id: JobId,
        scope: FileScope,
        request: ExtractRequest,
    ) -> Result<ArchiveJob> {
        let started = Instant::now();
        let format: ImageFormat = request.target.parse()?;
        let fps = request.fps;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Error::validation(format!(
                "frame rate must be a positive number, got {fps}"
            )));
        }

        let (path, sniffed) = self.inspect(&scope, &request.file).await?;
        let sniffed = expect_kind(&request.file, sniffed, MediaKind::Video)?;
        let temp_files = self.temp_files([path.clone()]);

        tracing::info!(
            file = %request.file,
            source_type = sniffed.mime,
            fps,
            target = %format,
            "Starting frame extraction"
        );

        let mut frames = match self
            .transcoder
            .transcode(&path, format, TranscodeMode::Video { fps })
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                temp_files.cleanup().await;
                return Err(e);
            }
        };

        let first = match frames.next_frame().await {
            Ok(first) => first,
            Err(e) => {
                drop(frames);
                temp_files.cleanup().await;
                return Err(e);
            }
        };
        if first.is_none() {
            tracing::info!("Source produced no frames");
        }

        Ok(ArchiveJob::new(
            job_id,
            JobKind::Extract,
            tracing::Span::current(),
            JobContent::Extract {
                format,
                first,
                frames,
            },
            temp_files,
            started,
        ))
    }
}
