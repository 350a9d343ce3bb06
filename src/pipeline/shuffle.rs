//! SHUFFLE: shuffle images into task folders, re-encoding where needed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use mediabatch_av::Transcoder;
use mediabatch_common::paths::{base_name, replace_extension};
use mediabatch_common::{Error, ImageFormat, JobId, MediaKind, Result};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::archive::EntrySource;
use super::job::{ArchiveJob, CompletedUnit, JobContent};
use super::partition::{partition, TaskAssignment};
use super::{expect_kind, FileScope, JobKind, Orchestrator};

/// Parameters of a SHUFFLE job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleRequest {
    /// File references, resolved within the job's scope.
    pub files: Vec<String>,
    /// Target MIME type.
    #[serde(rename = "mimetype")]
    pub target: String,
    /// Files per task. Any JSON number is accepted here; only positive
    /// integral values pass validation, so `10.0` means 10.
    pub batch_size: f64,
}

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn checked_batch_size(value: f64) -> Result<usize> {
    if value.fract() == 0.0 && (1.0..=MAX_SAFE_INTEGER).contains(&value) {
        Ok(value as usize)
    } else {
        Err(Error::validation(format!(
            "batch size must be a positive integer, got {value}"
        )))
    }
}

/// A unit that could not be processed.
#[derive(Debug)]
pub struct UnitFailure {
    pub file: String,
    pub error: Error,
}

/// A validated shuffle input.
#[derive(Debug)]
struct ShuffleInput {
    reference: String,
    path: PathBuf,
    /// Sniffed MIME type.
    mime: &'static str,
    base_name: String,
}

impl ShuffleInput {
    fn passthrough(&self, format: ImageFormat) -> bool {
        format.matches_mime(self.mime)
    }

    fn entry_name(&self, format: ImageFormat) -> String {
        if self.passthrough(format) {
            self.base_name.clone()
        } else {
            replace_extension(&self.base_name, format.extension())
        }
    }
}

impl Orchestrator {
    /// Validate a SHUFFLE request and process every unit.
    ///
    /// All units settle before this returns. If any failed, inputs are
    /// cleaned up and [`Error::Job`] is returned; nothing has been sent.
    pub async fn shuffle<R>(
        &self,
        scope: FileScope,
        request: ShuffleRequest,
        rng: &mut R,
    ) -> Result<ArchiveJob>
    where
        R: Rng + Send + ?Sized,
    {
        let job_id = JobId::new();
        let span = tracing::info_span!(
            "job",
            job_id = %job_id,
            kind = %JobKind::Shuffle,
            owner = %scope
        );

        self.shuffle_in_job(job_id, scope, request, rng)
            .instrument(span)
            .await
    }

    async fn shuffle_in_job<R>(
        &self,
        job_id: JobId,
        scope: FileScope,
        request: ShuffleRequest,
        rng: &mut R,
    ) -> Result<ArchiveJob>
    where
        R: Rng + Send + ?Sized,
    {
        let started = Instant::now();
        let format: ImageFormat = request.target.parse()?;
        let batch_size = checked_batch_size(request.batch_size)?;

        let inputs = self.validate_images(&scope, &request.files).await?;
        let temp_files = self.temp_files(inputs.iter().map(|input| input.path.clone()));

        let assignments =
            partition(inputs, batch_size, &mut *rng, |input| input.entry_name(format))?;
        let total = assignments.len();
        tracing::info!(
            files = total,
            batch_size,
            target = %format,
            "Dispatching shuffle units"
        );

        let (completed, failures) = self.run_units(format, assignments).await;

        if let Some(first) = failures.first() {
            for failure in &failures {
                tracing::warn!(file = %failure.file, error = %failure.error, "Unit failed");
            }
            let message = format!(
                "{} of {} files could not be processed (first: {}: {})",
                failures.len(),
                total,
                first.file,
                first.error
            );
            temp_files.cleanup().await;
            return Err(Error::Job(message));
        }

        let transcoded = completed.iter().filter(|unit| unit.transcoded).count();
        tracing::info!(
            entries = completed.len(),
            transcoded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All shuffle units settled"
        );

        Ok(ArchiveJob::new(
            job_id,
            JobKind::Shuffle,
            tracing::Span::current(),
            JobContent::Shuffle(completed),
            temp_files,
            started,
        ))
    }

    /// Check every reference: unique, present in scope, sniffed as an image.
    async fn validate_images(
        &self,
        scope: &FileScope,
        files: &[String],
    ) -> Result<Vec<ShuffleInput>> {
        if files.is_empty() {
            return Err(Error::validation("no files given"));
        }

        let mut seen = HashSet::new();
        let mut inputs = Vec::with_capacity(files.len());

        for reference in files {
            let (path, sniffed) = self.inspect(scope, reference).await?;
            if !seen.insert(path.clone()) {
                return Err(Error::validation(format!("file listed twice: {reference}")));
            }

            let sniffed = expect_kind(reference, sniffed, MediaKind::Image)?;
            let name = base_name(reference.trim_end_matches(['/', '\\']));
            if name.is_empty() {
                return Err(Error::validation(format!("no file name in {reference:?}")));
            }

            inputs.push(ShuffleInput {
                reference: reference.clone(),
                path,
                mime: sniffed.mime,
                base_name: name.to_string(),
            });
        }

        Ok(inputs)
    }

    /// Run all units with at most `max_concurrency` in flight. Returns the
    /// successes in completion order, and the failures.
    async fn run_units(
        &self,
        format: ImageFormat,
        assignments: Vec<TaskAssignment<ShuffleInput>>,
    ) -> (Vec<CompletedUnit>, Vec<UnitFailure>) {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut units = JoinSet::new();

        for assignment in assignments {
            let semaphore = Arc::clone(&semaphore);
            let transcoder = Arc::clone(&self.transcoder);
            units.spawn(
                async move {
                    let file = assignment.item.reference.clone();
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return Err(UnitFailure {
                                file,
                                error: Error::internal("worker pool closed"),
                            })
                        }
                    };
                    run_unit(transcoder.as_ref(), format, assignment).await
                }
                .in_current_span(),
            );
        }

        let mut completed = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(unit)) => completed.push(unit),
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => failures.push(UnitFailure {
                    file: "<unknown>".to_string(),
                    error: Error::internal(format!("unit task failed: {e}")),
                }),
            }
        }
        (completed, failures)
    }
}

/// Pass one file through unchanged or re-encode it.
async fn run_unit(
    transcoder: &dyn Transcoder,
    format: ImageFormat,
    assignment: TaskAssignment<ShuffleInput>,
) -> std::result::Result<CompletedUnit, UnitFailure> {
    let archive_path = assignment.archive_path();
    let input = assignment.item;

    if input.passthrough(format) {
        // The file is read again when its entry is written; make sure it
        // has not vanished since validation.
        match tokio::fs::metadata(&input.path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(failure(input, Error::validation("no longer a regular file"))),
            Err(e) => return Err(failure(input, e.into())),
        }
        tracing::debug!(entry = %archive_path, "Passing through");
        return Ok(CompletedUnit {
            archive_path,
            source: EntrySource::File(input.path),
            transcoded: false,
        });
    }

    match transcoder.transcode_image(&input.path, format).await {
        Ok(data) => {
            tracing::debug!(entry = %archive_path, bytes = data.len(), "Re-encoded");
            Ok(CompletedUnit {
                archive_path,
                source: EntrySource::Bytes(data),
                transcoded: true,
            })
        }
        Err(error) => Err(failure(input, error)),
    }
}

fn failure(input: ShuffleInput, error: Error) -> UnitFailure {
    UnitFailure {
        file: input.reference,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(mime: &'static str, name: &str) -> ShuffleInput {
        ShuffleInput {
            reference: format!("dir/{name}"),
            path: PathBuf::from(format!("/u/dir/{name}")),
            mime,
            base_name: name.to_string(),
        }
    }

    #[test]
    fn test_entry_name_keeps_passthrough_names() {
        let png = input("image/png", "a.png");
        assert!(png.passthrough(ImageFormat::Png));
        assert_eq!(png.entry_name(ImageFormat::Png), "a.png");
    }

    #[test]
    fn test_entry_name_swaps_extension_on_reencode() {
        let jpeg = input("image/jpeg", "b.JPG");
        assert!(!jpeg.passthrough(ImageFormat::Webp));
        assert_eq!(jpeg.entry_name(ImageFormat::Webp), "b.webp");

        // A mislabelled file follows its content, not its name.
        let disguised = input("image/png", "c.jpeg");
        assert!(disguised.passthrough(ImageFormat::Png));
        assert_eq!(disguised.entry_name(ImageFormat::Png), "c.jpeg");
        assert_eq!(disguised.entry_name(ImageFormat::Jpeg), "c.jpeg");
    }

    #[test]
    fn test_request_deserializes_wire_names() {
        let request: ShuffleRequest = serde_json::from_str(
            r#"{"files": ["a.png", "b/c.png"], "mimetype": "image/png", "batchSize": 10}"#,
        )
        .unwrap();
        assert_eq!(request.files.len(), 2);
        assert_eq!(request.target, "image/png");
        assert_eq!(request.batch_size, 10.0);
    }

    #[test]
    fn test_integral_float_batch_size_is_accepted() {
        let request: ShuffleRequest = serde_json::from_str(
            r#"{"files": ["a.png"], "mimetype": "image/png", "batchSize": 10.0}"#,
        )
        .unwrap();
        assert_eq!(checked_batch_size(request.batch_size).unwrap(), 10);
        assert_eq!(checked_batch_size(1.0).unwrap(), 1);
    }

    #[test]
    fn test_non_integral_batch_size_is_rejected() {
        for value in [0.0, -3.0, 2.5, f64::NAN, f64::INFINITY, 1e300] {
            let err = checked_batch_size(value).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{value}");
        }
    }
}
