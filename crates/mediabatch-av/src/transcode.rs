//! The [`Transcoder`] trait and its ffmpeg-backed implementation.
//!
//! A transcode invocation yields a lazy, ordered sequence of encoded images
//! through a [`FrameSource`]. For a still image the sequence has one element;
//! for a video it has one element per sampled frame. Dropping the source
//! before it is exhausted stops the underlying decoder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mediabatch_common::{Error, ImageFormat, Result};

use crate::command::{ToolCommand, ToolProcess};
use crate::frames::FrameSplitter;
use crate::tools::ToolRegistry;

/// Size of a single pipe read.
const READ_CHUNK: usize = 64 * 1024;

/// How the source is interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TranscodeMode {
    /// Decode one still image and re-encode it.
    Image,
    /// Sample the first video stream at `fps` frames per second.
    Video { fps: f64 },
}

/// A pull-based sequence of encoded images.
#[async_trait]
pub trait FrameSource: Send {
    /// The next encoded image, or `None` once the source is exhausted.
    ///
    /// After an error the source is finished and yields `None`.
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Produces encoded images from a media file.
///
/// Implemented by [`FfmpegTranscoder`]; tests substitute their own.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Start decoding `source` and re-encoding it as `format`.
    async fn transcode(
        &self,
        source: &Path,
        format: ImageFormat,
        mode: TranscodeMode,
    ) -> Result<Box<dyn FrameSource>>;

    /// Re-encode a still image, returning the whole encoded result.
    async fn transcode_image(&self, source: &Path, format: ImageFormat) -> Result<Bytes> {
        let mut frames = self.transcode(source, format, TranscodeMode::Image).await?;
        let first = frames
            .next_frame()
            .await?
            .ok_or_else(|| Error::decode(source, "no image was produced"))?;
        // Surface exit failures reported after the image was written.
        while frames.next_frame().await?.is_some() {}
        Ok(first)
    }
}

/// [`Transcoder`] that runs one ffmpeg process per invocation and reads the
/// encoded images from its `image2pipe` output.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    frame_timeout: Duration,
}

impl FfmpegTranscoder {
    /// Build a transcoder from the discovered ffmpeg.
    ///
    /// `frame_timeout` bounds how long ffmpeg may stay silent before the
    /// invocation is abandoned.
    pub fn new(registry: &ToolRegistry, frame_timeout: Duration) -> Result<Self> {
        let ffmpeg = registry.require("ffmpeg")?.to_path_buf();
        Ok(Self::with_path(ffmpeg, frame_timeout))
    }

    pub fn with_path(ffmpeg: PathBuf, frame_timeout: Duration) -> Self {
        Self {
            ffmpeg,
            frame_timeout,
        }
    }

    /// The ffmpeg invocation for one transcode.
    pub fn command(&self, source: &Path, format: ImageFormat, mode: TranscodeMode) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.timeout(self.frame_timeout);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error"]);
        cmd.arg("-i").arg(source.to_string_lossy());
        cmd.args(["-map", "0:v:0"]);

        match mode {
            TranscodeMode::Image => {
                cmd.args(["-frames:v", "1"]);
            }
            TranscodeMode::Video { fps } => {
                cmd.args(["-vf".to_string(), format!("fps={fps}")]);
            }
        }

        cmd.args(["-c:v", format.ffmpeg_codec()]);
        if format == ImageFormat::Jpeg {
            // Full-range chroma keeps mjpeg from rejecting limited-range input.
            cmd.args(["-pix_fmt", "yuvj420p", "-q:v", "2"]);
        }
        cmd.args(["-an", "-sn", "-f", "image2pipe", "pipe:1"]);
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        format: ImageFormat,
        mode: TranscodeMode,
    ) -> Result<Box<dyn FrameSource>> {
        if let TranscodeMode::Video { fps } = mode {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(Error::validation(format!(
                    "frame rate must be a positive number, got {fps}"
                )));
            }
        }

        let process = self.command(source, format, mode).spawn()?;
        tracing::debug!(
            source = %source.display(),
            %format,
            ?mode,
            "Started ffmpeg transcode"
        );

        Ok(Box::new(FfmpegFrameStream {
            source: source.to_path_buf(),
            process: Some(process),
            splitter: FrameSplitter::new(format),
            buf: vec![0u8; READ_CHUNK],
            frames: 0,
        }))
    }
}

/// Frames read from a running ffmpeg process.
struct FfmpegFrameStream {
    source: PathBuf,
    /// `None` once the process exited or the stream failed.
    process: Option<ToolProcess>,
    splitter: FrameSplitter,
    buf: Vec<u8>,
    frames: u64,
}

impl FfmpegFrameStream {
    async fn pull(&mut self) -> Result<Option<Bytes>> {
        loop {
            let frame = self
                .splitter
                .next_frame()
                .map_err(|e| Error::decode(&self.source, e.to_string()))?;
            if let Some(frame) = frame {
                self.frames += 1;
                return Ok(Some(frame));
            }

            let Some(process) = self.process.as_mut() else {
                return Ok(None);
            };

            let n = process.read(&mut self.buf).await?;
            if n > 0 {
                self.splitter.push(&self.buf[..n]);
                continue;
            }

            let (status, stderr) = process.wait().await?;
            self.process = None;

            if !status.success() {
                let detail = if stderr.is_empty() {
                    format!("ffmpeg exited with {status}")
                } else {
                    format!("ffmpeg exited with {status}: {stderr}")
                };
                return Err(Error::decode(&self.source, detail));
            }
            if !self.splitter.is_empty() {
                return Err(Error::decode(
                    &self.source,
                    format!(
                        "output ended inside an image ({} trailing bytes)",
                        self.splitter.remaining()
                    ),
                ));
            }

            tracing::debug!(
                source = %self.source.display(),
                frames = self.frames,
                "ffmpeg transcode finished"
            );
            return Ok(None);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameStream {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let result = self.pull().await;
        if result.is_err() {
            // Dropping the process kills it; nothing more will be read.
            self.process = None;
            self.splitter = FrameSplitter::new(self.splitter.format());
        }
        result
    }
}

impl Drop for FfmpegFrameStream {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            tracing::debug!(
                source = %self.source.display(),
                frames = self.frames,
                "Frame stream abandoned, stopping {}",
                process.name()
            );
            process.kill();
        }
    }
}
