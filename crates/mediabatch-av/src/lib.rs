//! # mediabatch-av
//!
//! Still-image transcoding and video frame extraction for mediabatch.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to
//!   ffmpeg, honouring a configured override.
//! - **Command building** ([`ToolCommand`]) -- builder that spawns an
//!   external tool as a scoped child process with piped output.
//! - **Frame splitting** ([`FrameSplitter`]) -- cut a concatenated
//!   `image2pipe` byte stream back into whole encoded images.
//! - **Transcoding** ([`Transcoder`], [`FfmpegTranscoder`]) -- a lazy,
//!   ordered sequence of encoded images per invocation, with the child
//!   process killed when the sequence is dropped.

pub mod command;
pub mod frames;
pub mod tools;
pub mod transcode;

// ---- Re-exports for convenience ----

pub use command::ToolCommand;
pub use frames::{FrameSplitter, SplitError};
pub use tools::{ToolInfo, ToolRegistry, ToolsConfig};
pub use transcode::{FfmpegTranscoder, FrameSource, TranscodeMode, Transcoder};
