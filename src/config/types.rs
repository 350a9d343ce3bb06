use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use mediabatch_av::ToolsConfig;

use crate::pipeline::PipelineSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the web UI; served with an `index.html` fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    6395
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Token lifetime in hours, renewed on every authenticated request (default: 24)
    #[serde(default = "default_session_timeout")]
    pub session_timeout_hours: u64,

    /// How often expired tokens are swept from memory (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Accounts allowed to log in
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

fn default_session_timeout() -> u64 {
    24
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_hours: default_session_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// Login name; also the name of the user's upload directory
    pub username: String,

    /// Bcrypt hash of the password (generate with `mediabatch hash-password`)
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root of the per-user upload directories
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Largest accepted upload request body (default: 4 GiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Re-encode units running at once (default: 10)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Bytes buffered between the archive writer and the response (default: 64 KiB)
    #[serde(default = "default_archive_buffer")]
    pub archive_buffer_bytes: usize,

    /// Seconds ffmpeg may stay silent before a transcode is abandoned (default: 300)
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    10
}
fn default_archive_buffer() -> usize {
    64 * 1024
}
fn default_frame_timeout() -> u64 {
    300
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            archive_buffer_bytes: default_archive_buffer(),
            frame_timeout_secs: default_frame_timeout(),
        }
    }
}

impl JobsConfig {
    /// Pipeline settings for server jobs, which consume their inputs.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_concurrency: self.max_concurrency,
            archive_buffer_bytes: self.archive_buffer_bytes,
            delete_inputs: true,
        }
    }

    pub fn frame_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.frame_timeout_secs)
    }
}
