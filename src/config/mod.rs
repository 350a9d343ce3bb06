mod types;

pub use types::*;

use anyhow::{Context, Result};
use mediabatch_common::OwnerId;
use std::collections::HashSet;
use std::path::Path;

/// Smallest accepted archive pipe buffer.
const MIN_ARCHIVE_BUFFER: usize = 1024;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./mediabatch.toml",
        "~/.config/mediabatch/config.toml",
        "/etc/mediabatch/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.jobs.max_concurrency == 0 {
        anyhow::bail!("jobs.max_concurrency must be at least 1");
    }

    if config.jobs.archive_buffer_bytes < MIN_ARCHIVE_BUFFER {
        anyhow::bail!(
            "jobs.archive_buffer_bytes must be at least {} bytes",
            MIN_ARCHIVE_BUFFER
        );
    }

    if config.jobs.frame_timeout_secs == 0 {
        anyhow::bail!("jobs.frame_timeout_secs must be at least 1");
    }

    if config.auth.sweep_interval_secs == 0 {
        anyhow::bail!("auth.sweep_interval_secs must be at least 1");
    }

    let mut seen = HashSet::new();
    for user in &config.auth.users {
        OwnerId::new(user.username.as_str())
            .with_context(|| format!("User '{}' cannot own an upload directory", user.username))?;
        if user.password_hash.is_empty() {
            anyhow::bail!("User '{}' has no password hash", user.username);
        }
        if !seen.insert(user.username.as_str()) {
            anyhow::bail!("User '{}' is configured twice", user.username);
        }
    }

    if config.auth.users.is_empty() {
        tracing::warn!("No users configured; nobody will be able to log in");
    }

    if let Some(ref dir) = config.server.static_dir {
        if !dir.exists() {
            tracing::warn!("Static directory does not exist: {:?}", dir);
        }
    }

    Ok(())
}
