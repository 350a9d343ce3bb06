use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediabatch")]
#[command(
    author,
    version,
    about = "Shuffle images into task folders or extract video frames as zip archives"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Shuffle images into task folders and write the archive locally
    Shuffle {
        /// Target MIME type (image/jpeg, image/png or image/webp)
        #[arg(short, long)]
        format: String,

        /// Files per task folder
        #[arg(short, long)]
        batch_size: i64,

        /// Zip file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Seed for a reproducible shuffle
        #[arg(long)]
        seed: Option<u64>,

        /// Images to shuffle
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Extract video frames and write the archive locally
    Extract {
        /// Target MIME type (image/jpeg, image/png or image/webp)
        #[arg(short, long)]
        format: String,

        /// Frames sampled per second of video
        #[arg(long)]
        fps: f64,

        /// Zip file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Video to sample
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,

    /// Generate a bcrypt password hash for a configured user
    HashPassword {
        /// Password to hash
        password: String,
    },
}
