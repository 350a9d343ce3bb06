mod cli;

use mediabatch::{
    config,
    pipeline::{ArchiveJob, ExtractRequest, FileScope, Orchestrator, PipelineSettings, ShuffleRequest},
    server::{self, auth},
};
use mediabatch_av::{FfmpegTranscoder, ToolRegistry};
use mediabatch_common::paths::StorageRoot;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting mediabatch server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    if config.auth.users.is_empty() {
        tracing::warn!("No users configured; nobody will be able to log in");
    }

    server::start_server(config).await
}

/// Build an orchestrator for jobs over local files, which are left in place.
fn local_orchestrator(config_path: Option<&Path>) -> Result<Orchestrator> {
    let config = config::load_config_or_default(config_path)?;
    let registry = ToolRegistry::discover(&config.tools);
    let transcoder = FfmpegTranscoder::new(&registry, config.jobs.frame_timeout())
        .context("ffmpeg is required to run jobs")?;

    let settings = PipelineSettings {
        delete_inputs: false,
        ..config.jobs.pipeline_settings()
    };
    Ok(Orchestrator::new(
        Arc::new(transcoder),
        StorageRoot::new(config.storage.upload_dir),
        settings,
    ))
}

fn path_reference(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .with_context(|| format!("Path is not valid UTF-8: {:?}", path))
}

/// Write a job's archive to `output`, removing the file if writing fails.
async fn write_archive(job: ArchiveJob, output: &Path) -> Result<()> {
    let file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {:?}", output))?;

    match job.write_to(file).await {
        Ok((summary, mut file)) => {
            use tokio::io::AsyncWriteExt;
            file.flush().await?;
            println!(
                "Wrote {} entries ({} bytes uncompressed) to {}",
                summary.entries,
                summary.bytes,
                output.display()
            );
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(output).await;
            Err(e).with_context(|| format!("Failed to write {:?}", output))
        }
    }
}

async fn shuffle_files(
    config_path: Option<&Path>,
    format: String,
    batch_size: i64,
    output: PathBuf,
    seed: Option<u64>,
    files: Vec<PathBuf>,
) -> Result<()> {
    let orchestrator = local_orchestrator(config_path)?;
    let files = files
        .iter()
        .map(|f| path_reference(f))
        .collect::<Result<Vec<_>>>()?;

    let request = ShuffleRequest {
        files,
        target: format,
        batch_size: batch_size as f64,
    };
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let job = orchestrator
        .shuffle(FileScope::Local, request, &mut rng)
        .await?;
    write_archive(job, &output).await
}

async fn extract_frames(
    config_path: Option<&Path>,
    format: String,
    fps: f64,
    output: PathBuf,
    file: PathBuf,
) -> Result<()> {
    let orchestrator = local_orchestrator(config_path)?;
    let request = ExtractRequest {
        file: path_reference(&file)?,
        target: format,
        fps,
    };

    let job = orchestrator.extract(FileScope::Local, request).await?;
    write_archive(job, &output).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediabatch=trace,mediabatch_av=trace,mediabatch_common=debug,tower_http=debug"
                .to_string()
        } else {
            "mediabatch=debug,mediabatch_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, config_path))
        }
        Commands::Shuffle {
            format,
            batch_size,
            output,
            seed,
            files,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(shuffle_files(
                config_path,
                format,
                batch_size,
                output,
                seed,
                files,
            ))
        }
        Commands::Extract {
            format,
            fps,
            output,
            file,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(extract_frames(config_path, format, fps, output, file))
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediabatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::HashPassword { password } => hash_password(&password),
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Jobs cannot run until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Users: {}", config.auth.users.len());
            println!("  Upload dir: {}", config.storage.upload_dir.display());
            println!("  Max concurrency: {}", config.jobs.max_concurrency);
            println!(
                "  Archive buffer: {} bytes",
                config.jobs.archive_buffer_bytes
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

fn hash_password(password: &str) -> Result<()> {
    let hash = auth::hash_password(password)?;
    println!("{}", hash);
    Ok(())
}
