use crate::config::Config;
use crate::pipeline::Orchestrator;
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use mediabatch_av::{FfmpegTranscoder, ToolRegistry, Transcoder};
use mediabatch_common::paths::StorageRoot;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

pub mod auth;
pub mod error;
pub mod routes_jobs;
pub mod routes_upload;
pub mod sessions;

pub use sessions::TokenStore;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub orchestrator: Orchestrator,
    pub tokens: TokenStore,
}

impl AppContext {
    pub fn new(config: Config, transcoder: Arc<dyn Transcoder>) -> Self {
        let orchestrator = Orchestrator::new(
            transcoder,
            StorageRoot::new(config.storage.upload_dir.clone()),
            config.jobs.pipeline_settings(),
        );
        let tokens = TokenStore::new(Duration::from_secs(
            config.auth.session_timeout_hours.saturating_mul(3600),
        ));

        Self {
            config: Arc::new(config),
            orchestrator,
            tokens,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let static_dir = ctx.config.server.static_dir.clone();

    let mut app = Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api_routes(&ctx))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // SPA fallback: serves index.html for any route that doesn't match a file
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(ServeFile::new(index_path)),
            );
        }
    }

    app
}

fn api_routes(ctx: &AppContext) -> Router<AppContext> {
    let public_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout));

    let upload_limit =
        usize::try_from(ctx.config.storage.max_upload_bytes).unwrap_or(usize::MAX);

    let protected_routes = Router::new()
        .route("/check", get(auth::check))
        .merge(routes_upload::upload_routes().layer(DefaultBodyLimit::max(upload_limit)))
        .merge(routes_jobs::job_routes())
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let registry = ToolRegistry::discover(&config.tools);
    let transcoder = FfmpegTranscoder::new(&registry, config.jobs.frame_timeout())
        .context("ffmpeg is required to run jobs")?;

    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {:?}", config.storage.upload_dir))?;

    let sweep_interval = config.auth.sweep_interval_secs;
    let ctx = AppContext::new(config, Arc::new(transcoder));
    let sweeper = sessions::start_sweep_task(ctx.tokens.clone(), sweep_interval);

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
