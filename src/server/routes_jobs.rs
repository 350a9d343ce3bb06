//! SHUFFLE and EXTRACT endpoints.

use crate::pipeline::{ArchiveJob, ExtractRequest, FileScope, ShuffleRequest};
use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use mediabatch_common::OwnerId;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub fn job_routes() -> Router<AppContext> {
    Router::new()
        .route("/shuffle", post(shuffle))
        .route("/extract", post(extract))
}

async fn shuffle(
    State(ctx): State<AppContext>,
    Extension(owner): Extension<OwnerId>,
    Json(request): Json<ShuffleRequest>,
) -> Result<Response, AppError> {
    let mut rng = StdRng::from_entropy();
    let job = ctx
        .orchestrator
        .shuffle(FileScope::Owner(owner), request, &mut rng)
        .await?;
    Ok(archive_response(&ctx, job, "shuffled.zip"))
}

async fn extract(
    State(ctx): State<AppContext>,
    Extension(owner): Extension<OwnerId>,
    Json(request): Json<ExtractRequest>,
) -> Result<Response, AppError> {
    let job = ctx
        .orchestrator
        .extract(FileScope::Owner(owner), request)
        .await?;
    Ok(archive_response(&ctx, job, "frames.zip"))
}

/// Commit a 200 response whose body streams the job's archive.
fn archive_response(ctx: &AppContext, job: ArchiveJob, filename: &str) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let body: Body = job.into_body(ctx.orchestrator.settings().archive_buffer_bytes);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}
