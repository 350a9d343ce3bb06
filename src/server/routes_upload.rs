//! Multipart upload into the caller's storage namespace.

use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use mediabatch_common::{Error, OwnerId};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub fn upload_routes() -> Router<AppContext> {
    Router::new().route("/upload", post(upload))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// References of stored files, usable in job requests.
    pub stored: Vec<String>,
    /// Parts ignored because they are neither images nor videos.
    pub skipped: Vec<String>,
    pub bytes: u64,
}

/// Whether a declared part content type may be stored.
fn is_media_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.starts_with("image/") || ct.starts_with("video/"))
}

/// Store every image or video part under the field name it was sent with.
async fn upload(
    State(ctx): State<AppContext>,
    Extension(owner): Extension<OwnerId>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let storage = ctx.orchestrator.storage();
    let mut response = UploadResponse {
        stored: Vec::new(),
        skipped: Vec::new(),
        bytes: 0,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("malformed upload: {}", e.body_text())))?
    {
        let reference = field.name().unwrap_or_default().to_string();
        if !is_media_type(field.content_type()) {
            tracing::debug!(
                owner = %owner,
                field = %reference,
                content_type = field.content_type().unwrap_or("none"),
                "Skipping non-media upload part"
            );
            response.skipped.push(reference);
            continue;
        }

        let path = storage.resolve(&owner, &reference)?;
        let written = store_field(field, &path).await?;
        tracing::debug!(owner = %owner, file = %reference, bytes = written, "Stored upload");

        response.bytes += written;
        response.stored.push(reference);
    }

    tracing::info!(
        owner = %owner,
        stored = response.stored.len(),
        skipped = response.skipped.len(),
        bytes = response.bytes,
        "Upload complete"
    );
    Ok((StatusCode::CREATED, Json(response)))
}

/// Stream one part to disk. A partially written file is removed on failure.
async fn store_field(mut field: Field<'_>, path: &Path) -> Result<u64, Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    let result: Result<(), Error> = async {
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| Error::validation(format!("upload interrupted: {}", e.body_text())))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        drop(file);
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %remove_err, "Failed to remove partial upload");
        }
        return Err(e);
    }

    Ok(written)
}
