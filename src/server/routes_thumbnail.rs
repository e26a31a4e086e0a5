//! `GET /thumbnail`: cached preview image for one catalog file.
//!
//! Access checks fail with their usual status. Past that point the route
//! never errors: a thumbnail that is being generated elsewhere, or that
//! could not be produced, is answered with an SVG placeholder.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::error::ApiError;
use super::AppContext;
use crate::catalog::extension_of;
use crate::streaming::{serve_file, Chunking, THUMBNAIL_CHUNK_SIZE};
use crate::thumbnails::{synth, ThumbnailOutcome};

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    pub filepath: PathBuf,
}

pub async fn get_thumbnail(
    State(ctx): State<AppContext>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, ApiError> {
    let path = ctx.authorize(&query.filepath).await?;

    match ctx.thumbnails.get_or_generate(&path).await {
        Ok(ThumbnailOutcome::Ready(artifact)) => {
            match serve_file(
                &artifact,
                None,
                "image/jpeg",
                Chunking::Fixed(THUMBNAIL_CHUNK_SIZE),
            )
            .await
            {
                Ok(response) => Ok(response),
                // Cleared between generation and open.
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Thumbnail vanished: {}", e);
                    Ok(placeholder(&path))
                }
            }
        }
        Ok(ThumbnailOutcome::Busy) => Ok(placeholder(&path)),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Thumbnail generation failed: {}", e);
            Ok(placeholder(&path))
        }
    }
}

fn placeholder(path: &Path) -> Response {
    let label = extension_of(path).unwrap_or_default();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        synth::placeholder_svg(&label),
    )
        .into_response()
}
