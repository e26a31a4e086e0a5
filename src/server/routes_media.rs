//! `GET /media`: playback of one catalog file.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Response,
    Extension,
};
use serde::Deserialize;
use std::path::PathBuf;

use super::error::ApiError;
use super::{AppContext, ClientAddr};
use crate::catalog::extension_of;
use crate::streaming::{
    content_type_for, plan_delivery, serve_file, spawn_for_plan, stream_response, Chunking,
    DeliveryPlan,
};

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub filepath: PathBuf,
}

pub async fn get_media(
    State(ctx): State<AppContext>,
    client: Option<Extension<ClientAddr>>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = ctx.authorize(&query.filepath).await?;
    let plan = plan_delivery(&path, &ctx.policy, ctx.prober.as_ref()).await;
    tracing::info!(path = %path.display(), %plan, "Delivery planned");

    match plan {
        DeliveryPlan::DirectServe => {
            let range = match headers.get(header::RANGE).map(|v| v.to_str()) {
                Some(Ok(range)) => Some(range),
                None => None,
                Some(Err(_)) => {
                    let size = tokio::fs::metadata(&path)
                        .await
                        .map_err(|e| ApiError::from_io(&path, e))?
                        .len();
                    return Err(ApiError::RangeNotSatisfiable { size });
                }
            };
            let ext = extension_of(&path);
            serve_file(&path, range, content_type_for(ext.as_deref()), Chunking::Adaptive).await
        }
        DeliveryPlan::Transcode { .. } if !ctx.config.streaming.transcode_enabled => {
            tracing::info!(path = %path.display(), "Transcoding disabled, refusing");
            Err(ApiError::Unsupported(path))
        }
        plan => {
            // Spawn before registering so a failed start evicts nobody.
            let process =
                spawn_for_plan(&ctx.tools.ffmpeg, &path, &plan, &ctx.transcode, ctx.limits)?;
            let viewer = ctx
                .viewers
                .register(client.map(|Extension(ClientAddr(addr))| addr), &path);
            tracing::debug!(
                path = %path.display(),
                viewer = viewer.id(),
                pid = process.pid(),
                "Stream started"
            );
            stream_response(process, &path, ctx.limits, Some(viewer))
        }
    }
}
