use crate::catalog::{is_safe_path, Catalog, LibraryCatalog};
use crate::config::Config;
use crate::streaming::{is_disconnect_error, DecisionPolicy, StreamLimits, ViewerRegistry};
use crate::thumbnails::ThumbnailCache;
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Extension, Json, Router};
use homestream_av::{
    FfprobeProber, OrphanReaper, Prober, ReapReport, ReaperPolicy, Toolchain, TranscodeSettings,
};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod routes_media;
pub mod routes_thumbnail;

use error::ApiError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Files the server is allowed to deliver
    pub catalog: Arc<dyn Catalog>,
    pub prober: Arc<dyn Prober>,
    pub tools: Toolchain,
    pub policy: Arc<DecisionPolicy>,
    /// Active remux/transcode streams
    pub viewers: ViewerRegistry,
    pub thumbnails: Arc<ThumbnailCache>,
    pub transcode: TranscodeSettings,
    pub limits: StreamLimits,
}

impl AppContext {
    /// Build a context around an existing catalog, toolchain and prober.
    pub fn new(
        config: Config,
        catalog: Arc<dyn Catalog>,
        tools: Toolchain,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let streaming = &config.streaming;
        let policy = Arc::new(DecisionPolicy::from_config(streaming));
        let transcode = TranscodeSettings {
            video_preset: streaming.video_preset.clone(),
            video_crf: streaming.video_crf,
            audio_bitrate: streaming.audio_bitrate.clone(),
        };
        let limits = StreamLimits {
            read_timeout: Duration::from_secs(streaming.read_timeout_secs),
            max_duration: Duration::from_secs(streaming.max_duration_secs),
        };
        let thumbnails = Arc::new(ThumbnailCache::new(
            &config.thumbnails,
            tools.ffmpeg.clone(),
            prober.clone(),
        ));

        Self {
            viewers: ViewerRegistry::new(config.server.max_viewers),
            config: Arc::new(config),
            catalog,
            prober,
            tools,
            policy,
            thumbnails,
            transcode,
            limits,
        }
    }

    /// Resolve `filepath` to a deliverable file: absolute, free of `..`,
    /// in the catalog, and present on disk.
    pub async fn authorize(&self, filepath: &Path) -> Result<PathBuf, ApiError> {
        if !is_safe_path(filepath) || !self.catalog.contains(filepath) {
            tracing::debug!(path = %filepath.display(), "Rejected path");
            return Err(ApiError::Forbidden(filepath.to_path_buf()));
        }

        match tokio::fs::metadata(filepath).await {
            Ok(meta) if meta.is_file() => Ok(filepath.to_path_buf()),
            Ok(_) => Err(ApiError::NotFound(filepath.to_path_buf())),
            Err(e) => Err(ApiError::from_io(filepath, e)),
        }
    }
}

/// Peer address of the connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/media", get(routes_media::get_media))
        .route("/thumbnail", get(routes_thumbnail::get_thumbnail))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "viewers": ctx.viewers.list(),
        "max_viewers": ctx.viewers.capacity(),
    }))
}

/// Reaper configured for this toolchain, or `None` when disabled.
pub fn orphan_reaper(config: &Config, tools: &Toolchain) -> Option<OrphanReaper> {
    config.reaper.enabled.then(|| {
        OrphanReaper::new(ReaperPolicy {
            process_name: tools.ffmpeg_process_name(),
            max_age: Duration::from_secs(config.reaper.max_age_secs),
        })
    })
}

/// Run one reaper sweep off the async runtime.
pub async fn run_reaper(reaper: OrphanReaper) -> ReapReport {
    match tokio::task::spawn_blocking(move || reaper.sweep()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Reaper task failed: {}", e);
            ReapReport::default()
        }
    }
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let tools = Toolchain::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    for info in tools.check() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let reaper = orphan_reaper(&config, &tools);
    if let Some(reaper) = reaper.clone() {
        let report = run_reaper(reaper).await;
        if !report.killed.is_empty() {
            tracing::warn!("Reaped {} orphaned transcoders at startup", report.killed.len());
        }
    }

    let catalog = Arc::new(LibraryCatalog::from_config(&config));
    let scan = catalog.clone();
    tokio::task::spawn_blocking(move || scan.rescan())
        .await
        .context("Library scan failed")?;

    let prober: Arc<dyn Prober> = Arc::new(
        FfprobeProber::new(tools.ffprobe.clone())
            .with_timeout(Duration::from_secs(config.streaming.probe_timeout_secs)),
    );
    let ctx = AppContext::new(config, catalog, tools, prober);

    tracing::info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    serve(listener, ctx, cancel).await;

    if let Some(reaper) = reaper {
        run_reaper(reaper).await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Accept connections on `listener` until `cancel` fires, then end every
/// active stream.
pub async fn serve(listener: TcpListener, ctx: AppContext, cancel: CancellationToken) {
    let app = create_router(ctx.clone());

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(stream, addr, app.clone()));
                    }
                    Err(e) => {
                        tracing::debug!("Accept error: {e}");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!(viewers = ctx.viewers.len(), "Stopping active streams");
    ctx.viewers.cancel_all();
}

/// Serve one TCP connection through hyper/Axum.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, app: Router) {
    let io = TokioIo::new(stream);
    let app = app.layer(Extension(ClientAddr(addr)));
    let hyper_service = TowerToHyperService::new(app.into_service());

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, hyper_service)
        .await
    {
        // Clients routinely drop media connections mid-body (seeking,
        // closing the tab).
        if e.is_incomplete_message() || e.is_canceled() || is_disconnect_error(&e) {
            tracing::trace!(client = %addr, "Client disconnected: {e}");
        } else {
            tracing::debug!(client = %addr, "Hyper connection error: {e}");
        }
    }
}

/// Wait for SIGINT or SIGTERM, then fire `cancel`.
pub async fn shutdown_signal(cancel: CancellationToken) {
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
        _ = cancel.cancelled() => {},
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn context(files: Vec<PathBuf>) -> AppContext {
        let tools = Toolchain {
            ffmpeg: PathBuf::from("nonexistent_ffmpeg_xyz"),
            ffprobe: PathBuf::from("nonexistent_ffprobe_xyz"),
        };
        let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::new(tools.ffprobe.clone()));
        AppContext::new(
            Config::default(),
            Arc::new(StaticCatalog::new(files)),
            tools,
            prober,
        )
    }

    #[tokio::test]
    async fn health_reports_viewers() {
        let app = create_router(context(vec![]));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["max_viewers"], 4);
        assert_eq!(json["viewers"], json!([]));
    }

    #[tokio::test]
    async fn authorize_checks_path_catalog_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.mp4");
        let missing = dir.path().join("gone.mp4");
        std::fs::write(&present, b"data").unwrap();
        let ctx = context(vec![present.clone(), missing.clone()]);

        assert_eq!(ctx.authorize(&present).await.unwrap(), present);
        assert_matches!(ctx.authorize(&missing).await, Err(ApiError::NotFound(_)));
        assert_matches!(
            ctx.authorize(&dir.path().join("other.mp4")).await,
            Err(ApiError::Forbidden(_))
        );
        assert_matches!(
            ctx.authorize(Path::new("relative/a.mp4")).await,
            Err(ApiError::Forbidden(_))
        );
        assert_matches!(
            ctx.authorize(&dir.path().join("x/../a.mp4")).await,
            Err(ApiError::Forbidden(_))
        );
    }

    #[test]
    fn reaper_follows_config() {
        let tools = Toolchain {
            ffmpeg: PathBuf::from("/usr/bin/ffmpeg"),
            ffprobe: PathBuf::from("/usr/bin/ffprobe"),
        };
        let mut config = Config::default();
        assert!(orphan_reaper(&config, &tools).is_some());

        config.reaper.enabled = false;
        assert!(orphan_reaper(&config, &tools).is_none());
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, context(vec![]), cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
