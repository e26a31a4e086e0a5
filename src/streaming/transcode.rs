//! Live remux/transcode delivery.
//!
//! Spawns a supervised ffmpeg process writing fragmented MP4 to stdout and
//! forwards that output as the HTTP body. The stream is forward-only: no
//! ranges, no length. Only a clean transcoder exit or viewer eviction ends
//! the body normally. A crash, a stalled read or the duration cap abort it
//! with an error, so the client never mistakes a cut stream for a whole
//! file. On every path, including the client going away, the process is
//! released.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use homestream_av::{args, SupervisedProcess, TranscodeSettings};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::decision::DeliveryPlan;
use super::viewers::ViewerGuard;
use crate::server::error::ApiError;

/// Number of small reads at the start of a stream, so playback starts fast.
pub const INITIAL_CHUNK_COUNT: usize = 8;
pub const INITIAL_CHUNK_SIZE: usize = 64 * 1024;
pub const STEADY_CHUNK_SIZE: usize = 512 * 1024;

/// Time bounds on one stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    /// Bound on each read from the process.
    pub read_timeout: Duration,
    /// Bound on the whole stream.
    pub max_duration: Duration,
}

/// Spawn the ffmpeg process for a streamed plan.
///
/// Fails before any header is sent, which the caller turns into a 500.
pub fn spawn_for_plan(
    ffmpeg: &Path,
    input: &Path,
    plan: &DeliveryPlan,
    settings: &TranscodeSettings,
    limits: StreamLimits,
) -> Result<SupervisedProcess, ApiError> {
    let argv = match plan {
        DeliveryPlan::Remux => args::remux_args(input),
        DeliveryPlan::Transcode { audio } => args::transcode_args(input, audio, settings),
        DeliveryPlan::DirectServe => {
            return Err(ApiError::Internal(
                "direct-serve plan routed to the transcoder".to_string(),
            ))
        }
    };

    SupervisedProcess::spawn(ffmpeg, &argv, limits.read_timeout).map_err(|e| {
        tracing::error!(path = %input.display(), %plan, "Failed to start transcoder: {}", e);
        ApiError::from(e)
    })
}

/// Build the 200 response streaming `process`'s output.
pub fn stream_response(
    process: SupervisedProcess,
    path: &Path,
    limits: StreamLimits,
    viewer: Option<ViewerGuard>,
) -> Result<Response, ApiError> {
    let cancel = viewer
        .as_ref()
        .map(ViewerGuard::cancellation)
        .unwrap_or_default();

    let body = ProcessBody {
        process,
        buf: vec![0u8; STEADY_CHUNK_SIZE],
        reads: 0,
        sent: 0,
        deadline: Instant::now() + limits.max_duration,
        cancel,
        _viewer: viewer,
        path: path.to_path_buf(),
        finished: false,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::ACCEPT_RANGES, "none")
        .body(body.into_body())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Read size for the `reads`-th read of a stream.
pub fn chunk_size_for_read(reads: usize) -> usize {
    if reads < INITIAL_CHUNK_COUNT {
        INITIAL_CHUNK_SIZE
    } else {
        STEADY_CHUNK_SIZE
    }
}

enum Step {
    Chunk(Bytes),
    End,
    Fail(std::io::Error),
}

struct ProcessBody {
    process: SupervisedProcess,
    buf: Vec<u8>,
    reads: usize,
    sent: u64,
    deadline: Instant,
    cancel: CancellationToken,
    // Held so the viewer stays registered for the life of the body.
    _viewer: Option<ViewerGuard>,
    path: PathBuf,
    finished: bool,
}

impl ProcessBody {
    async fn next_step(&mut self) -> Step {
        let size = chunk_size_for_read(self.reads);
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!(path = %self.path.display(), "Stream evicted");
                return Step::End;
            }
            _ = tokio::time::sleep_until(self.deadline) => None,
            read = self.process.read_chunk(&mut self.buf[..size]) => Some(read),
        };

        let Some(read) = read else {
            tracing::warn!(
                path = %self.path.display(),
                bytes = self.sent,
                "Stream reached maximum duration"
            );
            self.process.release().await;
            return Step::Fail(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "stream exceeded its maximum duration",
            ));
        };

        match read {
            Ok(0) => match self.process.finish().await {
                Ok(()) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        bytes = self.sent,
                        "Transcoder output complete"
                    );
                    Step::End
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        bytes = self.sent,
                        "Transcoder failed mid-stream: {}",
                        e
                    );
                    Step::Fail(std::io::Error::other(e.to_string()))
                }
            },
            Ok(n) => {
                self.reads += 1;
                self.sent += n as u64;
                Step::Chunk(Bytes::copy_from_slice(&self.buf[..n]))
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    bytes = self.sent,
                    "Transcoder stream aborted: {}",
                    e
                );
                Step::Fail(std::io::Error::other(e.to_string()))
            }
        }
    }

    fn into_body(self) -> Body {
        let stream = futures::stream::unfold(self, |mut body| async move {
            if body.finished {
                return None;
            }
            match body.next_step().await {
                Step::Chunk(bytes) => Some((Ok(bytes), body)),
                Step::End => {
                    body.process.release().await;
                    None
                }
                Step::Fail(e) => {
                    body.process.release().await;
                    body.finished = true;
                    Some((Err(e), body))
                }
            }
        });
        Body::from_stream(stream)
    }
}
