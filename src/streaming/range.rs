//! Direct file delivery with HTTP range requests.
//!
//! Serves a file's original bytes, either whole (200) or as one byte range
//! (206). The body is streamed in chunks sized from the requested length.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use futures::TryStreamExt;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::is_peer_disconnect;
use crate::server::error::ApiError;

const KIB: usize = 1024;
const MIB: u64 = 1024 * 1024;

/// Chunk size for small files served whole, such as thumbnails.
pub const THUMBNAIL_CHUNK_SIZE: usize = 64 * KIB;

/// A satisfiable, inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a single-range `Range` header against a file of `size` bytes.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500- (to end)
/// - bytes=-500 (last 500 bytes)
///
/// Returns `None` when the range is malformed, lists several ranges, or
/// cannot be satisfied; the caller answers 416.
pub fn parse_range_header(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }

    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        // bytes=-500
        (true, false) => {
            let suffix: u64 = end.parse().ok()?;
            if suffix == 0 || size == 0 {
                return None;
            }
            Some(ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            })
        }
        // bytes=500-
        (false, true) => {
            let start: u64 = start.parse().ok()?;
            if start >= size {
                return None;
            }
            Some(ByteRange {
                start,
                end: size - 1,
            })
        }
        // bytes=0-499
        (false, false) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            if start >= size || start > end {
                return None;
            }
            Some(ByteRange {
                start,
                end: end.min(size - 1),
            })
        }
        // bytes=-
        (true, true) => None,
    }
}

/// Read size for a body of `len` bytes: large transfers use large chunks.
pub fn chunk_size_for(len: u64) -> usize {
    if len > 100 * MIB {
        2 * MIB as usize
    } else if len > 10 * MIB {
        MIB as usize
    } else {
        256 * KIB
    }
}

/// How body chunks are sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunking {
    /// Sized from the body length with [`chunk_size_for`].
    Adaptive,
    /// Always this many bytes.
    Fixed(usize),
}

impl Chunking {
    fn size_for(self, len: u64) -> usize {
        match self {
            Chunking::Adaptive => chunk_size_for(len),
            Chunking::Fixed(size) => size,
        }
    }
}

/// Serve `path` whole or, when `range_header` is present, as one range.
pub async fn serve_file(
    path: &Path,
    range_header: Option<&str>,
    content_type: &str,
    chunking: Chunking,
) -> Result<Response, ApiError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| ApiError::from_io(path, e))?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound(path.to_path_buf()));
    }
    let size = metadata.len();

    let mut file = File::open(path)
        .await
        .map_err(|e| ApiError::from_io(path, e))?;

    match range_header {
        Some(value) => {
            let range = parse_range_header(value, size)
                .ok_or(ApiError::RangeNotSatisfiable { size })?;
            let length = range.length();

            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| ApiError::from_io(path, e))?;

            tracing::debug!(
                path = %path.display(),
                start = range.start,
                end = range.end,
                size,
                "Serving byte range"
            );

            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, size),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .body(file_body(file, length, chunking.size_for(length), path))
                .map_err(|e| ApiError::Internal(e.to_string()))
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, size.to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .body(file_body(file, size, chunking.size_for(size), path))
            .map_err(|e| ApiError::Internal(e.to_string())),
    }
}

fn file_body(file: File, length: u64, chunk_size: usize, path: &Path) -> Body {
    let path = path.to_path_buf();
    let stream = ReaderStream::with_capacity(file.take(length), chunk_size).inspect_err(
        move |e| {
            if is_peer_disconnect(e) {
                tracing::trace!(path = %path.display(), "Client disconnected: {}", e);
            } else {
                tracing::warn!(path = %path.display(), "File read failed mid-body: {}", e);
            }
        },
    );
    Body::from_stream(stream)
}
