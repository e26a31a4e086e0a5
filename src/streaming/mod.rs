//! Media delivery.
//!
//! Every playback request is answered in one of three ways, chosen by the
//! [`decision`] engine:
//!
//! - **DirectServe**: original bytes with HTTP range support ([`range`])
//! - **Remux**: container rewrite to fragmented MP4 via ffmpeg ([`transcode`])
//! - **Transcode**: live H.264/AAC re-encode via ffmpeg ([`transcode`])
//!
//! Remux and transcode streams are registered with the [`viewers`]
//! registry, which caps how many run at once.

pub mod decision;
pub mod range;
pub mod transcode;
pub mod viewers;

pub use decision::{decide, plan_delivery, DecisionPolicy, DeliveryPlan};
pub use range::{parse_range_header, serve_file, ByteRange, Chunking, THUMBNAIL_CHUNK_SIZE};
pub use transcode::{spawn_for_plan, stream_response, StreamLimits};
pub use viewers::{ViewerGuard, ViewerRegistry};

use std::io;

/// Whether an I/O error means the client went away.
///
/// These end a response silently; they are not server failures.
pub fn is_peer_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Walk an error's source chain looking for a peer disconnect.
pub fn is_disconnect_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_peer_disconnect(io_err) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Determine content type from a lowercase file extension.
pub fn content_type_for(ext: Option<&str>) -> &'static str {
    match ext.unwrap_or_default() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" | "m2ts" => "video/mp2t",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_kinds() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::NotConnected,
        ] {
            assert!(is_peer_disconnect(&io::Error::new(kind, "peer")));
        }
        assert!(!is_peer_disconnect(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied"
        )));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection error")]
    struct Wrapped(#[source] io::Error);

    #[test]
    fn disconnect_found_in_source_chain() {
        let err = Wrapped(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(is_disconnect_error(&err));

        let err = Wrapped(io::Error::new(io::ErrorKind::Other, "disk"));
        assert!(!is_disconnect_error(&err));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Some("mp4")), "video/mp4");
        assert_eq!(content_type_for(Some("mkv")), "video/x-matroska");
        assert_eq!(content_type_for(Some("mp3")), "audio/mpeg");
        assert_eq!(content_type_for(Some("unknown")), "application/octet-stream");
        assert_eq!(content_type_for(None), "application/octet-stream");
    }
}
