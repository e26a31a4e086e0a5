//! Media file probing.
//!
//! The decision engine only needs a handful of facts per file (first video
//! codec, first audio codec, audio track languages, duration). They are
//! obtained from `ffprobe` through the [`Prober`] trait so callers can swap
//! in other implementations.

mod ffprobe;
mod types;

pub use ffprobe::{parse_ffprobe_json, FfprobeProber, DEFAULT_PROBE_TIMEOUT};
pub use types::*;

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;

/// A source of codec facts for media files.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Probe a media file at the given path.
    async fn probe(&self, path: &Path) -> Result<ProbeResult>;
}

/// Probe `path`, folding every failure into [`ProbeOutcome::Unknown`].
///
/// A failed probe is retried once, except when the tool is missing
/// altogether.
pub async fn probe_outcome(prober: &dyn Prober, path: &Path) -> ProbeOutcome {
    for attempt in 1..=2 {
        match prober.probe(path).await {
            Ok(result) => return ProbeOutcome::Known(result),
            Err(Error::ToolNotFound { tool }) => {
                tracing::warn!(tool = %tool, "Probe tool unavailable, treating codecs as unknown");
                return ProbeOutcome::Unknown;
            }
            Err(e) => {
                tracing::debug!(
                    prober = prober.name(),
                    path = %path.display(),
                    attempt,
                    "Probe failed: {}",
                    e
                );
            }
        }
    }
    ProbeOutcome::Unknown
}
