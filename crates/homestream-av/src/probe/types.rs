//! Probe result types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Codec facts extracted from a media file.
///
/// Every field the probe could not determine is `None`; nothing is filled
/// in by guessing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Codec of the first video stream (e.g. "h264", "hevc").
    pub video_codec: Option<String>,
    /// Codec of the first audio stream (e.g. "aac", "ac3").
    pub audio_codec: Option<String>,
    /// Language tag of every audio stream, in stream order.
    ///
    /// `None` marks a track that carries no tag (or the "und" placeholder).
    pub audio_languages: Vec<Option<String>>,
    /// Container duration.
    pub duration: Option<Duration>,
}

impl ProbeResult {
    /// Index among the audio streams of the first track tagged with
    /// `language` (case-insensitive).
    pub fn audio_track_for_language(&self, language: &str) -> Option<usize> {
        self.audio_languages
            .iter()
            .position(|l| l.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(language)))
    }

    /// Number of audio tracks.
    pub fn audio_track_count(&self) -> usize {
        self.audio_languages.len()
    }
}

/// Outcome of probing a file for the decision engine.
///
/// Probe failures are not errors from the caller's point of view: they
/// collapse into [`ProbeOutcome::Unknown`], which the decision engine treats
/// as "compatibility not confirmed".
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The probe succeeded.
    Known(ProbeResult),
    /// The probe tool was missing, timed out, failed or printed garbage.
    Unknown,
}

impl ProbeOutcome {
    /// The probe result, if known.
    pub fn known(&self) -> Option<&ProbeResult> {
        match self {
            ProbeOutcome::Known(result) => Some(result),
            ProbeOutcome::Unknown => None,
        }
    }
}
