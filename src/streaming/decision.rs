//! Format decision engine.
//!
//! Chooses, per playback request, whether a file is served as-is, rewrapped
//! into fragmented MP4, or transcoded live. Transcode is the fail-safe:
//! whenever compatibility cannot be confirmed the file is re-encoded.

use homestream_av::{probe_outcome, AudioSelection, ProbeOutcome, ProbeResult, Prober};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::catalog::extension_of;
use crate::config::StreamingConfig;

/// The only video codec browsers are assumed to decode.
pub const BROWSER_VIDEO_CODEC: &str = "h264";

/// Audio codecs browsers decode inside MP4.
pub const BROWSER_AUDIO_CODECS: &[&str] = &["aac", "mp3"];

/// How a file reaches the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// Original bytes with byte-range support.
    DirectServe,
    /// Container rewrite without re-encoding.
    Remux,
    /// Live re-encode with the selected audio track.
    Transcode { audio: AudioSelection },
}

impl fmt::Display for DeliveryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryPlan::DirectServe => write!(f, "direct"),
            DeliveryPlan::Remux => write!(f, "remux"),
            DeliveryPlan::Transcode {
                audio: AudioSelection::Language { tag, index },
            } => write!(f, "transcode (audio: {tag}, track {index})"),
            DeliveryPlan::Transcode {
                audio: AudioSelection::First,
            } => write!(f, "transcode (audio: first track)"),
        }
    }
}

/// Which rule an extension falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerClass {
    AlwaysTranscode,
    Remuxable,
    ProbeVideo,
    Native,
    Unknown,
}

impl fmt::Display for ContainerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerClass::AlwaysTranscode => "always-transcode",
            ContainerClass::Remuxable => "remuxable",
            ContainerClass::ProbeVideo => "probe",
            ContainerClass::Native => "native",
            ContainerClass::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Extension sets and preferences the engine decides with.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    transcode: HashSet<String>,
    remux: HashSet<String>,
    probe: HashSet<String>,
    native: HashSet<String>,
    preferred_language: String,
    remux_enabled: bool,
}

impl DecisionPolicy {
    pub fn from_config(config: &StreamingConfig) -> Self {
        let set = |v: &[String]| v.iter().map(|e| e.to_ascii_lowercase()).collect();
        Self {
            transcode: set(&config.transcode_extensions),
            remux: set(&config.remux_extensions),
            probe: set(&config.probe_extensions),
            native: set(&config.native_extensions),
            preferred_language: config.preferred_audio_language.to_ascii_lowercase(),
            remux_enabled: config.remux_enabled,
        }
    }

    /// Classify a lowercase extension. Earlier rules win when an extension
    /// appears in several sets.
    pub fn classify(&self, ext: Option<&str>) -> ContainerClass {
        let Some(ext) = ext else {
            return ContainerClass::Unknown;
        };
        if self.transcode.contains(ext) {
            ContainerClass::AlwaysTranscode
        } else if self.remux.contains(ext) {
            ContainerClass::Remuxable
        } else if self.probe.contains(ext) {
            ContainerClass::ProbeVideo
        } else if self.native.contains(ext) {
            ContainerClass::Native
        } else {
            ContainerClass::Unknown
        }
    }

    fn audio_selection(&self, outcome: &ProbeOutcome) -> AudioSelection {
        outcome
            .known()
            .and_then(|result| result.audio_track_for_language(&self.preferred_language))
            .map_or(AudioSelection::First, |index| AudioSelection::Language {
                tag: self.preferred_language.clone(),
                index,
            })
    }

    fn transcode(&self, outcome: &ProbeOutcome) -> DeliveryPlan {
        DeliveryPlan::Transcode {
            audio: self.audio_selection(outcome),
        }
    }
}

fn is_browser_video(result: &ProbeResult) -> bool {
    result.video_codec.as_deref() == Some(BROWSER_VIDEO_CODEC)
}

fn is_browser_audio(codec: &str) -> bool {
    BROWSER_AUDIO_CODECS.contains(&codec)
}

/// Decide the plan from an extension and a probe outcome.
///
/// Pure: the same inputs always give the same plan.
pub fn decide(ext: Option<&str>, outcome: &ProbeOutcome, policy: &DecisionPolicy) -> DeliveryPlan {
    match policy.classify(ext) {
        ContainerClass::AlwaysTranscode | ContainerClass::Unknown => policy.transcode(outcome),
        ContainerClass::Remuxable => match outcome.known() {
            Some(r)
                if is_browser_video(r)
                    && r.audio_codec.as_deref().map_or(true, is_browser_audio) =>
            {
                if policy.remux_enabled {
                    DeliveryPlan::Remux
                } else {
                    policy.transcode(outcome)
                }
            }
            _ => policy.transcode(outcome),
        },
        ContainerClass::ProbeVideo => match outcome.known() {
            Some(r) if is_browser_video(r) => DeliveryPlan::DirectServe,
            // Audio-only file in a video container
            Some(r)
                if r.video_codec.is_none()
                    && r.audio_codec.as_deref().is_some_and(is_browser_audio) =>
            {
                DeliveryPlan::DirectServe
            }
            _ => policy.transcode(outcome),
        },
        ContainerClass::Native => DeliveryPlan::DirectServe,
    }
}

/// Probe `path` if its container needs it, then [`decide`].
pub async fn plan_delivery(path: &Path, policy: &DecisionPolicy, prober: &dyn Prober) -> DeliveryPlan {
    let ext = extension_of(path);
    let class = policy.classify(ext.as_deref());

    let outcome = if class == ContainerClass::Native {
        ProbeOutcome::Unknown
    } else {
        probe_outcome(prober, path).await
    };

    let plan = decide(ext.as_deref(), &outcome, policy);
    tracing::debug!(
        path = %path.display(),
        ?class,
        known = outcome.known().is_some(),
        %plan,
        "Delivery decided"
    );
    plan
}
