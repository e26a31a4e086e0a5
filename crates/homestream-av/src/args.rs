//! ffmpeg argument vectors.
//!
//! Every invocation the server makes is built here so the flag sets stay in
//! one place. Streaming output is always fragmented MP4 on stdout, which a
//! browser can play without seeking.

use std::path::Path;
use std::time::Duration;

/// Fragmented-MP4 muxer flags for unseekable output.
pub const FRAGMENTED_MP4_FLAGS: &str = "frag_keyframe+empty_moov+default_base_moof";

/// Marker passed as the output target of streaming jobs. The orphan reaper
/// only considers transcoder processes whose command line contains it.
pub const STDOUT_TARGET: &str = "pipe:1";

/// Which audio track a transcode should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSelection {
    /// One audio track chosen by its language tag.
    Language {
        /// The tag that matched.
        tag: String,
        /// Position among the input's audio streams.
        index: usize,
    },
    /// The first audio track in the file.
    First,
}

impl AudioSelection {
    fn map_spec(&self) -> String {
        match self {
            AudioSelection::Language { index, .. } => format!("0:a:{index}"),
            AudioSelection::First => "0:a:0?".to_string(),
        }
    }
}

/// Encoder settings for live transcodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    /// x264 preset.
    pub video_preset: String,
    /// x264 constant rate factor.
    pub video_crf: u32,
    /// AAC bitrate, ffmpeg syntax (e.g. "192k").
    pub audio_bitrate: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            video_preset: "veryfast".to_string(),
            video_crf: 23,
            audio_bitrate: "192k".to_string(),
        }
    }
}

fn input_args(input: &Path, audio: &AudioSelection) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0?".to_string(),
        "-map".to_string(),
        audio.map_spec(),
        "-sn".to_string(),
        "-dn".to_string(),
    ]
}

fn fragmented_output_args() -> Vec<String> {
    vec![
        "-movflags".to_string(),
        FRAGMENTED_MP4_FLAGS.to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        STDOUT_TARGET.to_string(),
    ]
}

/// Re-encode `input` to H.264/AAC fragmented MP4 on stdout.
pub fn transcode_args(
    input: &Path,
    audio: &AudioSelection,
    settings: &TranscodeSettings,
) -> Vec<String> {
    let mut args = input_args(input, audio);
    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            settings.video_preset.as_str(),
            "-crf",
        ]
        .map(String::from),
    );
    args.push(settings.video_crf.to_string());
    args.extend(
        [
            "-pix_fmt",
            "yuv420p",
            "-profile:v",
            "high",
            "-c:a",
            "aac",
            "-b:a",
            settings.audio_bitrate.as_str(),
            "-ac",
            "2",
        ]
        .map(String::from),
    );
    args.extend(fragmented_output_args());
    args
}

/// Rewrap `input` into fragmented MP4 on stdout without re-encoding.
pub fn remux_args(input: &Path) -> Vec<String> {
    let mut args = input_args(input, &AudioSelection::First);
    args.extend(["-c", "copy"].map(String::from));
    args.extend(fragmented_output_args());
    args
}

/// Decode one frame at `at` and write it to stdout as PNG.
pub fn frame_args(input: &Path, at: Duration) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", at.as_secs_f64()),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:V:0".to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-c:v".to_string(),
        "png".to_string(),
        STDOUT_TARGET.to_string(),
    ]
}

/// Extract an embedded cover (attached picture stream) to stdout as PNG.
pub fn cover_art_args(input: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "-0:V".to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-c:v".to_string(),
        "png".to_string(),
        STDOUT_TARGET.to_string(),
    ]
}
