//! FFprobe-based media probing.

use super::types::*;
use super::Prober;
use crate::{Error, Result, ToolCommand};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-invocation probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

/// Prober that shells out to `ffprobe` and parses its JSON report.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// Create a prober for the given `ffprobe` binary.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> Result<ProbeResult> {
        let output = ToolCommand::new(self.program.clone())
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_entries",
                "format=duration:stream=codec_type,codec_name:stream_tags=language:stream_disposition=attached_pic",
            ])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
            .execute()
            .await?;

        let json_str = String::from_utf8(output.stdout)
            .map_err(|e| Error::parse_error("ffprobe", format!("Invalid UTF-8: {}", e)))?;

        parse_ffprobe_json(&json_str)
    }
}

/// Parse the JSON report printed by `ffprobe -print_format json`.
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeResult> {
    let output: FfprobeOutput = serde_json::from_str(json)?;
    Ok(parse_ffprobe_output(output))
}

fn parse_ffprobe_output(output: FfprobeOutput) -> ProbeResult {
    let duration = output
        .format
        .and_then(|f| f.duration)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);

    let mut result = ProbeResult {
        duration,
        ..Default::default()
    };

    for stream in output.streams {
        match stream.codec_type.as_deref() {
            // Embedded cover art is reported as a video stream
            Some("video") if stream.disposition.attached_pic != 0 => {}
            Some("video") => {
                if result.video_codec.is_none() {
                    result.video_codec = stream.codec_name.map(|c| c.to_lowercase());
                }
            }
            Some("audio") => {
                if result.audio_languages.is_empty() {
                    result.audio_codec = stream.codec_name.map(|c| c.to_lowercase());
                }
                result
                    .audio_languages
                    .push(normalize_language(stream.tags.language));
            }
            _ => {}
        }
    }

    result
}

fn normalize_language(tag: Option<String>) -> Option<String> {
    tag.map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && t != "und")
}
