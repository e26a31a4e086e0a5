use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrent remux/transcode viewers. The oldest
    /// viewer is evicted when a new one arrives at capacity.
    #[serde(default = "default_max_viewers")]
    pub max_viewers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_viewers() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_viewers: default_max_viewers(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Directories scanned for media at startup. Only files found under
    /// these roots can be played.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Containers that are always transcoded.
    #[serde(default = "default_transcode_extensions")]
    pub transcode_extensions: Vec<String>,

    /// Ambiguous containers: served directly only when the probed video
    /// codec is browser-safe.
    #[serde(default = "default_probe_extensions")]
    pub probe_extensions: Vec<String>,

    /// Legacy containers that can be rewrapped when both codecs are
    /// browser-safe.
    #[serde(default = "default_remux_extensions")]
    pub remux_extensions: Vec<String>,

    /// Formats browsers play as-is.
    #[serde(default = "default_native_extensions")]
    pub native_extensions: Vec<String>,

    /// ISO 639-2 tag of the audio track preferred when transcoding.
    #[serde(default = "default_audio_language")]
    pub preferred_audio_language: String,

    #[serde(default = "default_true")]
    pub transcode_enabled: bool,

    #[serde(default = "default_true")]
    pub remux_enabled: bool,

    /// Per-read timeout on the transcoder's output.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Upper bound on a single remux/transcode stream.
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,

    /// Per-invocation ffprobe timeout.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_video_preset")]
    pub video_preset: String,

    #[serde(default = "default_video_crf")]
    pub video_crf: u32,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_transcode_extensions() -> Vec<String> {
    strings(&["wmv", "flv", "mpg", "mpeg", "ts", "m2ts", "vob", "3gp", "wma"])
}
fn default_probe_extensions() -> Vec<String> {
    strings(&["mp4", "m4v", "mov", "mkv"])
}
fn default_remux_extensions() -> Vec<String> {
    strings(&["avi"])
}
fn default_native_extensions() -> Vec<String> {
    strings(&["webm", "mp3", "m4a", "aac", "ogg", "oga", "opus", "wav", "flac"])
}
fn default_audio_language() -> String {
    "ger".to_string()
}
fn default_true() -> bool {
    true
}
fn default_read_timeout() -> u64 {
    30
}
fn default_max_duration() -> u64 {
    4 * 60 * 60
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_video_preset() -> String {
    "veryfast".to_string()
}
fn default_video_crf() -> u32 {
    23
}
fn default_audio_bitrate() -> String {
    "192k".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            transcode_extensions: default_transcode_extensions(),
            probe_extensions: default_probe_extensions(),
            remux_extensions: default_remux_extensions(),
            native_extensions: default_native_extensions(),
            preferred_audio_language: default_audio_language(),
            transcode_enabled: true,
            remux_enabled: true,
            read_timeout_secs: default_read_timeout(),
            max_duration_secs: default_max_duration(),
            probe_timeout_secs: default_probe_timeout(),
            video_preset: default_video_preset(),
            video_crf: default_video_crf(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl StreamingConfig {
    /// Every extension the server knows how to deliver.
    pub fn media_extensions(&self) -> impl Iterator<Item = &str> {
        self.transcode_extensions
            .iter()
            .chain(&self.probe_extensions)
            .chain(&self.remux_extensions)
            .chain(&self.native_extensions)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Age after which a generation lock is presumed abandoned.
    #[serde(default = "default_lock_stale")]
    pub lock_stale_secs: u64,

    /// Timeout for each ffmpeg extraction attempt.
    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_secs: u64,

    #[serde(default = "default_thumb_width")]
    pub width: u32,

    #[serde(default = "default_thumb_height")]
    pub height: u32,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache/thumbnails")
}
fn default_lock_stale() -> u64 {
    120
}
fn default_extract_timeout() -> u64 {
    15
}
fn default_thumb_width() -> u32 {
    320
}
fn default_thumb_height() -> u32 {
    180
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            lock_stale_secs: default_lock_stale(),
            extract_timeout_secs: default_extract_timeout(),
            width: default_thumb_width(),
            height: default_thumb_height(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Transcoders running longer than this are considered orphaned.
    /// Keep it above `streaming.max_duration_secs`.
    #[serde(default = "default_reaper_max_age")]
    pub max_age_secs: u64,
}

fn default_reaper_max_age() -> u64 {
    default_max_duration() + 15 * 60
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: default_reaper_max_age(),
        }
    }
}
