//! Thumbnail cache and generation.
//!
//! Thumbnails are stored as `<cache_dir>/<key>.jpg`, where the key is
//! derived from the source path. Generation for one key is serialized by a
//! [`GenerationLock`] file next to the artifact, so concurrent requests (in
//! this process or another) run the fallback chain at most once. A request
//! that finds the lock held gets [`ThumbnailOutcome::Busy`] and the caller
//! serves a placeholder instead of waiting.

pub mod lock;
pub mod pipeline;
pub mod synth;

pub use lock::{
    Clock, GenerationLock, LockAttempt, ManualClock, SystemClock, LOCK_FILE_EXTENSION,
};
pub use pipeline::{chain_for, ChainContext, FallbackChain, ThumbnailStrategy, MIN_FRAME_LUMA};

use homestream_av::Prober;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::extension_of;
use crate::config::ThumbnailConfig;

/// Artifacts smaller than this are treated as corrupt.
pub const MIN_THUMBNAIL_BYTES: u64 = 256;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "aac", "ogg", "oga", "opus", "wav", "wma"];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "mov", "avi", "webm", "wmv", "flv", "mpg", "mpeg", "ts", "m2ts", "vob",
    "3gp",
];

const JPEG_EXTENSION: &str = "jpg";

/// Broad category of a source file, selecting its fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Other,
}

impl MediaKind {
    pub fn of(path: &Path) -> Self {
        match extension_of(path) {
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Audio,
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
            _ => MediaKind::Other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Tool(#[from] homestream_av::Error),

    #[error("no usable frame in {}", .0.display())]
    NoUsableFrame(PathBuf),

    #[error("{0}")]
    Unavailable(String),

    #[error("thumbnail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    /// A valid artifact exists at this path.
    Ready(PathBuf),
    /// Another request is generating it right now.
    Busy,
}

/// Cache key for a source path: the first 16 hex characters of the SHA-256
/// of the path string.
pub fn cache_key(source: &Path) -> String {
    let digest = Sha256::digest(source.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

/// On-disk thumbnail cache with single-flight generation.
pub struct ThumbnailCache {
    dir: PathBuf,
    stale_after: Duration,
    chain_ctx: ChainContext,
    clock: Arc<dyn Clock>,
    generations: AtomicU64,
}

impl ThumbnailCache {
    pub fn new(config: &ThumbnailConfig, ffmpeg: PathBuf, prober: Arc<dyn Prober>) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            stale_after: Duration::from_secs(config.lock_stale_secs),
            chain_ctx: ChainContext {
                ffmpeg,
                prober,
                extract_timeout: Duration::from_secs(config.extract_timeout_secs),
                width: config.width,
                height: config.height,
            },
            clock: Arc::new(SystemClock),
            generations: AtomicU64::new(0),
        }
    }

    /// Replace the clock used to age lock files.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, source: &Path) -> PathBuf {
        self.dir
            .join(format!("{}.{}", cache_key(source), JPEG_EXTENSION))
    }

    pub fn lock_path(&self, source: &Path) -> PathBuf {
        self.dir
            .join(format!("{}.{}", cache_key(source), LOCK_FILE_EXTENSION))
    }

    /// Number of fallback-chain runs since creation.
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Return the cached thumbnail for `source`, generating it if needed.
    pub async fn get_or_generate(&self, source: &Path) -> Result<ThumbnailOutcome, ThumbnailError> {
        std::fs::create_dir_all(&self.dir)?;
        let artifact = self.artifact_path(source);

        if self.valid_artifact(&artifact)? {
            return Ok(ThumbnailOutcome::Ready(artifact));
        }

        let lock_path = self.lock_path(source);
        let _lock = match GenerationLock::try_acquire(&lock_path, self.stale_after, self.clock.as_ref())? {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Busy => {
                tracing::debug!(source = %source.display(), "Thumbnail generation in progress elsewhere");
                return Ok(ThumbnailOutcome::Busy);
            }
        };

        // Another generator may have finished between the check and the lock.
        if self.valid_artifact(&artifact)? {
            return Ok(ThumbnailOutcome::Ready(artifact));
        }

        self.generations.fetch_add(1, Ordering::SeqCst);
        let kind = MediaKind::of(source);
        let chain = chain_for(kind, &self.chain_ctx);
        let (strategy, img) = chain.run(source).await?;

        let (width, height) = (self.chain_ctx.width, self.chain_ctx.height);
        let dir = self.dir.clone();
        let target = artifact.clone();
        tokio::task::spawn_blocking(move || write_artifact(&dir, &target, img, width, height))
            .await??;

        tracing::info!(
            source = %source.display(),
            ?kind,
            strategy,
            "Thumbnail generated"
        );
        Ok(ThumbnailOutcome::Ready(artifact))
    }

    /// Whether `artifact` exists and is large enough to be real. Corrupt
    /// artifacts are deleted.
    fn valid_artifact(&self, artifact: &Path) -> Result<bool, ThumbnailError> {
        match std::fs::metadata(artifact) {
            Ok(meta) if meta.len() >= MIN_THUMBNAIL_BYTES => Ok(true),
            Ok(meta) => {
                tracing::warn!(
                    artifact = %artifact.display(),
                    bytes = meta.len(),
                    "Removing corrupt thumbnail"
                );
                match std::fs::remove_file(artifact) {
                    Ok(()) => Ok(false),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every artifact and every lock that is stale. Returns the
    /// number of files removed.
    pub fn clear(&self) -> Result<usize, ThumbnailError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let remove = match path.extension().and_then(|e| e.to_str()) {
                Some(JPEG_EXTENSION) => true,
                Some(LOCK_FILE_EXTENSION) => {
                    lock::is_stale(&path, self.stale_after, self.clock.as_ref())
                }
                _ => false,
            };
            if remove {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::info!(dir = %self.dir.display(), removed, "Thumbnail cache cleared");
        Ok(removed)
    }
}

/// Resize to fill `width`x`height` (center crop), encode as JPEG, and
/// atomically move into place.
fn write_artifact(
    dir: &Path,
    target: &Path,
    img: DynamicImage,
    width: u32,
    height: u32,
) -> Result<(), ThumbnailError> {
    let thumb = img.resize_to_fill(width, height, FilterType::Triangle).to_rgb8();

    let mut buf = Cursor::new(Vec::new());
    thumb.write_to(&mut buf, ImageFormat::Jpeg)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".thumb-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(buf.get_ref())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| ThumbnailError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use homestream_av::FfprobeProber;

    fn cache(dir: &Path) -> ThumbnailCache {
        let config = ThumbnailConfig {
            cache_dir: dir.to_path_buf(),
            ..Default::default()
        };
        ThumbnailCache::new(
            &config,
            PathBuf::from("nonexistent_ffmpeg_xyz"),
            Arc::new(FfprobeProber::new(PathBuf::from("nonexistent_ffprobe_xyz"))),
        )
    }

    #[test]
    fn cache_key_is_sixteen_hex_chars() {
        let key = cache_key(Path::new("/media/movie.mkv"));
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key(Path::new("/media/movie.mkv")));
        assert_ne!(key, cache_key(Path::new("/media/movie2.mkv")));
    }

    #[test]
    fn media_kinds() {
        assert_eq!(MediaKind::of(Path::new("/m/a.MP3")), MediaKind::Audio);
        assert_eq!(MediaKind::of(Path::new("/m/a.mkv")), MediaKind::Video);
        assert_eq!(MediaKind::of(Path::new("/m/a.png")), MediaKind::Image);
        assert_eq!(MediaKind::of(Path::new("/m/a.txt")), MediaKind::Other);
        assert_eq!(MediaKind::of(Path::new("/m/noext")), MediaKind::Other);
    }

    #[tokio::test]
    async fn generates_320x180_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let outcome = cache.get_or_generate(Path::new("/m/song.mp3")).await.unwrap();

        let ThumbnailOutcome::Ready(path) = outcome else {
            panic!("expected artifact");
        };
        assert!(std::fs::metadata(&path).unwrap().len() >= MIN_THUMBNAIL_BYTES);
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (320, 180));
        assert!(!cache.lock_path(Path::new("/m/song.mp3")).exists());
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let source = Path::new("/m/movie.mkv");

        let first = cache.get_or_generate(source).await.unwrap();
        let bytes_first = std::fs::read(cache.artifact_path(source)).unwrap();
        let second = cache.get_or_generate(source).await.unwrap();
        let bytes_second = std::fs::read(cache.artifact_path(source)).unwrap();

        assert_eq!(first, second);
        assert_eq!(bytes_first, bytes_second);
        assert_eq!(cache.generation_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let source = Path::new("/m/clip.mp4");

        let (a, b) = tokio::join!(cache.get_or_generate(source), cache.get_or_generate(source));
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(cache.generation_count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, ThumbnailOutcome::Ready(_))));
        let artifact = std::fs::read(cache.artifact_path(source)).unwrap();
        assert!(artifact.len() as u64 >= MIN_THUMBNAIL_BYTES);
    }

    #[tokio::test]
    async fn corrupt_artifact_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let source = Path::new("/m/movie.avi");
        std::fs::write(cache.artifact_path(source), b"truncated").unwrap();

        let outcome = cache.get_or_generate(source).await.unwrap();
        assert_eq!(outcome, ThumbnailOutcome::Ready(cache.artifact_path(source)));
        assert_eq!(cache.generation_count(), 1);
        assert!(std::fs::metadata(cache.artifact_path(source)).unwrap().len() >= MIN_THUMBNAIL_BYTES);
    }

    #[tokio::test]
    async fn fresh_lock_reports_busy_and_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = cache(dir.path()).with_clock(clock.clone());
        let source = Path::new("/m/movie.mkv");

        std::fs::write(cache.lock_path(source), clock.now().to_rfc3339()).unwrap();
        assert_eq!(
            cache.get_or_generate(source).await.unwrap(),
            ThumbnailOutcome::Busy
        );
        assert_eq!(cache.generation_count(), 0);

        clock.advance(Duration::from_secs(121));
        assert!(matches!(
            cache.get_or_generate(source).await.unwrap(),
            ThumbnailOutcome::Ready(_)
        ));
        assert_eq!(cache.generation_count(), 1);
        assert!(!cache.lock_path(source).exists());
    }

    #[tokio::test]
    async fn clear_removes_artifacts_and_stale_locks() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = cache(dir.path()).with_clock(clock.clone());

        cache.get_or_generate(Path::new("/m/a.mkv")).await.unwrap();
        cache.get_or_generate(Path::new("/m/b.mp3")).await.unwrap();
        std::fs::write(cache.lock_path(Path::new("/m/c.mkv")), clock.now().to_rfc3339()).unwrap();

        // The lock is fresh, so only the two artifacts go.
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.lock_path(Path::new("/m/c.mkv")).exists());

        clock.advance(Duration::from_secs(600));
        assert_eq!(cache.clear().unwrap(), 1);
    }

    #[test]
    fn clear_on_missing_dir_is_noop() {
        let cache = cache(Path::new("/nonexistent/thumbs/dir"));
        assert_eq!(cache.clear().unwrap(), 0);
    }
}
