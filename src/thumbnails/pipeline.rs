//! Thumbnail fallback chains.
//!
//! Each way of producing a picture is a [`ThumbnailStrategy`]. A chain is
//! an ordered list of strategies; the first one that yields an image wins.

use async_trait::async_trait;
use homestream_av::{args, probe_outcome, Prober, ToolCommand};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::synth;
use super::{MediaKind, ThumbnailError};
use crate::catalog::extension_of;

/// Frames darker than this mean luma (0-255) are rejected as black.
pub const MIN_FRAME_LUMA: f64 = 24.0;

/// Sample points when the duration is known, as fractions of it.
const SAMPLE_FRACTIONS: [f64; 3] = [0.10, 0.25, 0.50];

/// Sample points when the duration is unknown.
const SAMPLE_OFFSETS: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// One way of producing a thumbnail image.
#[async_trait]
pub trait ThumbnailStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, source: &Path) -> Result<DynamicImage, ThumbnailError>;
}

/// Ordered strategies tried until one succeeds.
pub struct FallbackChain {
    strategies: Vec<Box<dyn ThumbnailStrategy>>,
}

impl FallbackChain {
    pub fn new(strategies: Vec<Box<dyn ThumbnailStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run strategies in order and return the first image produced, with
    /// the name of the strategy that produced it.
    pub async fn run(&self, source: &Path) -> Result<(&'static str, DynamicImage), ThumbnailError> {
        let mut last_error = None;
        for strategy in &self.strategies {
            match strategy.render(source).await {
                Ok(img) => {
                    tracing::debug!(
                        source = %source.display(),
                        strategy = strategy.name(),
                        "Thumbnail rendered"
                    );
                    return Ok((strategy.name(), img));
                }
                Err(e) => {
                    tracing::debug!(
                        source = %source.display(),
                        strategy = strategy.name(),
                        "Thumbnail strategy failed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ThumbnailError::Unavailable("empty strategy chain".into())))
    }
}

/// What the chains need to run.
#[derive(Clone)]
pub struct ChainContext {
    pub ffmpeg: PathBuf,
    pub prober: Arc<dyn Prober>,
    pub extract_timeout: Duration,
    pub width: u32,
    pub height: u32,
}

/// Build the chain for a kind of media.
pub fn chain_for(kind: MediaKind, ctx: &ChainContext) -> FallbackChain {
    let cover = || -> Box<dyn ThumbnailStrategy> {
        Box::new(EmbeddedCover {
            ffmpeg: ctx.ffmpeg.clone(),
            timeout: ctx.extract_timeout,
        })
    };
    let tile = || -> Box<dyn ThumbnailStrategy> {
        Box::new(ColorTile {
            width: ctx.width,
            height: ctx.height,
        })
    };

    let strategies: Vec<Box<dyn ThumbnailStrategy>> = match kind {
        MediaKind::Audio => vec![
            cover(),
            Box::new(NoteTile {
                width: ctx.width,
                height: ctx.height,
            }),
        ],
        MediaKind::Video => vec![
            cover(),
            Box::new(FrameSample {
                ffmpeg: ctx.ffmpeg.clone(),
                prober: ctx.prober.clone(),
                timeout: ctx.extract_timeout,
            }),
            tile(),
        ],
        MediaKind::Image => vec![Box::new(ImageFile), tile()],
        MediaKind::Other => vec![tile()],
    };
    FallbackChain::new(strategies)
}

async fn extract_png(ffmpeg: &Path, argv: Vec<String>, timeout: Duration) -> Result<DynamicImage, ThumbnailError> {
    let output = ToolCommand::new(ffmpeg.to_path_buf())
        .args(argv)
        .timeout(timeout)
        .execute()
        .await?;
    if output.stdout.is_empty() {
        return Err(ThumbnailError::Unavailable("no picture in output".into()));
    }
    let data = output.stdout;
    let img = tokio::task::spawn_blocking(move || image::load_from_memory(&data)).await??;
    Ok(img)
}

/// Embedded cover art (attached picture stream).
pub struct EmbeddedCover {
    pub ffmpeg: PathBuf,
    pub timeout: Duration,
}

#[async_trait]
impl ThumbnailStrategy for EmbeddedCover {
    fn name(&self) -> &'static str {
        "embedded-cover"
    }

    async fn render(&self, source: &Path) -> Result<DynamicImage, ThumbnailError> {
        extract_png(&self.ffmpeg, args::cover_art_args(source), self.timeout).await
    }
}

/// Mean luma of an image, 0-255.
pub fn mean_luma(img: &DynamicImage) -> f64 {
    let luma = img.to_luma8();
    let count = luma.width() as usize * luma.height() as usize;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = luma.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / count as f64
}

/// Timestamps to sample a frame at, in order.
pub fn sample_points(duration: Option<Duration>) -> Vec<Duration> {
    match duration.filter(|d| !d.is_zero()) {
        Some(d) => SAMPLE_FRACTIONS.iter().map(|f| d.mul_f64(*f)).collect(),
        None => SAMPLE_OFFSETS.to_vec(),
    }
}

/// A decoded video frame that is not (nearly) black.
pub struct FrameSample {
    pub ffmpeg: PathBuf,
    pub prober: Arc<dyn Prober>,
    pub timeout: Duration,
}

#[async_trait]
impl ThumbnailStrategy for FrameSample {
    fn name(&self) -> &'static str {
        "frame-sample"
    }

    async fn render(&self, source: &Path) -> Result<DynamicImage, ThumbnailError> {
        let duration = probe_outcome(self.prober.as_ref(), source)
            .await
            .known()
            .and_then(|r| r.duration);

        for at in sample_points(duration) {
            match extract_png(&self.ffmpeg, args::frame_args(source, at), self.timeout).await {
                Ok(frame) => {
                    let luma = mean_luma(&frame);
                    if luma > MIN_FRAME_LUMA {
                        return Ok(frame);
                    }
                    tracing::trace!(source = %source.display(), ?at, luma, "Frame too dark");
                }
                // The tool is gone; later timestamps will not do better.
                Err(e @ ThumbnailError::Tool(homestream_av::Error::ToolNotFound { .. })) => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::trace!(source = %source.display(), ?at, "Frame grab failed: {}", e);
                }
            }
        }
        Err(ThumbnailError::NoUsableFrame(source.to_path_buf()))
    }
}

/// The source itself, for still images.
pub struct ImageFile;

#[async_trait]
impl ThumbnailStrategy for ImageFile {
    fn name(&self) -> &'static str {
        "image-file"
    }

    async fn render(&self, source: &Path) -> Result<DynamicImage, ThumbnailError> {
        let source = source.to_path_buf();
        let img = tokio::task::spawn_blocking(move || image::open(source)).await??;
        Ok(img)
    }
}

/// Tile with a musical-note glyph.
pub struct NoteTile {
    pub width: u32,
    pub height: u32,
}

#[async_trait]
impl ThumbnailStrategy for NoteTile {
    fn name(&self) -> &'static str {
        "note-tile"
    }

    async fn render(&self, _source: &Path) -> Result<DynamicImage, ThumbnailError> {
        Ok(DynamicImage::ImageRgb8(synth::note_tile(self.width, self.height)))
    }
}

/// Tile colored by extension.
pub struct ColorTile {
    pub width: u32,
    pub height: u32,
}

#[async_trait]
impl ThumbnailStrategy for ColorTile {
    fn name(&self) -> &'static str {
        "color-tile"
    }

    async fn render(&self, source: &Path) -> Result<DynamicImage, ThumbnailError> {
        let ext = extension_of(source).unwrap_or_default();
        Ok(DynamicImage::ImageRgb8(synth::color_tile(
            &ext,
            self.width,
            self.height,
        )))
    }
}
