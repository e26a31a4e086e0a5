//! # homestream-av
//!
//! External media tooling for the homestream server.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`Toolchain`]) -- resolve `ffmpeg` and `ffprobe`
//!   from configured paths or `PATH`.
//! - **Probing** ([`probe`]) -- codec and audio-language facts via the
//!   [`Prober`] trait, with [`FfprobeProber`] as the shipped backend.
//! - **Bounded execution** ([`ToolCommand`]) -- one-shot invocations with a
//!   timeout and captured output.
//! - **Supervision** ([`SupervisedProcess`]) -- a streaming child process
//!   whose termination is guaranteed on every exit path.
//! - **Argument builders** ([`args`]) -- the ffmpeg flag sets for remux,
//!   transcode, frame grabs and cover extraction.
//! - **Orphan reaping** ([`OrphanReaper`]) -- a process-table sweep for
//!   transcoders leaked by a crashed server.
//!
//! ## Example
//!
//! ```no_run
//! use homestream_av::{probe_outcome, FfprobeProber, Toolchain};
//! use std::path::Path;
//!
//! # async fn example() {
//! let tools = Toolchain::default();
//! let prober = FfprobeProber::new(tools.ffprobe.clone());
//! let outcome = probe_outcome(&prober, Path::new("/media/movie.mkv")).await;
//! if let Some(result) = outcome.known() {
//!     println!("video codec: {:?}", result.video_codec);
//! }
//! # }
//! ```

pub mod args;
mod command;
mod error;
pub mod probe;
pub mod reaper;
pub mod supervisor;
pub mod tools;

// Re-exports
pub use args::{AudioSelection, TranscodeSettings};
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use probe::{probe_outcome, FfprobeProber, ProbeOutcome, ProbeResult, Prober};
pub use reaper::{OrphanReaper, ReapReport, ReaperPolicy};
pub use supervisor::SupervisedProcess;
pub use tools::{check_tool_with_arg, require_tool, ToolInfo, Toolchain};
