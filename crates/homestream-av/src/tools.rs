//! External tool detection and management.
//!
//! The delivery pipeline depends on two binaries: `ffmpeg` (remux, transcode
//! and thumbnail frame extraction) and `ffprobe` (codec inspection).
//! [`Toolchain`] resolves both once at startup, preferring configured paths
//! over a `PATH` lookup.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Resolved locations of the media tools.
///
/// A tool that could not be resolved keeps its bare name, so spawning it
/// later fails with [`Error::ToolNotFound`] instead of panicking here.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Transcoder binary.
    pub ffmpeg: PathBuf,
    /// Probe binary.
    pub ffprobe: PathBuf,
}

impl Toolchain {
    /// Resolve both tools, using the configured override when it exists.
    pub fn discover(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Self {
        Self {
            ffmpeg: get_tool_path("ffmpeg", ffmpeg).unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            ffprobe: get_tool_path("ffprobe", ffprobe)
                .unwrap_or_else(|_| PathBuf::from("ffprobe")),
        }
    }

    /// Check both tools and return availability information.
    pub fn check(&self) -> Vec<ToolInfo> {
        vec![
            check_tool_with_arg(&self.ffmpeg.to_string_lossy(), "-version"),
            check_tool_with_arg(&self.ffprobe.to_string_lossy(), "-version"),
        ]
    }

    /// File name of the transcoder, as it appears in the process table.
    pub fn ffmpeg_process_name(&self) -> String {
        self.ffmpeg
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "ffmpeg".to_string())
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::discover(None, None)
    }
}

/// Check if a tool is available and get its information.
///
/// # Example
///
/// ```no_run
/// use homestream_av::check_tool_with_arg;
///
/// let info = check_tool_with_arg("ffprobe", "-version");
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool_with_arg(name: &str, version_arg: &str) -> ToolInfo {
    let result = Command::new(name).arg(version_arg).output();

    match result {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            let path = which::which(name).ok();

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path,
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns an error if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(
            tool = name,
            path = %path.display(),
            "Configured tool path does not exist, falling back to PATH"
        );
    }

    require_tool(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tool_not_found() {
        let info = check_tool_with_arg("nonexistent_tool_12345", "-version");
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
    }

    #[test]
    fn test_get_tool_path_prefers_existing_override() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(get_tool_path("ffmpeg", Some(&fake)).unwrap(), fake);
    }

    #[test]
    fn test_unresolved_tool_keeps_bare_name() {
        let chain = Toolchain::discover(
            Some(Path::new("/nonexistent/ffmpeg_xyz")),
            Some(Path::new("/nonexistent/ffprobe_xyz")),
        );
        // Either resolved from PATH or left as the bare name.
        assert!(chain.ffmpeg.ends_with("ffmpeg"));
        assert!(chain.ffprobe.ends_with("ffprobe"));
        assert_eq!(chain.ffmpeg_process_name(), "ffmpeg");
    }
}
