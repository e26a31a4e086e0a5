mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    normalize_config(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_config_file() {
        Some(path) => load_config(&path),
        None => {
            let mut config = Config::default();
            normalize_config(&mut config);
            Ok(config)
        }
    }
}

/// First existing file among the default config locations.
pub fn find_config_file() -> Option<PathBuf> {
    let default_paths = [
        "./homestream.toml",
        "./config.toml",
        "~/.config/homestream/config.toml",
        "/etc/homestream/config.toml",
    ];

    default_paths.into_iter().find_map(|path_str| {
        let path = PathBuf::from(shellexpand::tilde(path_str).as_ref());
        path.exists().then_some(path)
    })
}

/// Lowercase extensions and strip leading dots so lookups can compare
/// against `Path::extension` directly.
fn normalize_config(config: &mut Config) {
    let streaming = &mut config.streaming;
    for set in [
        &mut streaming.transcode_extensions,
        &mut streaming.probe_extensions,
        &mut streaming.remux_extensions,
        &mut streaming.native_extensions,
    ] {
        for ext in set.iter_mut() {
            *ext = ext.trim_start_matches('.').to_ascii_lowercase();
        }
    }
    streaming.preferred_audio_language = streaming.preferred_audio_language.to_ascii_lowercase();
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.server.max_viewers == 0 {
        anyhow::bail!("server.max_viewers must be at least 1");
    }

    for root in &config.library.roots {
        if !root.exists() {
            tracing::warn!("Library root does not exist: {:?}", root);
        }
    }

    let streaming = &config.streaming;
    if streaming.read_timeout_secs == 0 {
        anyhow::bail!("streaming.read_timeout_secs cannot be 0");
    }
    if streaming.max_duration_secs == 0 {
        anyhow::bail!("streaming.max_duration_secs cannot be 0");
    }
    if streaming.probe_timeout_secs == 0 {
        anyhow::bail!("streaming.probe_timeout_secs cannot be 0");
    }

    let thumbs = &config.thumbnails;
    if thumbs.width == 0 || thumbs.height == 0 {
        anyhow::bail!(
            "Thumbnail size must be non-zero (got {}x{})",
            thumbs.width,
            thumbs.height
        );
    }

    if config.reaper.enabled && config.reaper.max_age_secs <= streaming.max_duration_secs {
        tracing::warn!(
            "reaper.max_age_secs ({}) does not exceed streaming.max_duration_secs ({}); \
             long streams may be reaped while still playing",
            config.reaper.max_age_secs,
            streaming.max_duration_secs
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_viewers, 4);
        assert_eq!(config.streaming.preferred_audio_language, "ger");
        assert_eq!(config.streaming.remux_extensions, vec!["avi"]);
        assert_eq!(
            config.streaming.probe_extensions,
            vec!["mp4", "m4v", "mov", "mkv"]
        );
        assert_eq!(config.streaming.read_timeout_secs, 30);
        assert_eq!(config.thumbnails.lock_stale_secs, 120);
        assert_eq!((config.thumbnails.width, config.thumbnails.height), (320, 180));
        assert!(config.reaper.max_age_secs > config.streaming.max_duration_secs);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [server]
            port = 9000

            [library]
            roots = ["/srv/media"]

            [streaming]
            remux_enabled = false
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.library.roots, vec![PathBuf::from("/srv/media")]);
        assert!(!config.streaming.remux_enabled);
        assert!(config.streaming.transcode_enabled);
    }

    #[test]
    fn extensions_are_normalized() {
        let file = write_config(
            r#"
            [streaming]
            native_extensions = [".WEBM", "Mp3"]
            preferred_audio_language = "ENG"
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.streaming.native_extensions, vec!["webm", "mp3"]);
        assert_eq!(config.streaming.preferred_audio_language, "eng");
    }

    #[test]
    fn rejects_port_zero() {
        let file = write_config("[server]\nport = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn rejects_zero_viewers() {
        let file = write_config("[server]\nmax_viewers = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        let file = write_config("[server\nport = ");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        assert!(load_config_or_default(Some(Path::new("/nonexistent/homestream.toml"))).is_err());
    }
}
