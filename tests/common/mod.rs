//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temporary library directory, a
//! temporary thumbnail cache and a full [`AppContext`] over a
//! [`LibraryCatalog`]. External tools default to names that do not exist;
//! [`HarnessBuilder::fake_ffmpeg`] installs a shell script in their place.
//! [`TestHarness::start`] serves the app on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use homestream::catalog::LibraryCatalog;
use homestream::config::Config;
use homestream::server::{self, AppContext};
use homestream_av::{FfprobeProber, Prober, Toolchain};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const MISSING_FFMPEG: &str = "homestream_test_missing_ffmpeg";
pub const MISSING_FFPROBE: &str = "homestream_test_missing_ffprobe";

/// Output of the default fake transcoder: a marker followed by padding.
pub const FAKE_OUTPUT_MARKER: &[u8] = b"FAKE-FRAGMENTED-MP4";

pub struct HarnessBuilder {
    config: Config,
    prober: Option<Arc<dyn Prober>>,
    ffmpeg_script: Option<String>,
}

impl HarnessBuilder {
    /// Adjust the configuration before the context is built.
    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Use a `/bin/sh` script as ffmpeg. The script ignores its arguments.
    pub fn fake_ffmpeg(mut self, body: &str) -> Self {
        self.ffmpeg_script = Some(body.to_string());
        self
    }

    pub fn build(self) -> TestHarness {
        let library = tempfile::tempdir().expect("failed to create library dir");
        let cache = tempfile::tempdir().expect("failed to create cache dir");
        let bin = tempfile::tempdir().expect("failed to create bin dir");
        let library_root = library
            .path()
            .canonicalize()
            .expect("failed to canonicalize library dir");

        let mut config = self.config;
        config.library.roots = vec![library_root.clone()];
        config.thumbnails.cache_dir = cache.path().to_path_buf();

        let ffmpeg = match self.ffmpeg_script {
            Some(body) => write_script(bin.path(), "ffmpeg", &body),
            None => PathBuf::from(MISSING_FFMPEG),
        };
        let tools = Toolchain {
            ffmpeg,
            ffprobe: PathBuf::from(MISSING_FFPROBE),
        };
        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(FfprobeProber::new(tools.ffprobe.clone())));

        let catalog = Arc::new(LibraryCatalog::from_config(&config));
        let ctx = AppContext::new(config, catalog.clone(), tools, prober);

        TestHarness {
            ctx,
            catalog,
            library_root,
            _library: library,
            _cache: cache,
            _bin: bin,
            cancel: CancellationToken::new(),
        }
    }
}

/// A fully-constructed [`AppContext`] over temporary directories.
pub struct TestHarness {
    pub ctx: AppContext,
    pub catalog: Arc<LibraryCatalog>,
    pub library_root: PathBuf,
    _library: TempDir,
    _cache: TempDir,
    _bin: TempDir,
    cancel: CancellationToken,
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: Config::default(),
            prober: None,
            ffmpeg_script: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Write a file into the library and rescan so the catalog knows it.
    pub fn add_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.library_root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, contents).expect("failed to write library file");
        self.catalog.rescan();
        path
    }

    /// Serve the app on a random port. The server stops when the harness
    /// is dropped.
    pub async fn start(self) -> (Self, SocketAddr) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(server::serve(listener, self.ctx.clone(), self.cancel.clone()));

        (self, addr)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// URL for `route` with `path` as the `filepath` parameter.
pub fn url(addr: SocketAddr, route: &str, path: &Path) -> String {
    format!("http://{addr}{route}?filepath={}", path.display())
}

/// Deterministic test bytes: `i % 256` at offset `i`.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Fake transcoder writing the marker and some padding, then exiting.
pub fn finite_output_script() -> String {
    format!(
        "printf '{}'\nhead -c 8192 /dev/zero\n",
        String::from_utf8_lossy(FAKE_OUTPUT_MARKER)
    )
}

/// Fake transcoder that writes a line every 50ms until killed.
pub const ENDLESS_OUTPUT_SCRIPT: &str = "while :; do echo chunk; sleep 0.05; done\n";

/// Fake transcoder that never writes.
pub const SILENT_SCRIPT: &str = "exec sleep 60\n";

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to mark script executable");
    path
}

#[cfg(not(unix))]
fn write_script(_dir: &Path, _name: &str, _body: &str) -> PathBuf {
    PathBuf::from(MISSING_FFMPEG)
}
