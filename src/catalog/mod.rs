//! The set of files the server is allowed to serve.
//!
//! Every playback and thumbnail request is gated on [`Catalog::contains`]
//! before any probe, spawn or file read happens.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::thumbnails::IMAGE_EXTENSIONS;

/// Membership test for servable files.
pub trait Catalog: Send + Sync {
    /// Whether `path` is a known library file.
    fn contains(&self, path: &Path) -> bool;

    /// Number of known files.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a requested path may be looked up at all: it must be absolute
/// and must not contain `..` components.
pub fn is_safe_path(path: &Path) -> bool {
    path.is_absolute() && !path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Lowercase file extension, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Catalog backed by a recursive scan of the configured library roots.
pub struct LibraryCatalog {
    roots: Vec<PathBuf>,
    extensions: HashSet<String>,
    files: RwLock<HashSet<PathBuf>>,
}

impl LibraryCatalog {
    /// Create a catalog for `roots` accepting files with `extensions`.
    /// Nothing is scanned until [`rescan`](Self::rescan) runs.
    pub fn new(roots: Vec<PathBuf>, extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            roots,
            extensions: extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            files: RwLock::new(HashSet::new()),
        }
    }

    /// Catalog over `config.library.roots` for every playable media
    /// extension plus still images.
    pub fn from_config(config: &Config) -> Self {
        let extensions = config
            .streaming
            .media_extensions()
            .chain(IMAGE_EXTENSIONS.iter().copied())
            .map(str::to_string)
            .collect::<Vec<_>>();
        Self::new(config.library.roots.clone(), extensions)
    }

    /// Walk every root and replace the known file set. Returns the number
    /// of files found.
    ///
    /// Blocking; run it on `spawn_blocking` from async code.
    pub fn rescan(&self) -> usize {
        let mut found = HashSet::new();

        for root in &self.roots {
            let root = match root.canonicalize() {
                Ok(root) => root,
                Err(e) => {
                    tracing::warn!("Skipping library root {:?}: {}", root, e);
                    continue;
                }
            };
            tracing::info!("Scanning library root: {:?}", root);

            for entry in WalkDir::new(&root)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if extension_of(path).is_some_and(|ext| self.extensions.contains(&ext)) {
                    found.insert(path.to_path_buf());
                }
            }
        }

        let count = found.len();
        *self.files.write() = found;
        tracing::info!("Library scan complete: {} files", count);
        count
    }
}

impl Catalog for LibraryCatalog {
    fn contains(&self, path: &Path) -> bool {
        self.files.read().contains(path)
    }

    fn len(&self) -> usize {
        self.files.read().len()
    }
}

/// Fixed catalog, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    files: HashSet<PathBuf>,
}

impl StaticCatalog {
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

impl Catalog for StaticCatalog {
    fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    fn len(&self) -> usize {
        self.files.len()
    }
}
