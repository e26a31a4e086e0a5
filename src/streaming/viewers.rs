//! Registry of active remux/transcode viewers.
//!
//! Each live stream holds a [`ViewerGuard`]. The registry caps the number
//! of concurrent viewers; registering past the cap evicts the oldest viewer
//! by cancelling its token, which ends that stream and releases its
//! transcoder.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A snapshot of one active viewer.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerInfo {
    pub id: u64,
    /// Client address, when known.
    pub client: Option<SocketAddr>,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
}

struct ViewerEntry {
    info: ViewerInfo,
    cancel: CancellationToken,
}

struct Inner {
    capacity: usize,
    next_id: AtomicU64,
    viewers: Mutex<VecDeque<ViewerEntry>>,
}

/// Thread-safe, bounded viewer registry.
#[derive(Clone)]
pub struct ViewerRegistry {
    inner: Arc<Inner>,
}

impl ViewerRegistry {
    /// Create a registry admitting at most `capacity` viewers (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                viewers: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Register a new viewer, evicting the oldest ones while the registry
    /// is full.
    pub fn register(&self, client: Option<SocketAddr>, path: &Path) -> ViewerGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let info = ViewerInfo {
            id,
            client,
            path: path.to_path_buf(),
            started_at: Utc::now(),
        };

        let mut viewers = self.inner.viewers.lock();
        while viewers.len() >= self.inner.capacity {
            let Some(evicted) = viewers.pop_front() else {
                break;
            };
            tracing::info!(
                viewer = evicted.info.id,
                client = ?evicted.info.client,
                path = %evicted.info.path.display(),
                "Viewer limit reached, evicting oldest stream"
            );
            evicted.cancel.cancel();
        }
        viewers.push_back(ViewerEntry {
            info,
            cancel: cancel.clone(),
        });
        drop(viewers);

        tracing::debug!(viewer = id, client = ?client, path = %path.display(), "Registered viewer");

        ViewerGuard {
            id,
            cancel,
            registry: self.clone(),
        }
    }

    fn deregister(&self, id: u64) {
        let mut viewers = self.inner.viewers.lock();
        if let Some(pos) = viewers.iter().position(|v| v.info.id == id) {
            viewers.remove(pos);
            tracing::debug!(viewer = id, "Viewer ended");
        }
    }

    /// Active viewers, oldest first.
    pub fn list(&self) -> Vec<ViewerInfo> {
        self.inner
            .viewers
            .lock()
            .iter()
            .map(|v| v.info.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.viewers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.viewers.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Cancel every active stream, e.g. on shutdown.
    pub fn cancel_all(&self) {
        for viewer in self.inner.viewers.lock().iter() {
            viewer.cancel.cancel();
        }
    }
}

/// Membership of one stream in the registry. Dropping it deregisters.
pub struct ViewerGuard {
    id: u64,
    cancel: CancellationToken,
    registry: ViewerRegistry,
}

impl ViewerGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancelled when this viewer is evicted.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
