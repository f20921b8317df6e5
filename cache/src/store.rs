//! Per-window persistence of the cached tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::WindowValueStore;
use tabs::WindowId;
use tracing::{debug, warn};

use crate::signature::Signature;

/// Bumped whenever the serialized tree layout changes.
pub const TREE_CACHE_VERSION: u32 = 3;

pub const CACHED_TREE_KEY: &str = "tabs-tree-cache";
pub const SIGNATURE_KEY: &str = "tabs-tree-signature";
pub const MARKUP_DIRTY_KEY: &str = "tabs-tree-markup-dirty";
pub const PINNED_DIRTY_KEY: &str = "tabs-tree-pinned-dirty";

const ALL_KEYS: [&str; 4] = [
    CACHED_TREE_KEY,
    SIGNATURE_KEY,
    MARKUP_DIRTY_KEY,
    PINNED_DIRTY_KEY,
];

/// Invalidation flags consumed by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyFlag {
    /// The cached markup no longer reflects the rendered tree.
    Markup,
    /// The pinned block changed since the capture.
    PinnedState,
}

impl DirtyFlag {
    pub fn key(self) -> &'static str {
        match self {
            Self::Markup => MARKUP_DIRTY_KEY,
            Self::PinnedState => PINNED_DIRTY_KEY,
        }
    }
}

/// Snapshot of one window's tab container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTree {
    pub version: u32,
    /// Outer markup of the container.
    pub tabs: String,
    pub pinned_tabs_count: usize,
}

/// Best-effort view of the four cache slots of every window.
///
/// Backend failures never escape: reads degrade to absent values and writes
/// are logged and dropped.
#[derive(Debug)]
pub struct CacheStore<S> {
    backend: S,
}

impl<S: WindowValueStore> CacheStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Reads one slot; backend faults read as absent.
    pub async fn get(&self, window: WindowId, key: &str) -> Option<Value> {
        match self.backend.get_window_value(window, key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(window_id = %window, key, error = %err, "cache read failed");
                None
            }
        }
    }

    /// Writes `value`, or removes the key when `value` is `None`.
    pub async fn update(&self, window: WindowId, key: &str, value: Option<Value>) {
        let result = match value {
            Some(value) => self.backend.set_window_value(window, key, value).await,
            None => self.backend.remove_window_value(window, key).await,
        };
        if let Err(err) = result {
            warn!(window_id = %window, key, error = %err, "cache write failed");
        }
    }

    /// Removes all four slots of the window.
    pub async fn clear(&self, window: WindowId) {
        debug!(window_id = %window, "clearing tree cache");
        for key in ALL_KEYS {
            self.update(window, key, None).await;
        }
    }

    /// Raises an invalidation flag for the renderer.
    pub async fn mark_dirty(&self, window: WindowId, flag: DirtyFlag) {
        self.update(window, flag.key(), Some(Value::Bool(true))).await;
    }

    pub async fn is_dirty(&self, window: WindowId, flag: DirtyFlag) -> bool {
        matches!(self.get(window, flag.key()).await, Some(Value::Bool(true)))
    }

    /// Stored tree entry; a partial or malformed entry reads as absent.
    pub async fn cached_tree(&self, window: WindowId) -> Option<CachedTree> {
        let value = self.get(window, CACHED_TREE_KEY).await?;
        match serde_json::from_value(value) {
            Ok(tree) => Some(tree),
            Err(err) => {
                debug!(window_id = %window, error = %err, "ignoring malformed tree cache");
                None
            }
        }
    }

    pub async fn signature(&self, window: WindowId) -> Option<Signature> {
        match self.get(window, SIGNATURE_KEY).await? {
            Value::String(raw) => Some(Signature::from_raw(raw)),
            other => {
                debug!(window_id = %window, value = %other, "ignoring non-string signature");
                None
            }
        }
    }

    pub async fn store_tree(&self, window: WindowId, tree: &CachedTree) {
        match serde_json::to_value(tree) {
            Ok(value) => self.update(window, CACHED_TREE_KEY, Some(value)).await,
            Err(err) => warn!(window_id = %window, error = %err, "failed to encode tree cache"),
        }
    }

    pub async fn store_signature(&self, window: WindowId, signature: &Signature) {
        let value = Value::String(signature.as_str().to_string());
        self.update(window, SIGNATURE_KEY, Some(value)).await;
    }
}
