use std::cell::Cell;
use std::time::Duration;

use crate::config::CacheConfig;

/// Process-wide switches shared by the writer and the restore engine.
///
/// Starts in the initializing state; captures are refused until
/// [`CacheContext::finish_initialization`] is called.
#[derive(Debug)]
pub struct CacheContext {
    use_cached_tree: Cell<bool>,
    initializing: Cell<bool>,
    capture_delay: Duration,
}

impl CacheContext {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            use_cached_tree: Cell::new(config.use_cached_tree),
            initializing: Cell::new(true),
            capture_delay: config.capture_delay(),
        }
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing.get()
    }

    pub fn finish_initialization(&self) {
        if self.initializing.replace(false) {
            tracing::debug!("tree cache leaves initialization");
        }
    }

    pub fn use_cached_tree(&self) -> bool {
        self.use_cached_tree.get()
    }

    pub fn set_use_cached_tree(&self, enabled: bool) {
        self.use_cached_tree.set(enabled);
    }

    pub fn capture_delay(&self) -> Duration {
        self.capture_delay
    }

    /// True once startup is over and caching is enabled.
    pub fn accepts_writes(&self) -> bool {
        !self.is_initializing() && self.use_cached_tree()
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
