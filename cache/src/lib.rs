//! Per-window tab tree cache.
//!
//! The sidebar of each window is captured as markup after a quiet period
//! ([`CacheWriter`]) and spliced back in on the next build when the stored
//! signature still describes the live tabs ([`RestoreEngine`]). [`TreeCache`]
//! bundles both behind the calls the rest of the sidebar makes.

mod config;
mod context;
mod restore;
mod signature;
mod store;
mod validator;
mod writer;

use std::cell::RefCell;
use std::rc::Rc;

use storage::WindowValueStore;
use tabs::{TabQuery, WindowId};
use ui::Document;
use util::MetricsSink;

pub use config::{
    load_config, parse_config, CacheConfig, ConfigError, DEFAULT_CAPTURE_DELAY_MS,
};
pub use context::CacheContext;
pub use restore::{
    RestoreEngine, RestoreError, RestoreOptions, RestoreState, METRIC_RESTORE_FAIL,
    METRIC_RESTORE_START, METRIC_RESTORE_SUCCESS,
};
pub use signature::{Coverage, Signature};
pub use store::{
    CacheStore, CachedTree, DirtyFlag, CACHED_TREE_KEY, MARKUP_DIRTY_KEY, PINNED_DIRTY_KEY,
    SIGNATURE_KEY, TREE_CACHE_VERSION,
};
pub use validator::{CacheHit, CacheValidator, MissReason, ValidateOptions, Validation};
pub use writer::CacheWriter;

/// Capture and restore of the tab trees of one sidebar.
pub struct TreeCache<S, Q> {
    context: Rc<CacheContext>,
    store: Rc<CacheStore<S>>,
    restore: RestoreEngine<S, Q>,
    writer: Rc<CacheWriter<S, Q>>,
}

impl<S, Q> TreeCache<S, Q>
where
    S: WindowValueStore + 'static,
    Q: TabQuery + 'static,
{
    pub fn new(
        context: Rc<CacheContext>,
        backend: S,
        tabs: Rc<Q>,
        document: Rc<RefCell<Document>>,
        metrics: Rc<dyn MetricsSink>,
    ) -> Self {
        let store = Rc::new(CacheStore::new(backend));
        let restore = RestoreEngine::new(
            Rc::clone(&context),
            Rc::clone(&store),
            Rc::clone(&tabs),
            Rc::clone(&document),
            metrics,
        );
        let writer = CacheWriter::new(Rc::clone(&context), Rc::clone(&store), tabs, document);
        Self {
            context,
            store,
            restore,
            writer,
        }
    }

    pub fn context(&self) -> &CacheContext {
        &self.context
    }

    pub fn store(&self) -> &CacheStore<S> {
        &self.store
    }

    pub fn restore_engine(&self) -> &RestoreEngine<S, Q> {
        &self.restore
    }

    pub fn writer(&self) -> &Rc<CacheWriter<S, Q>> {
        &self.writer
    }

    /// See [`RestoreEngine::restore_window_from_effective_window_cache`].
    pub async fn restore_window_from_effective_window_cache(
        &self,
        window: WindowId,
        options: RestoreOptions,
    ) -> Result<bool, RestoreError> {
        self.restore
            .restore_window_from_effective_window_cache(window, options)
            .await
    }

    /// See [`CacheWriter::reserve_to_cache_tree`]. Must run inside a
    /// [`tokio::task::LocalSet`].
    pub async fn reserve_to_cache_tree(&self, window: WindowId) {
        self.writer.reserve_to_cache_tree(window).await;
    }

    /// Captures the window right away, bypassing the quiescence delay.
    pub async fn cache_tree(&self, window: WindowId) {
        self.writer.cache_tree(window).await;
    }

    /// Drops every stored slot of the window.
    pub async fn clear_window_cache(&self, window: WindowId) {
        self.store.clear(window).await;
    }

    /// Flags part of the stored tree as out of date.
    pub async fn mark_window_cache_dirty(&self, window: WindowId, flag: DirtyFlag) {
        self.store.mark_dirty(window, flag).await;
    }

    /// Teardown hook for a closed window.
    pub fn cancel_pending_capture(&self, window: WindowId) -> bool {
        self.writer.cancel_pending(window)
    }
}
