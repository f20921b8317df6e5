//! Debounced capture of the rendered tree.

use std::cell::RefCell;
use std::rc::Rc;

use scheduler::Debouncer;
use storage::WindowValueStore;
use tabs::{TabQuery, WindowId};
use tracing::{debug, trace};
use ui::{sidebar, Document};

use crate::context::CacheContext;
use crate::signature::Signature;
use crate::store::{CacheStore, CachedTree, TREE_CACHE_VERSION};

/// Keeps each window's stored tree fresh.
///
/// A reservation clears the stored entry right away and arms a capture after
/// the quiescence delay; a later reservation for the same window replaces the
/// pending capture.
pub struct CacheWriter<S, Q> {
    context: Rc<CacheContext>,
    store: Rc<CacheStore<S>>,
    tabs: Rc<Q>,
    document: Rc<RefCell<Document>>,
    timers: Debouncer<WindowId>,
}

impl<S, Q> CacheWriter<S, Q>
where
    S: WindowValueStore + 'static,
    Q: TabQuery + 'static,
{
    pub fn new(
        context: Rc<CacheContext>,
        store: Rc<CacheStore<S>>,
        tabs: Rc<Q>,
        document: Rc<RefCell<Document>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            context,
            store,
            tabs,
            document,
            timers: Debouncer::new(),
        })
    }

    /// Invalidates the stored tree and schedules a new capture. Must run
    /// inside a [`tokio::task::LocalSet`].
    pub async fn reserve_to_cache_tree(self: &Rc<Self>, window: WindowId) {
        if !self.context.accepts_writes() || !self.is_candidate(window) {
            return;
        }

        self.store.clear(window).await;

        let writer = Rc::downgrade(self);
        let replaced = self.timers.schedule(window, self.context.capture_delay(), async move {
            let Some(writer) = writer.upgrade() else {
                return;
            };
            writer.cache_tree(window).await;
        });
        debug!(window_id = %window, replaced, "tree capture reserved");
    }

    /// Captures the window right away. A window that stopped being a cache
    /// candidate is skipped silently.
    pub async fn cache_tree(&self, window: WindowId) {
        if !self.context.use_cached_tree() {
            return;
        }
        let Some((tabs, pinned_tabs_count)) = self.snapshot(window) else {
            trace!(window_id = %window, "capture skipped");
            return;
        };

        let tree = CachedTree {
            version: TREE_CACHE_VERSION,
            tabs,
            pinned_tabs_count,
        };
        let write_signature = async {
            let live = self.tabs.query(window).await;
            self.store.store_signature(window, &Signature::produce(&live)).await;
        };
        tokio::join!(self.store.store_tree(window, &tree), write_signature);
        debug!(window_id = %window, pinned_tabs_count, "tree captured");
    }

    /// Drops a pending capture, e.g. when the window closes.
    pub fn cancel_pending(&self, window: WindowId) -> bool {
        self.timers.cancel(window)
    }

    pub fn is_pending(&self, window: WindowId) -> bool {
        self.timers.is_pending(window)
    }

    /// A window is a candidate while it has a container that is not being
    /// populated by session restore.
    fn is_candidate(&self, window: WindowId) -> bool {
        let document = self.document.borrow();
        sidebar::tabs_container(&document, window)
            .is_some_and(|container| !sidebar::all_tabs_restored(&document, container))
    }

    /// Container markup and pinned count of a candidate window.
    fn snapshot(&self, window: WindowId) -> Option<(String, usize)> {
        if !self.is_candidate(window) {
            return None;
        }
        let document = self.document.borrow();
        let container = sidebar::tabs_container(&document, window)?;
        Some((
            document.outer_markup(container),
            sidebar::pinned_tab_count(&document, container),
        ))
    }
}
