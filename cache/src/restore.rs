//! Splicing a validated tree back into the sidebar.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use storage::WindowValueStore;
use tabs::{Tab, TabQuery, WindowId};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use ui::{
    sidebar, Document, DocumentEditor, DocumentError, InsertionPoint, MarkupError, NodeId,
};
use util::MetricsSink;

use crate::context::CacheContext;
use crate::store::{CacheStore, CachedTree, TREE_CACHE_VERSION};
use crate::validator::{CacheValidator, ValidateOptions, Validation};

pub const METRIC_RESTORE_START: &str = "restore_window_from_cache: start";
pub const METRIC_RESTORE_SUCCESS: &str = "restore_window_from_cache: success";
pub const METRIC_RESTORE_FAIL: &str = "restore_window_from_cache: fail";

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Live tabs when the caller already has them.
    pub tabs: Option<Vec<Tab>>,
    /// Where a rebuilt container goes; defaults to right after the current
    /// container, else the end of the global tab list.
    pub insertion_point: Option<InsertionPoint>,
    pub ignore_pinned_tabs: bool,
    pub require_exact: bool,
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("cached tree markup is malformed: {0}")]
    Markup(#[from] MarkupError),
    #[error("cached tree could not be spliced: {0}")]
    Document(#[from] DocumentError),
}

/// Progress of one restore attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Start,
    Validated,
    Spliced,
    Reconciled,
    Success,
    Failed,
}

enum Splice {
    Done,
    /// The live tree cannot host the cached markup.
    Unfit(&'static str),
}

pub struct RestoreEngine<S, Q> {
    context: Rc<CacheContext>,
    store: Rc<CacheStore<S>>,
    validator: CacheValidator<S>,
    tabs: Rc<Q>,
    document: Rc<RefCell<Document>>,
    metrics: Rc<dyn MetricsSink>,
    states: RefCell<HashMap<WindowId, RestoreState>>,
}

impl<S: WindowValueStore, Q: TabQuery> RestoreEngine<S, Q> {
    pub fn new(
        context: Rc<CacheContext>,
        store: Rc<CacheStore<S>>,
        tabs: Rc<Q>,
        document: Rc<RefCell<Document>>,
        metrics: Rc<dyn MetricsSink>,
    ) -> Self {
        Self {
            context,
            validator: CacheValidator::new(Rc::clone(&store)),
            store,
            tabs,
            document,
            metrics,
            states: RefCell::new(HashMap::new()),
        }
    }

    pub fn validator(&self) -> &CacheValidator<S> {
        &self.validator
    }

    /// State reached by the latest attempt for `window`, `None` before the
    /// first one.
    pub fn last_state(&self, window: WindowId) -> Option<RestoreState> {
        self.states.borrow().get(&window).copied()
    }

    fn enter(&self, window: WindowId, state: RestoreState) {
        self.states.borrow_mut().insert(window, state);
        debug!(window_id = %window, state = ?state, "restore");
    }

    /// Returns `Ok(true)` when the cached tree was spliced into the sidebar.
    /// `Ok(false)` means the caller must rebuild the window from scratch.
    pub async fn restore_window_from_effective_window_cache(
        &self,
        window: WindowId,
        options: RestoreOptions,
    ) -> Result<bool, RestoreError> {
        self.metrics.add(METRIC_RESTORE_START);
        self.enter(window, RestoreState::Start);

        let result = self.restore(window, options).await;
        match &result {
            Ok(true) => {
                self.enter(window, RestoreState::Success);
                self.metrics.add(METRIC_RESTORE_SUCCESS);
                info!(window_id = %window, "tab tree restored from cache");
            }
            Ok(false) => {
                self.enter(window, RestoreState::Failed);
                self.metrics.add(METRIC_RESTORE_FAIL);
            }
            Err(err) => {
                self.enter(window, RestoreState::Failed);
                self.metrics.add(METRIC_RESTORE_FAIL);
                error!(
                    window_id = %window,
                    error = %err,
                    "failed to restore tab tree from cache"
                );
                self.store.clear(window).await;
            }
        }
        result
    }

    async fn restore(
        &self,
        window: WindowId,
        options: RestoreOptions,
    ) -> Result<bool, RestoreError> {
        if !self.context.use_cached_tree() {
            debug!(window_id = %window, "tree cache disabled");
            return Ok(false);
        }

        let tabs = match options.tabs {
            Some(tabs) => tabs,
            None => self.tabs.query(window).await,
        };
        let validate = ValidateOptions {
            ignore_pinned_tabs: options.ignore_pinned_tabs,
            require_exact: options.require_exact,
        };
        let hit = match self.validator.validate(window, &tabs, validate).await {
            Validation::Hit(hit) => hit,
            Validation::Miss(_) => return Ok(false),
        };
        if hit.cache.version != TREE_CACHE_VERSION {
            self.store.clear(window).await;
            return Ok(false);
        }
        self.enter(window, RestoreState::Validated);

        let restored = self.apply(
            window,
            options.insertion_point,
            &hit.cache,
            hit.offset,
            &tabs,
        )?;
        if !restored {
            self.store.clear(window).await;
        }
        Ok(restored)
    }

    /// Splices and reconciles in one go. The document may have changed
    /// while storage was read, so everything here runs without suspending.
    fn apply(
        &self,
        window: WindowId,
        insertion_point: Option<InsertionPoint>,
        cache: &CachedTree,
        offset: usize,
        tabs: &[Tab],
    ) -> Result<bool, RestoreError> {
        let mut document = self.document.borrow_mut();
        let outcome = splice(&mut document, window, insertion_point, cache, offset)?;
        if let Splice::Unfit(why) = outcome {
            warn!(window_id = %window, offset, why, "cached tree does not fit the live tree");
            return Ok(false);
        }
        self.enter(window, RestoreState::Spliced);

        reconcile(&mut document, window, tabs, offset)?;
        self.enter(window, RestoreState::Reconciled);
        debug!(
            window_id = %window,
            tabs = ?sidebar::describe_tabs(&document, window),
            "restored tab tree"
        );
        Ok(true)
    }
}

fn splice(
    document: &mut Document,
    window: WindowId,
    insertion_point: Option<InsertionPoint>,
    cache: &CachedTree,
    offset: usize,
) -> Result<Splice, RestoreError> {
    let old_container = sidebar::tabs_container(document, window);

    if offset > 0 {
        let Some(container) = old_container else {
            return Ok(Splice::Unfit("no container for a partial restore"));
        };
        let elements = sidebar::tab_elements(document, container);
        if elements.len() < offset {
            return Ok(Splice::Unfit("container has fewer tabs than the offset"));
        }
        let fragment = document.parse_fragment(&cache.tabs)?;
        let fragment = document.strip_outer_element(fragment);
        let boundary = document
            .index_in_parent(elements[offset - 1])
            .map_or(0, |index| index + 1);
        let len = document.children(container).len();
        if let Err(err) = document.remove_range(container, boundary..len) {
            document.discard(fragment);
            return Err(err.into());
        }
        document.insert_at(InsertionPoint::new(container, boundary), fragment)?;
        return Ok(Splice::Done);
    }

    let point = match insertion_point {
        Some(point) => Some(point),
        None => sidebar::default_insertion_point(document, window),
    };
    let Some(mut point) = point else {
        return Ok(Splice::Unfit("no insertion point for the container"));
    };
    let fragment = document.parse_fragment(&cache.tabs)?;
    let Some(container) = fragment
        .roots()
        .iter()
        .copied()
        .find(|root| document.element(*root).is_some())
    else {
        document.discard(fragment);
        return Err(MarkupError::NoElement.into());
    };
    if let Some(old) = old_container {
        if let Err(err) = check_point_survives_removal(document, point, old) {
            document.discard(fragment);
            return Err(err.into());
        }
        if document.parent(old) == Some(point.parent)
            && document.index_in_parent(old).is_some_and(|index| index < point.index)
        {
            point.index -= 1;
        }
        document.remove(old)?;
    }
    sidebar::assign_window(document, container, window)?;
    document.insert_at(point, fragment)?;
    Ok(Splice::Done)
}

/// Rejects points that the removal of `old` would invalidate, so a bad
/// point fails before anything is removed.
fn check_point_survives_removal(
    document: &Document,
    point: InsertionPoint,
    old: NodeId,
) -> Result<(), DocumentError> {
    let mut ancestor = Some(point.parent);
    while let Some(node) = ancestor {
        if node == old {
            return Err(DocumentError::UnknownNode(point.parent));
        }
        ancestor = document.parent(node);
    }
    if document.element(point.parent).is_none() {
        return Err(DocumentError::NotAnElement(point.parent));
    }
    let len = document.children(point.parent).len();
    if point.index > len {
        return Err(DocumentError::IndexOutOfBounds {
            parent: point.parent,
            index: point.index,
            len,
        });
    }
    Ok(())
}

/// Re-attaches live tab state to the restored elements past `offset` and
/// flags them dirty. A count mismatch is logged and skipped.
fn reconcile(
    document: &mut Document,
    window: WindowId,
    tabs: &[Tab],
    offset: usize,
) -> Result<(), DocumentError> {
    let elements: Vec<NodeId> = sidebar::all_tabs(document, window)
        .into_iter()
        .skip(offset)
        .collect();
    let live = tabs.get(offset..).unwrap_or_default();
    if elements.len() != live.len() {
        warn!(
            window_id = %window,
            offset,
            elements = elements.len(),
            tabs = live.len(),
            "restored tab count differs from live tabs"
        );
        return Ok(());
    }
    for (element, tab) in elements.into_iter().zip(live) {
        sidebar::apply_tab_state(document, element, tab)?;
        sidebar::mark_dirty(document, element)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;
    use storage::MemoryWindowStore;
    use tabs::BasicTabManager;
    use util::TimelineMetrics;

    struct Fixture {
        manager: Rc<BasicTabManager>,
        document: Rc<RefCell<Document>>,
        store: Rc<CacheStore<MemoryWindowStore>>,
        metrics: Rc<TimelineMetrics>,
        engine: RestoreEngine<MemoryWindowStore, BasicTabManager>,
    }

    fn fixture() -> Fixture {
        let manager = Rc::new(BasicTabManager::new());
        let document = Rc::new(RefCell::new(sidebar::create_sidebar()));
        let store = Rc::new(CacheStore::new(MemoryWindowStore::new()));
        let metrics = Rc::new(TimelineMetrics::new());
        let engine = RestoreEngine::new(
            Rc::new(CacheContext::default()),
            Rc::clone(&store),
            Rc::clone(&manager),
            Rc::clone(&document),
            metrics.clone(),
        );
        Fixture {
            manager,
            document,
            store,
            metrics,
            engine,
        }
    }

    /// Renders the window, stores it as the cache, and returns the markup.
    async fn capture(fixture: &Fixture, window: WindowId) -> String {
        let tabs = fixture.manager.tabs(window);
        let markup = {
            let mut document = fixture.document.borrow_mut();
            let container = sidebar::render_window(&mut document, window, &tabs).unwrap();
            document.outer_markup(container)
        };
        let tree = CachedTree {
            version: TREE_CACHE_VERSION,
            tabs: markup.clone(),
            pinned_tabs_count: tabs.iter().filter(|tab| tab.pinned).count(),
        };
        fixture.store.store_tree(window, &tree).await;
        fixture.store.store_signature(window, &Signature::produce(&tabs)).await;
        markup
    }

    #[tokio::test]
    async fn full_restore_replaces_container() {
        let fixture = fixture();
        let window = WindowId::new(1);
        fixture.manager.create_tab(window, "https://a.example/");
        fixture.manager.create_tab(window, "https://b.example/");
        let markup = capture(&fixture, window).await;

        let restored = fixture
            .engine
            .restore_window_from_effective_window_cache(window, RestoreOptions::default())
            .await
            .unwrap();
        assert!(restored);
        assert_eq!(fixture.engine.last_state(window), Some(RestoreState::Success));

        let document = fixture.document.borrow();
        let container = sidebar::tabs_container(&document, window).unwrap();
        let all_tabs = sidebar::all_tabs_node(&document).unwrap();
        assert_eq!(document.element_children(all_tabs), vec![container]);
        let elements = sidebar::tab_elements(&document, container);
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|tab| sidebar::is_dirty(&document, *tab)));
        assert_ne!(document.outer_markup(container), markup);
        assert_eq!(fixture.metrics.count(METRIC_RESTORE_START), 1);
        assert_eq!(fixture.metrics.count(METRIC_RESTORE_SUCCESS), 1);
    }

    #[tokio::test]
    async fn miss_records_fail_and_leaves_document() {
        let fixture = fixture();
        let window = WindowId::new(1);
        fixture.manager.create_tab(window, "https://a.example/");
        let before = {
            let document = fixture.document.borrow();
            document.outer_markup(document.root())
        };

        let restored = fixture
            .engine
            .restore_window_from_effective_window_cache(window, RestoreOptions::default())
            .await
            .unwrap();
        assert!(!restored);
        assert_eq!(fixture.engine.last_state(window), Some(RestoreState::Failed));
        assert_eq!(fixture.metrics.count(METRIC_RESTORE_FAIL), 1);
        let document = fixture.document.borrow();
        assert_eq!(document.outer_markup(document.root()), before);
    }

    #[tokio::test]
    async fn malformed_markup_is_an_error_and_clears_cache() {
        let fixture = fixture();
        let window = WindowId::new(1);
        fixture.manager.create_tab(window, "https://a.example/");
        let tabs = fixture.manager.tabs(window);
        let tree = CachedTree {
            version: TREE_CACHE_VERSION,
            tabs: "<ul><li></ul>".to_string(),
            pinned_tabs_count: 0,
        };
        fixture.store.store_tree(window, &tree).await;
        fixture.store.store_signature(window, &Signature::produce(&tabs)).await;

        let result = fixture
            .engine
            .restore_window_from_effective_window_cache(window, RestoreOptions::default())
            .await;
        assert!(matches!(result, Err(RestoreError::Markup(_))));
        assert!(fixture.store.backend().keys(window).is_empty());
        assert_eq!(fixture.metrics.count(METRIC_RESTORE_FAIL), 1);
        assert!(sidebar::tabs_container(&fixture.document.borrow(), window).is_none());
    }

    #[tokio::test]
    async fn disabled_cache_never_restores() {
        let fixture = fixture();
        let window = WindowId::new(1);
        fixture.manager.create_tab(window, "https://a.example/");
        capture(&fixture, window).await;
        fixture.engine.context.set_use_cached_tree(false);

        let restored = fixture
            .engine
            .restore_window_from_effective_window_cache(window, RestoreOptions::default())
            .await
            .unwrap();
        assert!(!restored);
        assert_eq!(fixture.store.backend().keys(window).len(), 2);
    }

    #[tokio::test]
    async fn explicit_insertion_point_inside_old_container_is_rejected() {
        let fixture = fixture();
        let window = WindowId::new(1);
        fixture.manager.create_tab(window, "https://a.example/");
        capture(&fixture, window).await;
        let (container, before) = {
            let document = fixture.document.borrow();
            let container = sidebar::tabs_container(&document, window).unwrap();
            (container, document.outer_markup(document.root()))
        };

        let options = RestoreOptions {
            insertion_point: Some(InsertionPoint::new(container, 0)),
            ..RestoreOptions::default()
        };
        let result = fixture
            .engine
            .restore_window_from_effective_window_cache(window, options)
            .await;
        assert!(matches!(result, Err(RestoreError::Document(_))));
        let document = fixture.document.borrow();
        assert_eq!(document.outer_markup(document.root()), before);
    }

    #[tokio::test]
    async fn fewer_restored_elements_than_tabs_still_succeeds() {
        let fixture = fixture();
        let window = WindowId::new(1);
        fixture.manager.create_tab(window, "https://a.example/");
        fixture.manager.create_tab(window, "https://b.example/");
        capture(&fixture, window).await;
        fixture.manager.create_tab(window, "https://c.example/");
        let live = fixture.manager.tabs(window);
        fixture.store.store_signature(window, &Signature::produce(&live)).await;

        let restored = fixture
            .engine
            .restore_window_from_effective_window_cache(window, RestoreOptions::default())
            .await
            .unwrap();
        assert!(restored);
        assert_eq!(fixture.engine.last_state(window), Some(RestoreState::Success));
        assert_eq!(fixture.metrics.count(METRIC_RESTORE_SUCCESS), 1);
        assert_eq!(fixture.metrics.count(METRIC_RESTORE_FAIL), 0);

        let document = fixture.document.borrow();
        let elements = sidebar::all_tabs(&document, window);
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|tab| !sidebar::is_dirty(&document, *tab)));
    }

    #[tokio::test]
    async fn states_are_tracked_per_window() {
        let fixture = fixture();
        let cached = WindowId::new(1);
        let uncached = WindowId::new(2);
        fixture.manager.create_tab(cached, "https://a.example/");
        fixture.manager.create_tab(uncached, "https://b.example/");
        capture(&fixture, cached).await;
        assert_eq!(fixture.engine.last_state(cached), None);

        let engine = &fixture.engine;
        let (first, second) = tokio::join!(
            engine.restore_window_from_effective_window_cache(cached, RestoreOptions::default()),
            engine.restore_window_from_effective_window_cache(uncached, RestoreOptions::default()),
        );
        assert!(first.unwrap());
        assert!(!second.unwrap());
        assert_eq!(fixture.engine.last_state(cached), Some(RestoreState::Success));
        assert_eq!(fixture.engine.last_state(uncached), Some(RestoreState::Failed));
    }
}
