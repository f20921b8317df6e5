//! Hit-or-miss decision for a stored tree.

use std::rc::Rc;

use storage::WindowValueStore;
use tabs::{Tab, WindowId};
use tracing::{debug, warn};
use ui::sidebar;

use crate::signature::{Coverage, Signature};
use crate::store::{CacheStore, CachedTree, TREE_CACHE_VERSION};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Leave the pinned block out of the comparison and of the markup.
    pub ignore_pinned_tabs: bool,
    /// Only an exact signature match is a hit.
    pub require_exact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub cache: CachedTree,
    /// Live tabs not covered by the cached markup.
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NoEntry,
    NoSignature,
    VersionMismatch { found: u32, expected: u32 },
    EmptySignature,
    SignatureMismatch,
    CorruptEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Hit(CacheHit),
    Miss(MissReason),
}

pub struct CacheValidator<S> {
    store: Rc<CacheStore<S>>,
}

impl<S: WindowValueStore> CacheValidator<S> {
    pub fn new(store: Rc<CacheStore<S>>) -> Self {
        Self { store }
    }

    /// Compares the stored entry of `window` with `live_tabs`. Every miss
    /// clears the entry before returning.
    pub async fn validate(
        &self,
        window: WindowId,
        live_tabs: &[Tab],
        options: ValidateOptions,
    ) -> Validation {
        let actual = Signature::produce(live_tabs);
        let (stored_signature, cache) =
            tokio::join!(self.store.signature(window), self.store.cached_tree(window));

        match evaluate(&actual, stored_signature, cache, options) {
            Ok(hit) => {
                debug!(window_id = %window, offset = hit.offset, "tree cache hit");
                Validation::Hit(hit)
            }
            Err(reason) => {
                debug!(window_id = %window, reason = ?reason, "tree cache miss");
                self.store.clear(window).await;
                Validation::Miss(reason)
            }
        }
    }
}

fn evaluate(
    actual: &Signature,
    stored_signature: Option<Signature>,
    cache: Option<CachedTree>,
    options: ValidateOptions,
) -> Result<CacheHit, MissReason> {
    let mut cache = cache.ok_or(MissReason::NoEntry)?;
    let mut stored_signature = stored_signature.ok_or(MissReason::NoSignature)?;
    if cache.version != TREE_CACHE_VERSION {
        return Err(MissReason::VersionMismatch {
            found: cache.version,
            expected: TREE_CACHE_VERSION,
        });
    }

    if options.ignore_pinned_tabs && cache.pinned_tabs_count > 0 {
        cache.tabs = sidebar::trim_tabs_markup(&cache.tabs, cache.pinned_tabs_count).map_err(|err| {
            warn!(error = %err, "cached tree markup is unreadable");
            MissReason::CorruptEntry
        })?;
        stored_signature = stored_signature.trim(cache.pinned_tabs_count);
        cache.pinned_tabs_count = 0;
    }

    if stored_signature.is_empty() {
        return Err(MissReason::EmptySignature);
    }
    let coverage = actual
        .coverage_of(&stored_signature)
        .ok_or(MissReason::SignatureMismatch)?;
    if options.require_exact && coverage != Coverage::Exact {
        return Err(MissReason::SignatureMismatch);
    }
    Ok(CacheHit {
        cache,
        offset: coverage.offset(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryWindowStore;
    use tabs::TabId;

    fn tabs(specs: &[(u64, bool)]) -> Vec<Tab> {
        specs
            .iter()
            .enumerate()
            .map(|(index, &(id, pinned))| Tab {
                id: TabId::new(id),
                window_id: WindowId::new(1),
                url: format!("https://{id}.example/"),
                pinned,
                index,
            })
            .collect()
    }

    fn markup(specs: &[(u64, bool)]) -> String {
        let items: String = specs
            .iter()
            .map(|&(id, pinned)| {
                let class = if pinned { "tab pinned" } else { "tab" };
                format!(r#"<li class="{class}" data-tab-id="{id}"></li>"#)
            })
            .collect();
        format!(r#"<ul class="tabs" id="window-1">{items}</ul>"#)
    }

    async fn seeded(
        specs: &[(u64, bool)],
        version: u32) -> (Rc<CacheStore<MemoryWindowStore>>, CacheValidator<MemoryWindowStore>,
    ) {
        let store = Rc::new(CacheStore::new(MemoryWindowStore::new()));
        let window = WindowId::new(1);
        let tree = CachedTree {
            version,
            tabs: markup(specs),
            pinned_tabs_count: specs.iter().filter(|(_, pinned)| *pinned).count(),
        };
        store.store_tree(window, &tree).await;
        store.store_signature(window, &Signature::produce(&tabs(specs))).await;
        let validator = CacheValidator::new(Rc::clone(&store));
        (store, validator)
    }

    #[tokio::test]
    async fn exact_match_hits_with_zero_offset() {
        let specs = [(1, false), (2, false), (3, false)];
        let (_, validator) = seeded(&specs, TREE_CACHE_VERSION).await;
        let validation = validator
            .validate(WindowId::new(1), &tabs(&specs), ValidateOptions::default())
            .await;
        let Validation::Hit(hit) = validation else {
            panic!("expected hit, got {validation:?}");
        };
        assert_eq!(hit.offset, 0);
        assert_eq!(hit.cache.tabs, markup(&specs));
    }

    #[tokio::test]
    async fn version_mismatch_misses_and_clears() {
        let specs = [(1, false)];
        let (store, validator) = seeded(&specs, TREE_CACHE_VERSION - 1).await;
        let window = WindowId::new(1);
        let validation = validator
            .validate(window, &tabs(&specs), ValidateOptions::default())
            .await;
        assert_eq!(
            validation,
            Validation::Miss(MissReason::VersionMismatch {
                found: TREE_CACHE_VERSION - 1,
                expected: TREE_CACHE_VERSION,
            })
        );
        assert!(store.backend().keys(window).is_empty());
    }

    #[tokio::test]
    async fn require_exact_rejects_appended_tabs() {
        let specs = [(1, false), (2, false)];
        let (_, validator) = seeded(&specs, TREE_CACHE_VERSION).await;
        let live = tabs(&[(1, false), (2, false), (3, false)]);
        let options = ValidateOptions {
            require_exact: true,
            ..ValidateOptions::default()
        };
        let validation = validator.validate(WindowId::new(1), &live, options).await;
        assert_eq!(validation, Validation::Miss(MissReason::SignatureMismatch));
    }

    #[tokio::test]
    async fn ignoring_pinned_tabs_trims_markup_and_signature() {
        let specs = [(1, true), (2, false), (3, false)];
        let (_, validator) = seeded(&specs, TREE_CACHE_VERSION).await;
        let options = ValidateOptions {
            ignore_pinned_tabs: true,
            ..ValidateOptions::default()
        };
        let validation = validator
            .validate(WindowId::new(1), &tabs(&specs), options)
            .await;
        let Validation::Hit(hit) = validation else {
            panic!("expected hit, got {validation:?}");
        };
        assert_eq!(hit.offset, 1);
        assert_eq!(hit.cache.pinned_tabs_count, 0);
        assert_eq!(hit.cache.tabs, markup(&[(2, false), (3, false)]));
    }

    #[tokio::test]
    async fn only_pinned_tabs_cached_is_an_empty_signature() {
        let specs = [(1, true)];
        let (_, validator) = seeded(&specs, TREE_CACHE_VERSION).await;
        let options = ValidateOptions {
            ignore_pinned_tabs: true,
            ..ValidateOptions::default()
        };
        let validation = validator
            .validate(WindowId::new(1), &tabs(&specs), options)
            .await;
        assert_eq!(validation, Validation::Miss(MissReason::EmptySignature));
    }

    #[tokio::test]
    async fn missing_slots_are_misses() {
        let store = Rc::new(CacheStore::new(MemoryWindowStore::new()));
        let validator = CacheValidator::new(Rc::clone(&store));
        let window = WindowId::new(1);
        let live = tabs(&[(1, false)]);
        assert_eq!(
            validator.validate(window, &live, ValidateOptions::default()).await,
            Validation::Miss(MissReason::NoEntry)
        );

        let tree = CachedTree {
            version: TREE_CACHE_VERSION,
            tabs: markup(&[(1, false)]),
            pinned_tabs_count: 0,
        };
        store.store_tree(window, &tree).await;
        assert_eq!(
            validator.validate(window, &live, ValidateOptions::default()).await,
            Validation::Miss(MissReason::NoSignature)
        );
    }
}
