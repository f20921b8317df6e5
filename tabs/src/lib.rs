use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use util::IdGenerator;

/// Stable identifier for a browser tab.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TabId(u64);

impl TabId {
    /// Creates a new `TabId` from a raw numeric value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a browser window. Tab ids are scoped to their window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WindowId(u64);

impl WindowId {
    /// Creates a new `WindowId` from a raw numeric value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live tab record as reported by the host.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    pub url: String,
    pub pinned: bool,
    /// Ordinal position inside the window.
    pub index: usize,
}

/// Host tab-query interface.
#[allow(async_fn_in_trait)]
pub trait TabQuery {
    /// Returns the live tabs of a window ordered by position.
    async fn query(&self, window: WindowId) -> Vec<Tab>;
}

impl<T: TabQuery> TabQuery for Rc<T> {
    async fn query(&self, window: WindowId) -> Vec<Tab> {
        T::query(self, window).await
    }
}

/// Minimal in-memory tab host.
///
/// Keeps the browser ordering rule that pinned tabs always precede unpinned
/// ones inside a window.
#[derive(Debug, Default)]
pub struct BasicTabManager {
    windows: RefCell<HashMap<WindowId, Vec<Tab>>>,
    ids: IdGenerator,
}

impl BasicTabManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new unpinned tab at the end of the window.
    pub fn create_tab(&self, window: WindowId, url: &str) -> Tab {
        let tab = Tab {
            id: TabId::new(self.ids.next()),
            window_id: window,
            url: url.to_string(),
            pinned: false,
            index: 0,
        };
        let mut windows = self.windows.borrow_mut();
        let tabs = windows.entry(window).or_default();
        tabs.push(tab);
        reindex(tabs);
        tabs[tabs.len() - 1].clone()
    }

    /// Pins or unpins a tab, moving it to the boundary between the pinned
    /// and unpinned blocks.
    pub fn set_pinned(&self, id: TabId, pinned: bool) -> bool {
        self.with_window_of(id, |tabs, position| {
            let mut tab = tabs.remove(position);
            tab.pinned = pinned;
            let boundary = tabs.iter().take_while(|tab| tab.pinned).count();
            tabs.insert(boundary, tab);
        })
    }

    /// Moves a tab to the given position, clamped into its pinned or
    /// unpinned block.
    pub fn move_tab(&self, id: TabId, index: usize) -> bool {
        self.with_window_of(id, |tabs, position| {
            let tab = tabs.remove(position);
            let pinned_count = tabs.iter().take_while(|tab| tab.pinned).count();
            let target = if tab.pinned {
                index.min(pinned_count)
            } else {
                index.clamp(pinned_count, tabs.len())
            };
            tabs.insert(target, tab);
        })
    }

    pub fn set_url(&self, id: TabId, url: &str) -> bool {
        self.with_window_of(id, |tabs, position| {
            tabs[position].url = url.to_string();
        })
    }

    pub fn remove_tab(&self, id: TabId) -> bool {
        self.with_window_of(id, |tabs, position| {
            tabs.remove(position);
        })
    }

    /// Returns the ordered tabs of a window.
    pub fn tabs(&self, window: WindowId) -> Vec<Tab> {
        self.windows
            .borrow()
            .get(&window)
            .cloned()
            .unwrap_or_default()
    }

    fn with_window_of<F: FnOnce(&mut Vec<Tab>, usize)>(&self, id: TabId, f: F) -> bool {
        let mut windows = self.windows.borrow_mut();
        for tabs in windows.values_mut() {
            if let Some(position) = tabs.iter().position(|tab| tab.id == id) {
                f(tabs, position);
                reindex(tabs);
                return true;
            }
        }
        false
    }
}

impl TabQuery for BasicTabManager {
    async fn query(&self, window: WindowId) -> Vec<Tab> {
        self.tabs(window)
    }
}

fn reindex(tabs: &mut [Tab]) {
    for (index, tab) in tabs.iter_mut().enumerate() {
        tab.index = index;
    }
}
