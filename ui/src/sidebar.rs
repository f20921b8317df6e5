//! Layout conventions of the tab tree sidebar.
//!
//! ```text
//! <body>
//!   <div id="all-tabs">
//!     <ul class="tabs" id="window-{window}" data-window-id="{window}">
//!       <li class="tab pinned" id="tab-{window}-{tab}" data-tab-id=.. data-url=..>
//!         <span class="label">..</span>
//!       </li>
//!     </ul>
//!   </div>
//! </body>
//! ```

use tabs::{Tab, WindowId};

use crate::document::{Document, DocumentEditor, DocumentError, InsertionPoint, NodeId};
use crate::markup::MarkupError;

pub const ALL_TABS_ID: &str = "all-tabs";

const DIRTY_ATTRIBUTE: &str = "data-cache-dirty";
const ALL_TABS_RESTORED_ATTRIBUTE: &str = "data-all-tabs-restored";

/// Creates an empty sidebar document with the global tab list container.
pub fn create_sidebar() -> Document {
    let mut document = Document::new("body");
    let all_tabs = document.create_element("div");
    if let Ok(element) = document.element_mut(all_tabs) {
        element.set_attribute("id", ALL_TABS_ID);
    }
    let root = document.root();
    let _ = document.append_child(root, all_tabs);
    document
}

pub fn all_tabs_node(document: &Document) -> Option<NodeId> {
    document.find_by_id(ALL_TABS_ID)
}

pub fn container_dom_id(window: WindowId) -> String {
    format!("window-{window}")
}

pub fn tab_dom_id(tab: &Tab) -> String {
    format!("tab-{}-{}", tab.window_id, tab.id)
}

pub fn tabs_container(document: &Document, window: WindowId) -> Option<NodeId> {
    document.find_by_id(&container_dom_id(window))
}

/// Tab elements of a container in display order.
pub fn tab_elements(document: &Document, container: NodeId) -> Vec<NodeId> {
    document.element_children(container)
}

/// Tab elements of a window, empty when the window has no container.
pub fn all_tabs(document: &Document, window: WindowId) -> Vec<NodeId> {
    tabs_container(document, window)
        .map(|container| tab_elements(document, container))
        .unwrap_or_default()
}

pub fn pinned_tab_count(document: &Document, container: NodeId) -> usize {
    tab_elements(document, container)
        .into_iter()
        .filter(|tab| {
            document
                .element(*tab)
                .is_some_and(|element| element.has_class("pinned"))
        })
        .count()
}

/// Gives a container the canonical identity of `window`.
pub fn assign_window(
    document: &mut Document,
    container: NodeId,
    window: WindowId,
) -> Result<(), DocumentError> {
    let element = document.element_mut(container)?;
    element.set_attribute("id", container_dom_id(window));
    element.set_attribute("data-window-id", window.to_string());
    Ok(())
}

/// Default splice position: right after the window's container when it
/// exists, otherwise at the end of the global tab list.
pub fn default_insertion_point(document: &Document, window: WindowId) -> Option<InsertionPoint> {
    if let Some(container) = tabs_container(document, window) {
        let parent = document.parent(container)?;
        let index = document.index_in_parent(container)?;
        return Some(InsertionPoint::new(parent, index + 1));
    }
    let all_tabs = all_tabs_node(document)?;
    Some(InsertionPoint::new(all_tabs, document.children(all_tabs).len()))
}

/// Builds a detached tab element for `tab`.
pub fn render_tab(document: &mut Document, tab: &Tab) -> Result<NodeId, DocumentError> {
    let li = document.create_element("li");
    document.element_mut(li)?.set_attribute("class", "tab");
    let label = document.create_element("span");
    document.element_mut(label)?.set_attribute("class", "label");
    document.set_text_content(label, &tab.url)?;
    document.append_child(li, label)?;
    apply_tab_state(document, li, tab)?;
    Ok(li)
}

/// Re-attaches the live identity of `tab` to an existing tab element.
pub fn apply_tab_state(
    document: &mut Document,
    element: NodeId,
    tab: &Tab,
) -> Result<(), DocumentError> {
    let element = document.element_mut(element)?;
    element.set_attribute("id", tab_dom_id(tab));
    element.set_attribute("data-tab-id", tab.id.to_string());
    element.set_attribute("data-url", tab.url.as_str());
    element.toggle_class("pinned", tab.pinned);
    Ok(())
}

/// Flags a restored element so its derived state is recomputed instead of
/// trusted from the cached markup.
pub fn mark_dirty(document: &mut Document, element: NodeId) -> Result<(), DocumentError> {
    document
        .element_mut(element)?
        .set_attribute(DIRTY_ATTRIBUTE, "true");
    Ok(())
}

pub fn is_dirty(document: &Document, element: NodeId) -> bool {
    document
        .element(element)
        .and_then(|element| element.attribute(DIRTY_ATTRIBUTE))
        == Some("true")
}

/// Recomputes the label of every dirty tab of a window from its live
/// attributes and clears the flag. Returns how many tabs were refreshed.
pub fn refresh_dirty_tabs(
    document: &mut Document,
    window: WindowId,
) -> Result<usize, DocumentError> {
    let mut refreshed = 0;
    for tab in all_tabs(document, window) {
        if !is_dirty(document, tab) {
            continue;
        }
        let url = document
            .element(tab)
            .and_then(|element| element.attribute("data-url"))
            .unwrap_or_default()
            .to_string();
        let labels: Vec<NodeId> = document
            .element_children(tab)
            .into_iter()
            .filter(|child| {
                document
                    .element(*child)
                    .is_some_and(|element| element.has_class("label"))
            })
            .collect();
        for label in labels {
            document.set_text_content(label, &url)?;
        }
        document.element_mut(tab)?.remove_attribute(DIRTY_ATTRIBUTE);
        refreshed += 1;
    }
    Ok(refreshed)
}

/// Marks whether a window is still being populated by session restore and
/// therefore not a cache candidate. Returns `false` if the window has no
/// container.
pub fn set_all_tabs_restored(document: &mut Document, window: WindowId, restored: bool) -> bool {
    let Some(container) = tabs_container(document, window) else {
        return false;
    };
    let Ok(element) = document.element_mut(container) else {
        return false;
    };
    if restored {
        element.set_attribute(ALL_TABS_RESTORED_ATTRIBUTE, "true");
    } else {
        element.remove_attribute(ALL_TABS_RESTORED_ATTRIBUTE);
    }
    true
}

pub fn all_tabs_restored(document: &Document, container: NodeId) -> bool {
    document
        .element(container)
        .and_then(|element| element.attribute(ALL_TABS_RESTORED_ATTRIBUTE))
        == Some("true")
}

/// Full reconstruction of a window's container from live tabs, replacing any
/// existing container. This is the path taken whenever the cache misses.
pub fn render_window(
    document: &mut Document,
    window: WindowId,
    tabs: &[Tab],
) -> Result<NodeId, DocumentError> {
    let point = default_insertion_point(document, window);
    let mut point = match point {
        Some(point) => point,
        None => {
            let all_tabs = document.create_element("div");
            document.element_mut(all_tabs)?.set_attribute("id", ALL_TABS_ID);
            let root = document.root();
            document.append_child(root, all_tabs)?;
            InsertionPoint::new(all_tabs, 0)
        }
    };
    if let Some(old) = tabs_container(document, window) {
        // The point sits right after the old container.
        document.remove(old)?;
        point.index -= 1;
    }

    let container = document.create_element("ul");
    document.element_mut(container)?.set_attribute("class", "tabs");
    assign_window(document, container, window)?;
    for tab in tabs {
        let element = render_tab(document, tab)?;
        document.append_child(container, element)?;
    }
    document.insert_child(point.parent, point.index, container)?;
    Ok(container)
}

/// Drops the first `count` tab elements from serialized container markup.
pub fn trim_tabs_markup(markup: &str, count: usize) -> Result<String, MarkupError> {
    let mut scratch = Document::new("body");
    let fragment = scratch.parse_fragment(markup)?;
    let Some(container) = fragment
        .roots()
        .iter()
        .copied()
        .find(|root| scratch.element(*root).is_some())
    else {
        scratch.discard(fragment);
        return Err(MarkupError::NoElement);
    };
    for tab in tab_elements(&scratch, container).into_iter().take(count) {
        let _ = scratch.remove(tab);
    }
    let trimmed = scratch.outer_markup(container);
    scratch.discard(fragment);
    Ok(trimmed)
}

/// Compact `tab-id:url` listing of a window's tab elements for debug logs.
pub fn describe_tabs(document: &Document, window: WindowId) -> Vec<String> {
    all_tabs(document, window)
        .into_iter()
        .filter_map(|tab| document.element(tab))
        .map(|element| {
            format!(
                "{}:{}{}",
                element.attribute("data-tab-id").unwrap_or("?"),
                element.attribute("data-url").unwrap_or_default(),
                if element.has_class("pinned") { " (pinned)" } else { "" },
            )
        })
        .collect()
}
