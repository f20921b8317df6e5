//! Document model of the tab tree sidebar.
//!
//! [`Document`] is a small ordered tree that implements the
//! [`DocumentEditor`] primitives the cache splices markup with. [`sidebar`]
//! holds the element layout conventions shared by the renderer and the
//! cache.

mod document;
pub mod markup;
pub mod sidebar;

pub use document::{
    Document, DocumentEditor, DocumentError, Element, Fragment, InsertionPoint, NodeId, NodeKind,
};
pub use markup::MarkupError;
