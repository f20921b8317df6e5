//! Markup reader and writer for the sidebar document.
//!
//! Reading runs the html5ever tokenizer and builds detached nodes from its
//! tokens; elements must be closed explicitly, there is no implied-end-tag
//! recovery. Writing goes through the html5ever serializer.

use std::io;

use html5ever::serialize::{serialize, Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::tendril::StrTendril;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use html5ever::{namespace_url, ns, LocalName, QualName};
use thiserror::Error;

use crate::document::{Document, NodeId, NodeKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarkupError {
    #[error("malformed markup on line {line}: {message}")]
    Malformed { line: u64, message: String },

    #[error("closing tag </{found}> on line {line} does not match <{expected}>")]
    MismatchedClosingTag {
        line: u64,
        expected: String,
        found: String,
    },

    #[error("closing tag </{tag}> on line {line} has no open element")]
    UnexpectedClosingTag { line: u64, tag: String },

    #[error("<{tag}> is never closed")]
    UnclosedElement { tag: String },

    #[error("markup contains no element")]
    NoElement,
}

/// Parses `markup` into detached nodes owned by `document` and returns the
/// top-level nodes. Nothing is left behind in the arena on error.
pub(crate) fn parse_into(
    document: &mut Document,
    markup: &str,
) -> Result<Vec<NodeId>, MarkupError> {
    let mut input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(markup));

    let mut tokenizer = Tokenizer::new(FragmentBuilder::new(document), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink.finish()
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Token sink that attaches elements and text as they arrive.
struct FragmentBuilder<'d> {
    document: &'d mut Document,
    roots: Vec<NodeId>,
    open: Vec<(NodeId, LocalName)>,
    text: String,
    error: Option<MarkupError>,
}

impl<'d> FragmentBuilder<'d> {
    fn new(document: &'d mut Document) -> Self {
        Self {
            document,
            roots: Vec::new(),
            open: Vec::new(),
            text: String::new(),
            error: None,
        }
    }

    fn apply(&mut self, token: Token, line: u64) -> Result<(), MarkupError> {
        match token {
            Token::CharacterTokens(text) => self.text.push_str(&text),
            Token::NullCharacterToken => self.text.push('\u{fffd}'),
            Token::TagToken(tag) => {
                self.flush_text();
                match tag.kind {
                    TagKind::StartTag => self.open_element(tag),
                    TagKind::EndTag => self.close_element(&tag.name, line)?,
                }
            }
            Token::CommentToken(_) | Token::DoctypeToken(_) | Token::EOFToken => {
                self.flush_text();
            }
            Token::ParseError(message) => {
                return Err(MarkupError::Malformed {
                    line,
                    message: message.into_owned(),
                })
            }
        }
        Ok(())
    }

    fn attach(&mut self, node: NodeId) {
        match self.open.last() {
            Some((parent, _)) => {
                // Parent is a freshly created element and `node` is detached.
                let _ = self.document.append_child(*parent, node);
            }
            None => self.roots.push(node),
        }
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let node = self.document.create_text(&text);
        self.attach(node);
    }

    fn open_element(&mut self, tag: Tag) {
        let node = self.document.create_element(&tag.name);
        if let Ok(element) = self.document.element_mut(node) {
            for attribute in &tag.attrs {
                element.set_attribute(&attribute.name.local, attribute.value.to_string());
            }
        }
        self.attach(node);
        if !tag.self_closing && !is_void(&tag.name) {
            self.open.push((node, tag.name));
        }
    }

    fn close_element(&mut self, name: &LocalName, line: u64) -> Result<(), MarkupError> {
        match self.open.pop() {
            Some((_, expected)) if expected == *name => Ok(()),
            Some((_, expected)) => Err(MarkupError::MismatchedClosingTag {
                line,
                expected: expected.to_string(),
                found: name.to_string(),
            }),
            None => Err(MarkupError::UnexpectedClosingTag {
                line,
                tag: name.to_string(),
            }),
        }
    }

    fn finish(&mut self) -> Result<Vec<NodeId>, MarkupError> {
        self.flush_text();
        let failure = match (self.error.take(), self.open.last()) {
            (Some(err), _) => Some(err),
            (None, Some((_, tag))) => Some(MarkupError::UnclosedElement {
                tag: tag.to_string(),
            }),
            (None, None) => None,
        };
        let roots = std::mem::take(&mut self.roots);
        let Some(err) = failure else {
            return Ok(roots);
        };
        for root in roots {
            let _ = self.document.remove(root);
        }
        Err(err)
    }
}

impl TokenSink for FragmentBuilder<'_> {
    type Handle = ();

    fn process_token(&mut self, token: Token, line_number: u64) -> TokenSinkResult<()> {
        if self.error.is_none() {
            if let Err(err) = self.apply(token, line_number) {
                self.error = Some(err);
            }
        }
        TokenSinkResult::Continue
    }
}

/// A node and its descendants, as seen by the serializer.
struct Subtree<'a> {
    document: &'a Document,
    node: NodeId,
}

impl Subtree<'_> {
    fn serialize_children<S: Serializer>(&self, serializer: &mut S) -> io::Result<()> {
        for child in self.document.children(self.node) {
            let child = Subtree {
                document: self.document,
                node: *child,
            };
            child.serialize(serializer, TraversalScope::IncludeNode)?;
        }
        Ok(())
    }
}

impl Serialize for Subtree<'_> {
    fn serialize<S>(&self, serializer: &mut S, traversal_scope: TraversalScope) -> io::Result<()>
    where
        S: Serializer,
    {
        let include_node = matches!(traversal_scope, TraversalScope::IncludeNode);
        match self.document.kind(self.node) {
            Some(NodeKind::Text(text)) if include_node => serializer.write_text(text),
            Some(NodeKind::Element(element)) if include_node => {
                let name = QualName::new(None, ns!(html), LocalName::from(element.tag()));
                let attributes: Vec<(QualName, &str)> = element
                    .attributes()
                    .map(|(name, value)| {
                        (QualName::new(None, ns!(), LocalName::from(name)), value)
                    })
                    .collect();
                serializer.start_elem(
                    name.clone(),
                    attributes.iter().map(|(name, value)| (name, *value)),
                )?;
                self.serialize_children(serializer)?;
                serializer.end_elem(name)
            }
            Some(NodeKind::Element(_)) => self.serialize_children(serializer),
            Some(NodeKind::Text(_)) | None => Ok(()),
        }
    }
}

/// Serializes `node`, or only its children for [`TraversalScope::ChildrenOnly`].
pub(crate) fn write_node(
    document: &Document,
    node: NodeId,
    traversal_scope: TraversalScope,
) -> String {
    let mut out = Vec::new();
    let opts = SerializeOpts {
        traversal_scope,
        ..SerializeOpts::default()
    };
    // Writing into a Vec cannot fail.
    let _ = serialize(&mut out, &Subtree { document, node }, opts);
    String::from_utf8_lossy(&out).into_owned()
}
