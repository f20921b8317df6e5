//! Order-sensitive fingerprints of a window's tab list.

use std::fmt;

use serde::{Deserialize, Serialize};
use tabs::Tab;

/// One line per tab, in tab order, joined with `\n`.
///
/// Each line is `<tab id>:<pinned 0|1>:<percent-encoded url>`. Encoding the
/// URL keeps every line free of separators, so equal signatures imply equal
/// tab lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

/// How a stored signature lines up with the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Same lines in the same order.
    Exact,
    /// Stored lines lead the live ones; the count of live lines after them.
    Appended(usize),
    /// Stored lines trail the live ones; the count of live lines before them.
    Prepended(usize),
}

impl Coverage {
    /// Live lines not represented by the stored signature.
    pub fn offset(self) -> usize {
        match self {
            Self::Exact => 0,
            Self::Appended(extra) | Self::Prepended(extra) => extra,
        }
    }
}

impl Signature {
    pub fn produce(tabs: &[Tab]) -> Self {
        let lines: Vec<String> = tabs
            .iter()
            .map(|tab| {
                format!(
                    "{}:{}:{}",
                    tab.id,
                    u8::from(tab.pinned),
                    urlencoding::encode(&tab.url)
                )
            })
            .collect();
        Self(lines.join("\n"))
    }

    /// Wraps an already serialized signature.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty lines in order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.split('\n').filter(|line| !line.is_empty())
    }

    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    pub fn is_empty(&self) -> bool {
        self.line_count() == 0
    }

    /// Drops the first `count` lines.
    pub fn trim(&self, count: usize) -> Self {
        let rest: Vec<&str> = self.lines().skip(count).collect();
        Self(rest.join("\n"))
    }

    /// Exact, line-for-line equality.
    pub fn matches(&self, cached: &Signature) -> bool {
        self.lines().eq(cached.lines())
    }

    /// Relates a stored signature to this live one. Only contiguous runs
    /// anchored at either end count; removals, reorders and insertions in
    /// the middle yield `None`, as does an empty stored signature.
    pub fn coverage_of(&self, stored: &Signature) -> Option<Coverage> {
        let live: Vec<&str> = self.lines().collect();
        let cached: Vec<&str> = stored.lines().collect();
        if cached.is_empty() || cached.len() > live.len() {
            return None;
        }
        let extra = live.len() - cached.len();
        if extra == 0 {
            return (live == cached).then_some(Coverage::Exact);
        }
        if live[..cached.len()] == cached[..] {
            Some(Coverage::Appended(extra))
        } else if live[extra..] == cached[..] {
            Some(Coverage::Prepended(extra))
        } else {
            None
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
