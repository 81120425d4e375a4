//! Comment side channel
//!
//! Comments are not part of the element tree. Each one is recorded with a locator
//! naming the node it sticks to and the slot relative to that node, so both
//! emitters can put it back in the same place.

/// Where a comment sits relative to its anchor node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// Immediately before the node
    Before,
    /// After the node's last child, before it closes
    End,
    /// Inside a documentation block, before line `k` (`k == len` means after the last line)
    InDoc(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub annotation: String,
    pub slot: Slot,
    /// 1-based source line of the comment's first line
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub lines: Vec<String>,
    pub locator: Locator,
}

/// Ordered sequence of comments with their locators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentStream {
    comments: Vec<Comment>,
}

impl CommentStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        lines: Vec<String>,
        annotation: impl Into<String>,
        slot: Slot,
        line: usize,
    ) {
        self.comments.push(Comment {
            lines,
            locator: Locator {
                annotation: annotation.into(),
                slot,
                line,
            },
        });
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter()
    }

    /// Comments attached to `annotation` at `slot`, in source order
    pub fn anchored<'a>(
        &'a self,
        annotation: &'a str,
        slot: Slot,
    ) -> impl Iterator<Item = &'a Comment> + 'a {
        self.comments
            .iter()
            .filter(move |c| c.locator.annotation == annotation && c.locator.slot == slot)
    }

    pub fn has(&self, annotation: &str, slot: Slot) -> bool {
        self.anchored(annotation, slot).next().is_some()
    }

    /// Any comment anchored on `annotation` or a node below it, except `Before` the node itself
    pub fn has_within(&self, annotation: &str) -> bool {
        let nested = format!("{annotation}/");
        self.comments.iter().any(|c| {
            (c.locator.annotation == annotation && c.locator.slot != Slot::Before)
                || c.locator.annotation.starts_with(&nested)
        })
    }

    /// Placement signature ignoring source lines, for comparing two parses.
    /// Sorted by anchor; comments sharing an anchor keep their source order.
    pub fn placements(&self) -> Vec<(&str, Slot, &[String])> {
        let mut placements: Vec<_> = self
            .comments
            .iter()
            .map(|c| (c.locator.annotation.as_str(), c.locator.slot, c.lines.as_slice()))
            .collect();
        placements.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        placements
    }
}

/// Split raw comment content into normalised lines
pub fn comment_lines(raw: &str) -> Vec<String> {
    crate::syntax::normalize_lines(raw.split('\n').map(str::to_string).collect())
}
