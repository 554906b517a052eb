//! Editing-surface contract.
//!
//! A [`TextModel`] is a mutable text buffer. A [`CodeEditor`] is one
//! view onto a model (split views share a model) with its own selection,
//! decorations and content widgets. Hosts implement both traits for
//! their widget toolkit; [`memory`] provides headless implementations.
//!
//! All offsets are UTF-8 byte offsets into the buffer. Line/column
//! positions are zero-based, with columns counted in characters.

pub mod memory;

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SyncError;
use crate::event::Subscription;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    pub fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of an editor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditorId(u64);

impl EditorId {
    pub fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelectionDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

/// A selection with `start <= end`; `direction` says which end is the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
    pub direction: SelectionDirection,
}

impl Selection {
    pub fn new(start: Position, end: Position, direction: SelectionDirection) -> Self {
        if end < start {
            Self { start: end, end: start, direction }
        } else {
            Self { start, end, direction }
        }
    }

    pub fn caret(position: Position) -> Self {
        Self::new(position, position, SelectionDirection::LeftToRight)
    }

    pub fn from_anchor_head(anchor: Position, head: Position) -> Self {
        if head < anchor {
            Self::new(head, anchor, SelectionDirection::RightToLeft)
        } else {
            Self::new(anchor, head, SelectionDirection::LeftToRight)
        }
    }

    pub fn anchor(&self) -> Position {
        match self.direction {
            SelectionDirection::LeftToRight => self.start,
            SelectionDirection::RightToLeft => self.end,
        }
    }

    pub fn head(&self) -> Position {
        match self.direction {
            SelectionDirection::LeftToRight => self.end,
            SelectionDirection::RightToLeft => self.start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Replace `length` bytes at `offset` with `text`.
///
/// Within one batch, offsets refer to the buffer as it was before the
/// batch and edits do not overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub offset: usize,
    pub length: usize,
    pub text: String,
}

impl TextEdit {
    pub fn new(offset: usize, length: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            length,
            text: text.into(),
        }
    }

    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset, 0, text)
    }

    pub fn delete(offset: usize, length: usize) -> Self {
        Self::new(offset, length, String::new())
    }
}

/// Notification that a model's content changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    pub changes: Vec<TextEdit>,
    /// Version of the model after the change.
    pub version: u64,
    /// The whole content was replaced.
    pub is_flush: bool,
}

/// Listener for content changes. Errors propagate back to whoever
/// triggered the change.
pub type ContentListener = Box<dyn Fn(&ContentChange) -> Result<(), SyncError>>;

pub type SelectionListener = Box<dyn Fn(&Selection)>;

/// A mutable text buffer.
pub trait TextModel {
    fn id(&self) -> ModelId;

    fn text(&self) -> String;

    /// Length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole content.
    fn set_text(&self, text: &str) -> Result<(), SyncError>;

    /// Apply a batch of edits atomically and notify once.
    fn apply_edits(&self, edits: &[TextEdit]) -> Result<(), SyncError>;

    /// Line/column of a byte offset, clamped to the buffer.
    fn position_at(&self, offset: usize) -> Position;

    /// Byte offset of a line/column, clamped to the buffer.
    fn offset_at(&self, position: Position) -> usize;

    fn on_did_change_content(&self, listener: ContentListener) -> Subscription;
}

/// Handle returned by [`CodeEditor::delta_decorations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecorationId(pub u64);

/// A range highlight with optional inline markers at either end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub range: Range,
    pub class_name: String,
    pub before_content_class: Option<String>,
    pub after_content_class: Option<String>,
}

/// A widget anchored at a text position, laid out by the editor.
pub trait ContentWidget {
    fn id(&self) -> &str;

    fn label(&self) -> &str;

    /// Where to draw the widget; `None` hides it.
    fn position(&self) -> Option<Position>;
}

/// One view onto a [`TextModel`].
pub trait CodeEditor {
    fn id(&self) -> EditorId;

    /// The model currently displayed, if any.
    fn model(&self) -> Option<Rc<dyn TextModel>>;

    fn selection(&self) -> Option<Selection>;

    fn set_selection(&self, selection: Selection);

    fn on_did_change_cursor_selection(&self, listener: SelectionListener) -> Subscription;

    /// Replace the decorations identified by `old` with `new`.
    fn delta_decorations(&self, old: &[DecorationId], new: Vec<Decoration>) -> Vec<DecorationId>;

    fn add_content_widget(&self, widget: Rc<dyn ContentWidget>);

    fn remove_content_widget(&self, widget_id: &str);

    /// Re-read the widget's position and lay it out again.
    fn layout_content_widget(&self, widget_id: &str);
}

/// Whether `editor` currently displays `model`.
pub fn displays(editor: &dyn CodeEditor, model: &dyn TextModel) -> bool {
    editor.model().is_some_and(|m| m.id() == model.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_normalizes_order() {
        let sel = Selection::new(Position::new(2, 0), Position::new(1, 4), SelectionDirection::LeftToRight);
        assert_eq!(sel.start, Position::new(1, 4));
        assert_eq!(sel.end, Position::new(2, 0));
    }

    #[test]
    fn test_selection_anchor_head() {
        let sel = Selection::from_anchor_head(Position::new(0, 8), Position::new(0, 2));
        assert_eq!(sel.direction, SelectionDirection::RightToLeft);
        assert_eq!(sel.anchor(), Position::new(0, 8));
        assert_eq!(sel.head(), Position::new(0, 2));
        assert_eq!(sel.start, Position::new(0, 2));
    }

    #[test]
    fn test_caret_is_empty() {
        assert!(Selection::caret(Position::new(3, 3)).is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ModelId::next(), ModelId::next());
        assert_ne!(EditorId::next(), EditorId::next());
    }
}
