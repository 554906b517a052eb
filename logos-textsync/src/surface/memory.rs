//! Headless, String-backed editing surface.
//!
//! Used by tests, benches and the session demo. The editor records
//! decorations, widgets and layout requests so they can be inspected.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{
    CodeEditor, ContentChange, ContentListener, ContentWidget, Decoration, DecorationId, EditorId,
    ModelId, Position, Selection, SelectionListener, TextEdit, TextModel,
};
use crate::error::SyncError;
use crate::event::{Emitter, Subscription};

// ───────────────────────────────────────────────────────────────────
// Model
// ───────────────────────────────────────────────────────────────────

pub struct MemoryModel {
    id: ModelId,
    text: RefCell<String>,
    version: Cell<u64>,
    content_changed: Emitter<ContentChange, Result<(), SyncError>>,
}

impl MemoryModel {
    pub fn new(text: &str) -> Rc<Self> {
        Rc::new(Self {
            id: ModelId::next(),
            text: RefCell::new(text.to_string()),
            version: Cell::new(1),
            content_changed: Emitter::new(),
        })
    }

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    fn notify(&self, changes: Vec<TextEdit>, is_flush: bool) -> Result<(), SyncError> {
        let version = self.version.get() + 1;
        self.version.set(version);
        let change = ContentChange {
            changes,
            version,
            is_flush,
        };
        self.content_changed
            .emit(&change)
            .into_iter()
            .find(Result::is_err)
            .unwrap_or(Ok(()))
    }

    /// Clamp `offset` into the buffer and back onto a character boundary.
    fn clamp(text: &str, offset: usize) -> usize {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}

impl TextModel for MemoryModel {
    fn id(&self) -> ModelId {
        self.id
    }

    fn text(&self) -> String {
        self.text.borrow().clone()
    }

    fn len(&self) -> usize {
        self.text.borrow().len()
    }

    fn set_text(&self, text: &str) -> Result<(), SyncError> {
        let old_len = {
            let mut current = self.text.borrow_mut();
            let old_len = current.len();
            *current = text.to_string();
            old_len
        };
        self.notify(vec![TextEdit::new(0, old_len, text)], true)
    }

    fn apply_edits(&self, edits: &[TextEdit]) -> Result<(), SyncError> {
        if edits.is_empty() {
            return Ok(());
        }
        {
            let mut text = self.text.borrow_mut();
            let len = text.len();

            let mut ordered: Vec<&TextEdit> = edits.iter().collect();
            ordered.sort_by(|a, b| b.offset.cmp(&a.offset));

            // Descending order: each edit must end before the previous one starts.
            let mut upper = len;
            for edit in &ordered {
                let valid = edit.offset.checked_add(edit.length).is_some_and(|end| {
                    end <= upper && text.is_char_boundary(edit.offset) && text.is_char_boundary(end)
                });
                if !valid {
                    return Err(SyncError::InvalidEdit {
                        offset: edit.offset,
                        length: edit.length,
                        len,
                    });
                }
                upper = edit.offset;
            }

            for edit in ordered {
                text.replace_range(edit.offset..edit.offset + edit.length, &edit.text);
            }
        }
        self.notify(edits.to_vec(), false)
    }

    fn position_at(&self, offset: usize) -> Position {
        let text = self.text.borrow();
        let offset = Self::clamp(&text, offset);
        let before = &text[..offset];
        let line = before.matches('\n').count() as u32;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = text[line_start..offset].chars().count() as u32;
        Position::new(line, column)
    }

    fn offset_at(&self, position: Position) -> usize {
        let text = self.text.borrow();
        let mut line_start = 0;
        for _ in 0..position.line {
            match text[line_start..].find('\n') {
                Some(i) => line_start += i + 1,
                None => return text.len(),
            }
        }
        let line_end = text[line_start..]
            .find('\n')
            .map_or(text.len(), |i| line_start + i);
        let line = &text[line_start..line_end];
        line_start
            + line
                .char_indices()
                .nth(position.column as usize)
                .map_or(line.len(), |(i, _)| i)
    }

    fn on_did_change_content(&self, listener: ContentListener) -> Subscription {
        self.content_changed.subscribe(listener)
    }
}

// ───────────────────────────────────────────────────────────────────
// Editor
// ───────────────────────────────────────────────────────────────────

pub struct MemoryEditor {
    id: EditorId,
    model: RefCell<Option<Rc<dyn TextModel>>>,
    selection: RefCell<Option<Selection>>,
    selection_changed: Emitter<Selection>,
    decorations: RefCell<BTreeMap<DecorationId, Decoration>>,
    next_decoration: Cell<u64>,
    widgets: RefCell<BTreeMap<String, Rc<dyn ContentWidget>>>,
    layout_requests: Cell<usize>,
}

impl MemoryEditor {
    pub fn new(model: Rc<dyn TextModel>) -> Rc<Self> {
        let editor = Self::detached();
        editor.set_model(Some(model));
        editor
    }

    /// An editor with no model attached.
    pub fn detached() -> Rc<Self> {
        Rc::new(Self {
            id: EditorId::next(),
            model: RefCell::new(None),
            selection: RefCell::new(None),
            selection_changed: Emitter::new(),
            decorations: RefCell::new(BTreeMap::new()),
            next_decoration: Cell::new(1),
            widgets: RefCell::new(BTreeMap::new()),
            layout_requests: Cell::new(0),
        })
    }

    /// Switch the displayed model; the selection collapses to the start.
    pub fn set_model(&self, model: Option<Rc<dyn TextModel>>) {
        let has_model = model.is_some();
        *self.model.borrow_mut() = model;
        *self.selection.borrow_mut() = has_model.then(|| Selection::caret(Position::default()));
    }

    /// Select by byte offsets into the current model.
    pub fn select_offsets(&self, anchor: usize, head: usize) {
        let Some(model) = self.model() else {
            return;
        };
        let selection = Selection::from_anchor_head(model.position_at(anchor), model.position_at(head));
        self.set_selection(selection);
    }

    /// The selection as `(start, end)` byte offsets.
    pub fn selection_offsets(&self) -> Option<(usize, usize)> {
        let model = self.model()?;
        let selection = self.selection()?;
        Some((model.offset_at(selection.start), model.offset_at(selection.end)))
    }

    pub fn decorations(&self) -> Vec<Decoration> {
        self.decorations.borrow().values().cloned().collect()
    }

    pub fn widget_ids(&self) -> Vec<String> {
        self.widgets.borrow().keys().cloned().collect()
    }

    pub fn widget(&self, widget_id: &str) -> Option<Rc<dyn ContentWidget>> {
        self.widgets.borrow().get(widget_id).cloned()
    }

    pub fn layout_requests(&self) -> usize {
        self.layout_requests.get()
    }
}

impl CodeEditor for MemoryEditor {
    fn id(&self) -> EditorId {
        self.id
    }

    fn model(&self) -> Option<Rc<dyn TextModel>> {
        self.model.borrow().clone()
    }

    fn selection(&self) -> Option<Selection> {
        *self.selection.borrow()
    }

    fn set_selection(&self, selection: Selection) {
        *self.selection.borrow_mut() = Some(selection);
        self.selection_changed.emit(&selection);
    }

    fn on_did_change_cursor_selection(&self, listener: SelectionListener) -> Subscription {
        self.selection_changed.subscribe(listener)
    }

    fn delta_decorations(&self, old: &[DecorationId], new: Vec<Decoration>) -> Vec<DecorationId> {
        let mut decorations = self.decorations.borrow_mut();
        for id in old {
            decorations.remove(id);
        }
        new.into_iter()
            .map(|decoration| {
                let id = DecorationId(self.next_decoration.get());
                self.next_decoration.set(id.0 + 1);
                decorations.insert(id, decoration);
                id
            })
            .collect()
    }

    fn add_content_widget(&self, widget: Rc<dyn ContentWidget>) {
        self.widgets
            .borrow_mut()
            .insert(widget.id().to_string(), widget);
    }

    fn remove_content_widget(&self, widget_id: &str) {
        self.widgets.borrow_mut().remove(widget_id);
    }

    fn layout_content_widget(&self, widget_id: &str) {
        if self.widgets.borrow().contains_key(widget_id) {
            self.layout_requests.set(self.layout_requests.get() + 1);
        }
    }
}
