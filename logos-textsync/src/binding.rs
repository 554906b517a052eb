//! Two-way binding between one shared text and one local buffer.
//!
//! ```text
//!   local edit ──► on_model_changed ──► CRDT transaction (right-to-left)
//!                        │
//!                   ApplyGuard  (nested calls are dropped)
//!                        │
//! remote change ──► on_text_changed ──► buffer edits ──► restore selections
//!                                                              │
//!                                                   render_decorations()
//! ```
//!
//! Applying a change on one side synchronously fires the other side's
//! change notification. Both handlers run their apply step inside the
//! same [`ApplyGuard`], so the echo finds the guard busy and does
//! nothing. Selection snapshots and decoration rendering sit outside the
//! apply step and always run.
//!
//! Before every transaction on the shared document each attached editor's
//! selection is captured as relative positions; after a remote change has
//! been applied to the buffer those positions are resolved again, which
//! keeps a caret between the same two characters while text moves
//! around it.
//!
//! Buffers count bytes and shared texts count UTF-16 units; both edit
//! paths convert through [`crate::offset`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use yrs::{Origin, Text, TextRef, UndoManager};

use crate::awareness::Awareness;
use crate::document::{DeltaRun, SharedDocument, TextChange};
use crate::error::SyncError;
use crate::event::Subscription;
use crate::offset;
use crate::position::{RelativePosition, RelativeSelection, WirePosition, WireSelection};
use crate::presence::CursorRegistryLookup;
use crate::styles::{head_class, selection_class, REMOTE_SELECTION_CLASS, REMOTE_SELECTION_HEAD_CLASS};
use crate::surface::{
    displays, CodeEditor, ContentChange, Decoration, DecorationId, EditorId, Range, Selection,
    SelectionDirection, TextEdit, TextModel,
};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

// ───────────────────────────────────────────────────────────────────
// Reentrancy guard
// ───────────────────────────────────────────────────────────────────

/// Runs one closure at a time; a call made while another is running is
/// skipped.
#[derive(Debug, Default)]
pub struct ApplyGuard {
    busy: Cell<bool>,
}

struct Release<'a>(&'a Cell<bool>);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ApplyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` unless the guard is busy. Returns `None` if skipped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.busy.replace(true) {
            return None;
        }
        let _release = Release(&self.busy);
        Some(f())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }
}

// ───────────────────────────────────────────────────────────────────
// Binding
// ───────────────────────────────────────────────────────────────────

struct AttachedEditor {
    editor: Rc<dyn CodeEditor>,
    // None while presence is paused.
    selection_listener: Option<Subscription>,
}

/// Keeps a shared text and a local buffer in sync. Clones share state.
#[derive(Clone)]
pub struct TextBinding {
    inner: Rc<BindingInner>,
}

struct BindingInner {
    id: u64,
    resource: Arc<str>,
    origin: Origin,
    doc: SharedDocument,
    text: TextRef,
    model: Rc<dyn TextModel>,
    awareness: Rc<Awareness>,
    registries: Rc<dyn CursorRegistryLookup>,
    guard: ApplyGuard,
    undo: RefCell<Option<UndoManager>>,
    editors: RefCell<Vec<AttachedEditor>>,
    saved_selections: RefCell<HashMap<EditorId, RelativeSelection>>,
    decorations: RefCell<HashMap<EditorId, Vec<DecorationId>>>,
    listeners: RefCell<Vec<Subscription>>,
    presence_listener: RefCell<Option<Subscription>>,
    paused: Cell<bool>,
    disposed: Cell<bool>,
}

impl TextBinding {
    /// Bind `resource`'s shared text to `model`. The model's content is
    /// replaced by the shared text if they differ.
    pub fn new(
        resource: &str,
        doc: SharedDocument,
        model: Rc<dyn TextModel>,
        editors: &[Rc<dyn CodeEditor>],
        awareness: Rc<Awareness>,
        registries: Rc<dyn CursorRegistryLookup>,
    ) -> Result<Self, SyncError> {
        let text = doc.observe_text(resource)?;
        let id = NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed);
        let origin = Origin::from(format!("text-binding-{id}").as_str());
        let undo = doc.undo_manager(&text, origin.clone());

        let inner = Rc::new(BindingInner {
            id,
            resource: Arc::from(resource),
            origin,
            doc,
            text,
            model,
            awareness,
            registries,
            guard: ApplyGuard::new(),
            undo: RefCell::new(Some(undo)),
            editors: RefCell::new(Vec::new()),
            saved_selections: RefCell::new(HashMap::new()),
            decorations: RefCell::new(HashMap::new()),
            listeners: RefCell::new(Vec::new()),
            presence_listener: RefCell::new(None),
            paused: Cell::new(false),
            disposed: Cell::new(false),
        });
        inner.initialize()?;
        for editor in editors {
            inner.attach(editor.clone());
        }
        inner.render_decorations();

        log::debug!("Created binding {id} for {resource}");
        Ok(Self { inner })
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn model(&self) -> Rc<dyn TextModel> {
        self.inner.model.clone()
    }

    pub fn guard(&self) -> &ApplyGuard {
        &self.inner.guard
    }

    pub fn editor_ids(&self) -> Vec<EditorId> {
        self.inner
            .editors
            .borrow()
            .iter()
            .map(|a| a.editor.id())
            .collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether two handles refer to the same binding.
    pub fn ptr_eq(&self, other: &TextBinding) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn add_editor(&self, editor: Rc<dyn CodeEditor>) {
        if self.is_disposed() {
            return;
        }
        self.inner.attach(editor);
        self.inner.render_decorations();
    }

    /// Detach an editor, releasing its listener and decorations.
    pub fn remove_editor(&self, editor_id: EditorId) -> bool {
        let removed = {
            let mut editors = self.inner.editors.borrow_mut();
            editors
                .iter()
                .position(|a| a.editor.id() == editor_id)
                .map(|i| editors.remove(i))
        };
        let Some(attached) = removed else {
            return false;
        };
        let old = self.inner.decorations.borrow_mut().remove(&editor_id);
        if let Some(old) = old {
            attached.editor.delta_decorations(&old, Vec::new());
        }
        self.inner.saved_selections.borrow_mut().remove(&editor_id);
        drop(attached);

        log::debug!("Detached editor {editor_id:?} from {}", self.inner.resource);
        self.inner.render_decorations();
        true
    }

    pub fn render_decorations(&self) {
        self.inner.render_decorations();
    }

    /// Stop publishing selections and stop re-rendering on presence
    /// changes. Text keeps syncing both ways.
    pub fn pause_presence(&self) {
        let inner = &self.inner;
        if inner.disposed.get() || inner.paused.replace(true) {
            return;
        }
        for attached in inner.editors.borrow_mut().iter_mut() {
            attached.selection_listener.take();
        }
        inner.presence_listener.borrow_mut().take();
        log::debug!("Paused presence for {}", inner.resource);
    }

    /// Undo [`pause_presence`](Self::pause_presence) and render the
    /// current remote selections.
    pub fn resume_presence(&self) {
        let inner = &self.inner;
        if inner.disposed.get() || !inner.paused.replace(false) {
            return;
        }
        for editor in inner.editor_handles() {
            let listener = inner.selection_listener(&editor);
            if let Some(attached) = inner
                .editors
                .borrow_mut()
                .iter_mut()
                .find(|a| a.editor.id() == editor.id())
            {
                attached.selection_listener = Some(listener);
            }
        }
        inner.listen_presence();
        log::debug!("Resumed presence for {}", inner.resource);
        inner.render_decorations();
    }

    pub fn is_presence_paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Undo the last change made through this binding. Remote changes
    /// are never undone.
    pub fn undo(&self) -> Result<bool, SyncError> {
        self.ensure_live()?;
        self.inner.doc.run_mutation(|| {
            self.inner
                .undo
                .borrow_mut()
                .as_mut()
                .is_some_and(|undo| undo.undo_blocking())
        })
    }

    pub fn redo(&self) -> Result<bool, SyncError> {
        self.ensure_live()?;
        self.inner.doc.run_mutation(|| {
            self.inner
                .undo
                .borrow_mut()
                .as_mut()
                .is_some_and(|undo| undo.redo_blocking())
        })
    }

    /// Release every listener and the undo history. The shared text is
    /// left untouched.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.replace(true) {
            return;
        }
        inner.undo.borrow_mut().take();
        inner.listeners.borrow_mut().clear();
        inner.presence_listener.borrow_mut().take();

        let editors = std::mem::take(&mut *inner.editors.borrow_mut());
        let mut decorations = std::mem::take(&mut *inner.decorations.borrow_mut());
        for attached in &editors {
            if let Some(old) = decorations.remove(&attached.editor.id()) {
                attached.editor.delta_decorations(&old, Vec::new());
            }
        }
        drop(editors);
        inner.saved_selections.borrow_mut().clear();

        log::debug!("Disposed binding {} for {}", inner.id, inner.resource);
    }

    fn ensure_live(&self) -> Result<(), SyncError> {
        if self.is_disposed() {
            return Err(SyncError::Disposed(self.inner.resource.to_string()));
        }
        Ok(())
    }
}

impl BindingInner {
    fn initialize(self: &Rc<Self>) -> Result<(), SyncError> {
        let content = self
            .doc
            .text_content(&self.resource)
            .ok_or_else(|| SyncError::UnknownResource(self.resource.to_string()))?;
        if self.model.text() != content {
            self.guard
                .run(|| self.model.set_text(&content))
                .unwrap_or(Ok(()))?;
        }

        let mut listeners = Vec::with_capacity(3);

        let weak = Rc::downgrade(self);
        listeners.push(self.doc.on_text_changed(move |change| match weak.upgrade() {
            Some(binding) => binding.on_text_changed(change),
            None => Ok(()),
        }));

        let weak = Rc::downgrade(self);
        listeners.push(self.doc.on_before_transaction(move || {
            if let Some(binding) = weak.upgrade() {
                binding.snapshot_selections();
            }
        }));

        let weak = Rc::downgrade(self);
        listeners.push(self.model.on_did_change_content(Box::new(move |change| {
            match weak.upgrade() {
                Some(binding) => binding.on_model_changed(change),
                None => Ok(()),
            }
        })));

        *self.listeners.borrow_mut() = listeners;
        self.listen_presence();
        Ok(())
    }

    fn listen_presence(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let listener = self.awareness.on_change(move |_| {
            if let Some(binding) = weak.upgrade() {
                binding.render_decorations();
            }
        });
        *self.presence_listener.borrow_mut() = Some(listener);
    }

    fn selection_listener(self: &Rc<Self>, editor: &Rc<dyn CodeEditor>) -> Subscription {
        let weak_binding = Rc::downgrade(self);
        let weak_editor = Rc::downgrade(editor);
        editor.on_did_change_cursor_selection(Box::new(move |_| {
            if let (Some(binding), Some(editor)) = (weak_binding.upgrade(), weak_editor.upgrade()) {
                binding.publish_selection(editor.as_ref());
            }
        }))
    }

    fn attach(self: &Rc<Self>, editor: Rc<dyn CodeEditor>) {
        if self
            .editors
            .borrow()
            .iter()
            .any(|a| a.editor.id() == editor.id())
        {
            return;
        }
        let selection_listener = (!self.paused.get()).then(|| self.selection_listener(&editor));
        log::debug!("Attached editor {:?} to {}", editor.id(), self.resource);
        self.editors.borrow_mut().push(AttachedEditor {
            editor,
            selection_listener,
        });
    }

    fn editor_handles(&self) -> Vec<Rc<dyn CodeEditor>> {
        self.editors
            .borrow()
            .iter()
            .map(|a| a.editor.clone())
            .collect()
    }

    // ── Local → shared ──────────────────────────────────────────────

    fn on_model_changed(&self, change: &ContentChange) -> Result<(), SyncError> {
        if self.disposed.get() {
            return Ok(());
        }
        self.guard
            .run(|| self.apply_local_edits(&change.changes))
            .unwrap_or(Ok(()))
    }

    /// Mirror a batch of buffer edits. Every edit's offsets refer to the
    /// buffer before the batch, which still matches the shared text, so
    /// the whole batch is validated and converted before anything is
    /// written.
    fn apply_local_edits(&self, edits: &[TextEdit]) -> Result<(), SyncError> {
        let current = self
            .doc
            .text_content(&self.resource)
            .ok_or_else(|| SyncError::UnknownResource(self.resource.to_string()))?;

        let mut ordered = Vec::with_capacity(edits.len());
        for edit in edits {
            let end = edit.offset.checked_add(edit.length);
            let Some(end) = end.filter(|end| {
                *end <= current.len()
                    && current.is_char_boundary(edit.offset)
                    && current.is_char_boundary(*end)
            }) else {
                return Err(SyncError::InvalidEdit {
                    offset: edit.offset,
                    length: edit.length,
                    len: current.len(),
                });
            };
            ordered.push((
                offset::byte_to_utf16(&current, edit.offset),
                offset::utf16_len(&current[edit.offset..end]),
                edit.text.as_str(),
            ));
        }
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        let text = &self.text;
        self.doc.transact_with(&self.origin, |txn| {
            for (index, len, insert) in ordered {
                if len > 0 {
                    text.remove_range(txn, index, len);
                }
                if !insert.is_empty() {
                    text.insert(txn, index, insert);
                }
            }
        })
    }

    // ── Shared → local ──────────────────────────────────────────────

    fn on_text_changed(&self, change: &TextChange) -> Result<(), SyncError> {
        if self.disposed.get() || change.resource != self.resource {
            return Ok(());
        }
        let applied = self.guard.run(|| -> Result<(), SyncError> {
            self.apply_remote_delta(&change.delta)?;
            self.restore_selections();
            Ok(())
        });
        if let Some(result) = applied {
            result?;
        }
        self.render_decorations();
        Ok(())
    }

    fn apply_remote_delta(&self, delta: &[DeltaRun]) -> Result<(), SyncError> {
        if let Some(DeltaRun::Embed(kind)) = delta.iter().find(|run| matches!(run, DeltaRun::Embed(_))) {
            log::error!("Rejecting non-text change to {}: {kind}", self.resource);
            return Err(SyncError::UnexpectedDelta {
                resource: self.resource.to_string(),
                kind: kind.clone(),
            });
        }

        // Runs count UTF-16 units; `index` is a byte offset into the buffer.
        let mut index = 0usize;
        for run in delta {
            match run {
                DeltaRun::Retain(len) => {
                    index = offset::advance_utf16(&self.model.text(), index, *len);
                }
                DeltaRun::Insert(text) => {
                    self.model.apply_edits(&[TextEdit::insert(index, text.as_str())])?;
                    index += text.len();
                }
                DeltaRun::Delete(len) => {
                    let end = offset::advance_utf16(&self.model.text(), index, *len);
                    self.model.apply_edits(&[TextEdit::delete(index, end - index)])?;
                }
                DeltaRun::Embed(_) => unreachable!("embeds are rejected above"),
            }
        }
        Ok(())
    }

    // ── Selections ──────────────────────────────────────────────────

    fn relative_selection(&self, editor: &dyn CodeEditor) -> Option<RelativeSelection> {
        if !displays(editor, self.model.as_ref()) {
            return None;
        }
        let selection = editor.selection()?;
        let start = self
            .doc
            .relative_position(&self.resource, self.model.offset_at(selection.start))?;
        let end = self
            .doc
            .relative_position(&self.resource, self.model.offset_at(selection.end))?;
        Some(RelativeSelection {
            start,
            end,
            direction: selection.direction,
        })
    }

    fn snapshot_selections(&self) {
        if self.disposed.get() {
            return;
        }
        self.guard.run(|| {
            let mut saved = HashMap::new();
            for editor in self.editor_handles() {
                if let Some(selection) = self.relative_selection(editor.as_ref()) {
                    saved.insert(editor.id(), selection);
                }
            }
            *self.saved_selections.borrow_mut() = saved;
        });
    }

    fn restore_selections(&self) {
        let saved = std::mem::take(&mut *self.saved_selections.borrow_mut());
        for editor in self.editor_handles() {
            let Some(relative) = saved.get(&editor.id()) else {
                continue;
            };
            if !displays(editor.as_ref(), self.model.as_ref()) {
                continue;
            }
            let (Some(start), Some(end)) = (
                self.doc.absolute_position(&relative.start),
                self.doc.absolute_position(&relative.end),
            ) else {
                continue;
            };
            editor.set_selection(Selection::new(
                self.model.position_at(start),
                self.model.position_at(end),
                relative.direction,
            ));
        }
    }

    /// Publish an editor's selection as this client's presence.
    fn publish_selection(&self, editor: &dyn CodeEditor) {
        if self.disposed.get() {
            return;
        }
        let Some(relative) = self.relative_selection(editor) else {
            return;
        };
        let (anchor, head) = match relative.direction {
            SelectionDirection::LeftToRight => (relative.start, relative.end),
            SelectionDirection::RightToLeft => (relative.end, relative.start),
        };
        self.awareness.set_local_selection(Some(WireSelection {
            anchor: anchor.to_wire(),
            head: head.to_wire(),
        }));
    }

    // ── Decorations ─────────────────────────────────────────────────

    fn resolve_wire(&self, wire: &WirePosition) -> Option<usize> {
        if wire.resource != *self.resource {
            return None;
        }
        match RelativePosition::from_wire(wire) {
            Ok(position) => self.doc.absolute_position(&position),
            Err(e) => {
                log::warn!("Skipping malformed remote position for {}: {e}", self.resource);
                None
            }
        }
    }

    fn render_decorations(&self) {
        if self.disposed.get() {
            return;
        }
        let local = self.awareness.local_id();
        let states = self.awareness.states();

        for editor in self.editor_handles() {
            let editor_id = editor.id();
            if !displays(editor.as_ref(), self.model.as_ref()) {
                // The editor switched buffers; take this binding's decorations back off it.
                let stale = self.decorations.borrow_mut().remove(&editor_id);
                if let Some(stale) = stale {
                    editor.delta_decorations(&stale, Vec::new());
                    if let Some(registry) = self.registries.registry_for(editor_id) {
                        registry.remove_all_positions();
                        registry.layout_all_widgets();
                    }
                }
                continue;
            }

            let registry = self.registries.registry_for(editor_id);
            if let Some(registry) = &registry {
                registry.remove_all_positions();
            }

            let mut decorations = Vec::new();
            for (client_id, state) in &states {
                if *client_id == local {
                    continue;
                }
                let Some(selection) = &state.selection else {
                    continue;
                };
                let (Some(anchor), Some(head)) =
                    (self.resolve_wire(&selection.anchor), self.resolve_wire(&selection.head))
                else {
                    continue;
                };

                let head_classes = format!("{REMOTE_SELECTION_HEAD_CLASS} {}", head_class(*client_id));
                let (start, end, before, after) = if anchor < head {
                    (anchor, head, None, Some(head_classes))
                } else {
                    (head, anchor, Some(head_classes), None)
                };
                decorations.push(Decoration {
                    range: Range {
                        start: self.model.position_at(start),
                        end: self.model.position_at(end),
                    },
                    class_name: format!("{REMOTE_SELECTION_CLASS} {}", selection_class(*client_id)),
                    before_content_class: before,
                    after_content_class: after,
                });
                if let Some(registry) = &registry {
                    registry.update_position_of(*client_id, self.model.position_at(head));
                }
            }

            let old = self
                .decorations
                .borrow_mut()
                .remove(&editor_id)
                .unwrap_or_default();
            let ids = editor.delta_decorations(&old, decorations);
            self.decorations.borrow_mut().insert(editor_id, ids);

            if let Some(registry) = registry {
                registry.layout_all_widgets();
            }
        }
    }
}
