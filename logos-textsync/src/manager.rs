//! Lifecycle of bindings across a workspace session.
//!
//! The host reports which resources are shown where; the manager makes
//! sure each resource has at most one [`TextBinding`], asks the server
//! for content the shared document does not have yet, and tears bindings
//! down when their text disappears or their last view closes.
//!
//! ```text
//!  activate(uri) ──► binding exists? ──yes──► attach editor
//!                         │ no
//!                    text in doc? ──yes──► create binding
//!                         │ no
//!                    pending entry ──► request_initial_content (once)
//!                         │
//!           resource Added event ──► promote to binding
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::awareness::{Awareness, ClientId};
use crate::binding::TextBinding;
use crate::config::UserInfo;
use crate::document::{ResourceEvent, SharedDocument};
use crate::error::SyncError;
use crate::event::Subscription;
use crate::presence::{CursorRegistries, CursorRegistry, CursorRegistryLookup};
use crate::styles::{ClientStyles, StyleHost};
use crate::surface::{CodeEditor, EditorId, TextModel};

// ───────────────────────────────────────────────────────────────────
// Seed requests
// ───────────────────────────────────────────────────────────────────

/// Outbound requests to the room server. Fire-and-forget: results come
/// back as shared-document updates.
pub trait SeedRequester {
    fn request_initial_content(&self, uri: &str);
    fn request_removal(&self, uri: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedRequest {
    InitialContent(String),
    Remove(String),
}

/// A [`SeedRequester`] that queues requests for a transport to drain.
#[derive(Debug, Default)]
pub struct SeedQueue {
    requests: RefCell<VecDeque<SeedRequest>>,
}

impl SeedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<SeedRequest> {
        self.requests.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeedRequester for SeedQueue {
    fn request_initial_content(&self, uri: &str) {
        self.requests
            .borrow_mut()
            .push_back(SeedRequest::InitialContent(uri.to_string()));
    }

    fn request_removal(&self, uri: &str) {
        self.requests
            .borrow_mut()
            .push_back(SeedRequest::Remove(uri.to_string()));
    }
}

// ───────────────────────────────────────────────────────────────────
// Manager
// ───────────────────────────────────────────────────────────────────

/// A resource activated before its shared text existed.
struct PendingSeed {
    model: Rc<dyn TextModel>,
    editors: Vec<Rc<dyn CodeEditor>>,
}

/// Owns every binding of one client session.
pub struct BindingManager {
    inner: Rc<ManagerInner>,
}

struct ManagerInner {
    doc: SharedDocument,
    awareness: Rc<Awareness>,
    seeder: Rc<dyn SeedRequester>,
    registries: Rc<CursorRegistries>,
    styles: ClientStyles,
    bindings: RefCell<HashMap<String, TextBinding>>,
    pending: RefCell<HashMap<String, PendingSeed>>,
    /// Open views per resource. `None` stands for a view without an editor.
    views: RefCell<HashMap<String, Vec<Option<EditorId>>>>,
    current: RefCell<Option<String>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl BindingManager {
    pub fn new(
        doc: SharedDocument,
        awareness: Rc<Awareness>,
        seeder: Rc<dyn SeedRequester>,
        style_host: Rc<dyn StyleHost>,
    ) -> Self {
        let inner = Rc::new(ManagerInner {
            doc,
            awareness,
            seeder,
            registries: Rc::new(CursorRegistries::new()),
            styles: ClientStyles::new(style_host),
            bindings: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            views: RefCell::new(HashMap::new()),
            current: RefCell::new(None),
            subscriptions: RefCell::new(Vec::new()),
        });

        let local = inner.awareness.local_id();
        for (client_id, _) in inner.awareness.states() {
            if client_id != local {
                inner.styles.acquire(client_id);
            }
        }

        let weak = Rc::downgrade(&inner);
        let resources = inner.doc.on_resource_changed(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                ResourceEvent::Added(uri) => inner.promote(uri),
                ResourceEvent::Removed(uri) => {
                    inner.teardown(uri);
                }
            }
        });

        let weak = Rc::downgrade(&inner);
        let presence = inner.awareness.on_change(move |change| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let local = inner.awareness.local_id();
            for client_id in change.added.iter().filter(|id| **id != local) {
                inner.styles.acquire(*client_id);
            }
            for client_id in change.removed.iter().filter(|id| **id != local) {
                inner.styles.release(*client_id);
            }
        });

        *inner.subscriptions.borrow_mut() = vec![resources, presence];
        Self { inner }
    }

    /// A resource became the active one, optionally shown in `editor`.
    pub fn activate(
        &self,
        uri: &str,
        model: Rc<dyn TextModel>,
        editor: Option<Rc<dyn CodeEditor>>,
    ) -> Result<(), SyncError> {
        let inner = &self.inner;
        *inner.current.borrow_mut() = Some(uri.to_string());
        inner.record_view(uri, editor.as_ref().map(|e| e.id()));
        if let Some(editor) = &editor {
            inner.registries.ensure(editor, &inner.awareness);
        }

        if let Some(binding) = inner.binding(uri) {
            match editor {
                Some(editor) => binding.add_editor(editor),
                None => binding.render_decorations(),
            }
            return Ok(());
        }

        if inner.doc.has_text(uri) {
            return inner.create_binding(uri, model, editor.into_iter().collect());
        }

        let first_request = {
            let mut pending = inner.pending.borrow_mut();
            match pending.get_mut(uri) {
                Some(entry) => {
                    if let Some(editor) = editor {
                        if !entry.editors.iter().any(|e| e.id() == editor.id()) {
                            entry.editors.push(editor);
                        }
                    }
                    false
                }
                None => {
                    pending.insert(
                        uri.to_string(),
                        PendingSeed {
                            model,
                            editors: editor.into_iter().collect(),
                        },
                    );
                    true
                }
            }
        };
        if first_request {
            log::debug!("Requesting initial content for {uri}");
            inner.seeder.request_initial_content(uri);
        }
        Ok(())
    }

    /// A view of `uri` closed. The binding goes away with the last view.
    pub fn close_view(&self, uri: &str, editor: Option<EditorId>) {
        let inner = &self.inner;
        let remaining = inner.forget_view(uri, editor);

        if let (Some(editor_id), Some(binding)) = (editor, inner.binding(uri)) {
            binding.remove_editor(editor_id);
        }
        if remaining > 0 {
            return;
        }

        inner.teardown(uri);
        if inner.pending.borrow_mut().remove(uri).is_some() {
            log::debug!("Dropped pending seed for {uri}");
        }
        let mut current = inner.current.borrow_mut();
        if current.as_deref() == Some(uri) {
            *current = None;
        }
    }

    /// An editor instance went away for good.
    pub fn editor_disposed(&self, editor: EditorId) {
        let inner = &self.inner;
        inner.registries.destroy(editor);
        for binding in inner.all_bindings() {
            binding.remove_editor(editor);
        }
        for pending in inner.pending.borrow_mut().values_mut() {
            pending.editors.retain(|e| e.id() != editor);
        }
        for views in inner.views.borrow_mut().values_mut() {
            views.retain(|v| *v != Some(editor));
        }
    }

    pub fn file_deleted(&self, uri: &str) {
        if self.inner.teardown(uri) {
            log::info!("File {uri} deleted, binding released");
        }
    }

    /// The file changed on disk. Unbound shared text would go stale, so
    /// the server is asked to drop it.
    pub fn file_changed(&self, uri: &str) {
        let inner = &self.inner;
        if inner.binding(uri).is_none() && inner.doc.has_text(uri) {
            log::debug!("File {uri} changed outside the session, requesting removal");
            inner.seeder.request_removal(uri);
        }
    }

    pub fn undo(&self) -> Result<bool, SyncError> {
        match self.current_binding() {
            Some(binding) => binding.undo(),
            None => Ok(false),
        }
    }

    pub fn redo(&self) -> Result<bool, SyncError> {
        match self.current_binding() {
            Some(binding) => binding.redo(),
            None => Ok(false),
        }
    }

    /// Publish the user shown next to this client's cursor. Without one
    /// an anonymous identity is generated.
    pub fn register_user_info(&self, user: Option<UserInfo>) {
        self.inner
            .awareness
            .set_local_user(user.unwrap_or_else(UserInfo::anonymous));
    }

    pub fn binding(&self, uri: &str) -> Option<TextBinding> {
        self.inner.binding(uri)
    }

    pub fn current_binding(&self) -> Option<TextBinding> {
        let current = self.inner.current.borrow().clone()?;
        self.inner.binding(&current)
    }

    pub fn current_resource(&self) -> Option<String> {
        self.inner.current.borrow().clone()
    }

    pub fn is_pending(&self, uri: &str) -> bool {
        self.inner.pending.borrow().contains_key(uri)
    }

    pub fn binding_count(&self) -> usize {
        self.inner.bindings.borrow().len()
    }

    pub fn registry_for(&self, editor: EditorId) -> Option<CursorRegistry> {
        self.inner.registries.registry_for(editor)
    }

    pub fn remote_style_count(&self, client_id: ClientId) -> usize {
        self.inner.styles.ref_count(client_id)
    }

    pub fn document(&self) -> &SharedDocument {
        &self.inner.doc
    }

    pub fn awareness(&self) -> &Rc<Awareness> {
        &self.inner.awareness
    }

    /// Dispose every binding and registry and stop listening.
    pub fn destroy(&self) {
        let inner = &self.inner;
        inner.subscriptions.borrow_mut().clear();
        for binding in inner.all_bindings() {
            binding.dispose();
        }
        inner.bindings.borrow_mut().clear();
        inner.pending.borrow_mut().clear();
        inner.views.borrow_mut().clear();
        inner.current.borrow_mut().take();
        inner.registries.destroy_all();
        inner.styles.clear();
        log::debug!("Binding manager destroyed");
    }
}

impl ManagerInner {
    fn binding(&self, uri: &str) -> Option<TextBinding> {
        self.bindings.borrow().get(uri).cloned()
    }

    fn all_bindings(&self) -> Vec<TextBinding> {
        self.bindings.borrow().values().cloned().collect()
    }

    fn create_binding(
        &self,
        uri: &str,
        model: Rc<dyn TextModel>,
        editors: Vec<Rc<dyn CodeEditor>>,
    ) -> Result<(), SyncError> {
        if self.bindings.borrow().contains_key(uri) {
            return Ok(());
        }
        let registries: Rc<dyn CursorRegistryLookup> = self.registries.clone();
        let binding = TextBinding::new(
            uri,
            self.doc.clone(),
            model,
            &editors,
            self.awareness.clone(),
            registries,
        )?;
        self.bindings.borrow_mut().insert(uri.to_string(), binding);
        Ok(())
    }

    fn promote(&self, uri: &str) {
        if self.bindings.borrow().contains_key(uri) {
            return;
        }
        let Some(entry) = self.pending.borrow_mut().remove(uri) else {
            return;
        };
        match self.create_binding(uri, entry.model, entry.editors) {
            Ok(()) => log::debug!("Seeded text arrived for {uri}, binding created"),
            Err(e) => log::error!("Failed to bind seeded text {uri}: {e}"),
        }
    }

    fn teardown(&self, uri: &str) -> bool {
        let binding = self.bindings.borrow_mut().remove(uri);
        match binding {
            Some(binding) => {
                binding.dispose();
                true
            }
            None => false,
        }
    }

    fn record_view(&self, uri: &str, editor: Option<EditorId>) {
        let mut views = self.views.borrow_mut();
        let entry = views.entry(uri.to_string()).or_default();
        if !entry.contains(&editor) {
            entry.push(editor);
        }
    }

    fn forget_view(&self, uri: &str, editor: Option<EditorId>) -> usize {
        let mut views = self.views.borrow_mut();
        let Some(entry) = views.get_mut(uri) else {
            return 0;
        };
        entry.retain(|v| *v != editor);
        let remaining = entry.len();
        if remaining == 0 {
            views.remove(uri);
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::styles::MemoryStyleSheet;
    use crate::surface::memory::{MemoryEditor, MemoryModel};

    fn manager() -> (BindingManager, Rc<SeedQueue>, SharedDocument) {
        let doc = SharedDocument::new();
        let seeds = Rc::new(SeedQueue::new());
        let manager = BindingManager::new(
            doc.clone(),
            Rc::new(Awareness::new(1)),
            seeds.clone(),
            Rc::new(MemoryStyleSheet::new()),
        );
        (manager, seeds, doc)
    }

    #[test]
    fn test_seed_queue_drains_in_order() {
        let queue = SeedQueue::new();
        queue.request_initial_content("a");
        queue.request_removal("b");
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.drain(),
            vec![
                SeedRequest::InitialContent("a".into()),
                SeedRequest::Remove("b".into())
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_activate_existing_text_binds_immediately() {
        let (manager, seeds, doc) = manager();
        doc.insert_text("file:///a.rs", "fn a() {}").unwrap();

        let model = MemoryModel::new("");
        manager.activate("file:///a.rs", model.clone(), None).unwrap();

        assert_eq!(manager.binding_count(), 1);
        assert_eq!(model.text(), "fn a() {}");
        assert!(seeds.is_empty());
    }

    #[test]
    fn test_pending_requested_once() {
        let (manager, seeds, _doc) = manager();
        let model = MemoryModel::new("");
        manager.activate("file:///b.rs", model.clone(), None).unwrap();
        manager.activate("file:///b.rs", model, None).unwrap();

        assert!(manager.is_pending("file:///b.rs"));
        assert_eq!(
            seeds.drain(),
            vec![SeedRequest::InitialContent("file:///b.rs".into())]
        );
    }

    #[test]
    fn test_file_changed_requests_removal_only_when_unbound() {
        let (manager, seeds, doc) = manager();
        doc.insert_text("file:///c.rs", "old").unwrap();
        manager.file_changed("file:///c.rs");
        assert_eq!(seeds.drain(), vec![SeedRequest::Remove("file:///c.rs".into())]);

        manager
            .activate("file:///c.rs", MemoryModel::new(""), None)
            .unwrap();
        manager.file_changed("file:///c.rs");
        assert!(seeds.is_empty());
    }

    #[test]
    fn test_undo_without_current_binding() {
        let (manager, _seeds, _doc) = manager();
        assert_eq!(manager.undo(), Ok(false));
        assert_eq!(manager.redo(), Ok(false));
    }

    #[test]
    fn test_editor_disposed_destroys_registry() {
        let (manager, _seeds, doc) = manager();
        doc.insert_text("file:///d.rs", "d").unwrap();
        let model = MemoryModel::new("");
        let editor = MemoryEditor::new(model.clone());
        let id = editor.id();
        manager.activate("file:///d.rs", model, Some(editor)).unwrap();
        assert!(manager.registry_for(id).is_some());

        manager.editor_disposed(id);
        assert!(manager.registry_for(id).is_none());
        assert!(manager.binding("file:///d.rs").unwrap().editor_ids().is_empty());
    }

    #[test]
    fn test_destroy_disposes_bindings() {
        let (manager, _seeds, doc) = manager();
        doc.insert_text("file:///e.rs", "e").unwrap();
        manager
            .activate("file:///e.rs", MemoryModel::new(""), None)
            .unwrap();
        let binding = manager.binding("file:///e.rs").unwrap();

        manager.destroy();
        assert!(binding.is_disposed());
        assert_eq!(manager.binding_count(), 0);
        assert_eq!(manager.current_resource(), None);
    }
}
