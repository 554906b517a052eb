//! Remote cursor widgets for one editor instance.
//!
//! A [`CursorRegistry`] keeps one [`CursorWidget`] per remote client
//! known to the presence channel, keyed by client id. Bindings position
//! the widgets while rendering decorations:
//!
//! ```text
//! render_decorations()
//!       │
//!       ├── remove_all_positions()
//!       ├── update_position_of(client, head)   × remote clients
//!       └── layout_all_widgets()               once per pass
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use crate::awareness::{Awareness, ClientId, PresenceChange};
use crate::color::{color_for_client, CursorColor};
use crate::event::Subscription;
use crate::surface::{CodeEditor, ContentWidget, EditorId, Position};

// ───────────────────────────────────────────────────────────────────
// Widget
// ───────────────────────────────────────────────────────────────────

/// Nickname label drawn at a remote client's caret.
pub struct CursorWidget {
    id: String,
    client_id: ClientId,
    nickname: String,
    color: CursorColor,
    position: Cell<Option<Position>>,
}

impl CursorWidget {
    fn new(client_id: ClientId, nickname: &str) -> Self {
        Self {
            id: format!("remote-cursor-{client_id}"),
            client_id,
            nickname: nickname.to_string(),
            color: color_for_client(client_id),
            position: Cell::new(None),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn color(&self) -> CursorColor {
        self.color
    }
}

impl ContentWidget for CursorWidget {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.nickname
    }

    fn position(&self) -> Option<Position> {
        self.position.get()
    }
}

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

/// Cursor widgets of one editor. Clones share state.
#[derive(Clone)]
pub struct CursorRegistry {
    inner: Rc<RegistryInner>,
}

struct RegistryInner {
    editor: Weak<dyn CodeEditor>,
    awareness: Rc<Awareness>,
    widgets: RefCell<BTreeMap<ClientId, Rc<CursorWidget>>>,
    subscription: RefCell<Option<Subscription>>,
}

impl CursorRegistry {
    pub fn new(editor: &Rc<dyn CodeEditor>, awareness: Rc<Awareness>) -> Self {
        let inner = Rc::new(RegistryInner {
            editor: Rc::downgrade(editor),
            awareness,
            widgets: RefCell::new(BTreeMap::new()),
            subscription: RefCell::new(None),
        });
        inner.scan();

        let weak = Rc::downgrade(&inner);
        let subscription = inner.awareness.on_change(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_change(change);
            }
        });
        *inner.subscription.borrow_mut() = Some(subscription);

        Self { inner }
    }

    /// Set where a client's widget should be drawn. Takes effect on the
    /// next [`layout_all_widgets`](Self::layout_all_widgets).
    pub fn update_position_of(&self, client_id: ClientId, position: Position) {
        if let Some(widget) = self.inner.widgets.borrow().get(&client_id) {
            widget.position.set(Some(position));
        }
    }

    pub fn remove_all_positions(&self) {
        for widget in self.inner.widgets.borrow().values() {
            widget.position.set(None);
        }
    }

    pub fn layout_all_widgets(&self) {
        let Some(editor) = self.inner.editor.upgrade() else {
            return;
        };
        let ids: Vec<String> = self
            .inner
            .widgets
            .borrow()
            .values()
            .map(|w| w.id.clone())
            .collect();
        for id in ids {
            editor.layout_content_widget(&id);
        }
    }

    pub fn widget(&self, client_id: ClientId) -> Option<Rc<CursorWidget>> {
        self.inner.widgets.borrow().get(&client_id).cloned()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.inner.widgets.borrow().keys().copied().collect()
    }

    /// Remove every widget from the editor and stop listening.
    pub fn destroy(&self) {
        self.inner.subscription.borrow_mut().take();
        let widgets = std::mem::take(&mut *self.inner.widgets.borrow_mut());
        if let Some(editor) = self.inner.editor.upgrade() {
            for widget in widgets.values() {
                editor.remove_content_widget(&widget.id);
            }
        }
    }
}

impl RegistryInner {
    fn handle_change(&self, change: &PresenceChange) {
        if !change.added.is_empty() || !change.updated.is_empty() {
            self.scan();
        }
        if !change.removed.is_empty() {
            let removed: Vec<Rc<CursorWidget>> = {
                let mut widgets = self.widgets.borrow_mut();
                change
                    .removed
                    .iter()
                    .filter_map(|id| widgets.remove(id))
                    .collect()
            };
            if let Some(editor) = self.editor.upgrade() {
                for widget in removed {
                    log::debug!("Removing cursor widget for client {}", widget.client_id);
                    editor.remove_content_widget(&widget.id);
                }
            }
        }
    }

    /// Create widgets for remote clients that carry a nickname and have none yet.
    fn scan(&self) {
        let Some(editor) = self.editor.upgrade() else {
            return;
        };
        let local = self.awareness.local_id();
        let mut created = Vec::new();
        {
            let mut widgets = self.widgets.borrow_mut();
            for (client_id, state) in self.awareness.states() {
                if client_id == local || widgets.contains_key(&client_id) {
                    continue;
                }
                if let Some(nickname) = state.nickname() {
                    let widget = Rc::new(CursorWidget::new(client_id, nickname));
                    widgets.insert(client_id, widget.clone());
                    created.push(widget);
                }
            }
        }
        for widget in created {
            log::debug!("Creating cursor widget for client {}", widget.client_id);
            editor.add_content_widget(widget);
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Registry lookup
// ───────────────────────────────────────────────────────────────────

/// Finds the cursor registry of an editor instance.
pub trait CursorRegistryLookup {
    fn registry_for(&self, editor: EditorId) -> Option<CursorRegistry>;
}

/// One registry per editor instance.
#[derive(Default)]
pub struct CursorRegistries {
    registries: RefCell<HashMap<EditorId, CursorRegistry>>,
}

impl CursorRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// The editor's registry, created on first use.
    pub fn ensure(&self, editor: &Rc<dyn CodeEditor>, awareness: &Rc<Awareness>) -> CursorRegistry {
        if let Some(registry) = self.registries.borrow().get(&editor.id()) {
            return registry.clone();
        }
        let registry = CursorRegistry::new(editor, awareness.clone());
        self.registries
            .borrow_mut()
            .insert(editor.id(), registry.clone());
        registry
    }

    pub fn destroy(&self, editor: EditorId) {
        let registry = self.registries.borrow_mut().remove(&editor);
        if let Some(registry) = registry {
            registry.destroy();
        }
    }

    pub fn destroy_all(&self) {
        let registries: Vec<CursorRegistry> = self
            .registries
            .borrow_mut()
            .drain()
            .map(|(_, r)| r)
            .collect();
        for registry in registries {
            registry.destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.registries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CursorRegistryLookup for CursorRegistries {
    fn registry_for(&self, editor: EditorId) -> Option<CursorRegistry> {
        self.registries.borrow().get(&editor).cloned()
    }
}
