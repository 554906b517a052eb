//! Client-side shared document.
//!
//! Wraps a Yrs `Doc` whose root map holds one text per resource URI.
//!
//! ```text
//!  transact_with / apply_update / run_mutation
//!       │
//!       ├── before-transaction listeners   (selection snapshots)
//!       ├── Yrs transaction + commit       (observers only enqueue)
//!       └── flush queue → listeners        (text / resource events)
//! ```
//!
//! Yrs observers run while the transaction is being committed, so they
//! never call host code directly: they record owned events and the
//! wrapper dispatches them once the transaction is gone. Listeners are
//! therefore free to open new transactions, edit buffers or create
//! bindings.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use yrs::types::{Delta, EntryChange};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Assoc, Doc, GetString, IndexedSequence, Map, MapRef, Observable, OffsetKind, Options,
    Origin, Out, ReadTxn, StateVector, TextPrelim, TextRef, Transact, TransactionMut, UndoManager,
    Update,
};

use crate::error::SyncError;
use crate::event::{Emitter, Subscription};
use crate::offset;
use crate::position::RelativePosition;

/// Root map holding one text per resource URI.
pub const RESOURCES: &str = "resources";

/// One run of a text change, relative to a cursor that starts at 0.
/// Lengths count UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRun {
    Retain(u32),
    Insert(String),
    Delete(u32),
    /// Anything that is not plain text.
    Embed(String),
}

impl DeltaRun {
    fn from_delta(delta: &Delta) -> Self {
        match delta {
            Delta::Retain(len, _) => DeltaRun::Retain(*len),
            Delta::Deleted(len) => DeltaRun::Delete(*len),
            Delta::Inserted(Out::Any(Any::String(s)), _) => DeltaRun::Insert(s.to_string()),
            Delta::Inserted(Out::Any(_), _) => DeltaRun::Embed("embed".to_string()),
            Delta::Inserted(_, _) => DeltaRun::Embed("shared type".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub resource: Arc<str>,
    pub delta: Vec<DeltaRun>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    Added(Arc<str>),
    Removed(Arc<str>),
}

enum DocEvent {
    Text(TextChange),
    Resource(ResourceEvent),
}

type EventQueue = Arc<Mutex<VecDeque<DocEvent>>>;

/// A Yrs document counting text offsets in UTF-16 code units. Clients
/// and the server both create their documents here.
pub fn new_doc() -> Doc {
    Doc::with_options(Options {
        offset_kind: OffsetKind::Utf16,
        ..Options::default()
    })
}

fn pending(queue: &EventQueue) -> MutexGuard<'_, VecDeque<DocEvent>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a shared document. Clones refer to the same document.
#[derive(Clone)]
pub struct SharedDocument {
    inner: Rc<DocInner>,
}

struct DocInner {
    // Observers are released before the document they observe.
    text_observers: RefCell<HashMap<Arc<str>, yrs::Subscription>>,
    _resources_observer: yrs::Subscription,
    before_transaction: Emitter<()>,
    text_changed: Emitter<TextChange, Result<(), SyncError>>,
    resource_changed: Emitter<ResourceEvent>,
    queue: EventQueue,
    resources: MapRef,
    doc: Doc,
}

impl SharedDocument {
    pub fn new() -> Self {
        Self::from_doc(new_doc())
    }

    fn from_doc(doc: Doc) -> Self {
        let resources = doc.get_or_insert_map(RESOURCES);
        let queue: EventQueue = Arc::default();

        let q = queue.clone();
        let resources_observer = resources.observe(move |txn, event| {
            let mut queue = pending(&q);
            for (key, change) in event.keys(txn).iter() {
                match change {
                    EntryChange::Inserted(_) => {
                        queue.push_back(DocEvent::Resource(ResourceEvent::Added(key.clone())));
                    }
                    EntryChange::Removed(_) => {
                        queue.push_back(DocEvent::Resource(ResourceEvent::Removed(key.clone())));
                    }
                    EntryChange::Updated(_, _) => {
                        queue.push_back(DocEvent::Resource(ResourceEvent::Removed(key.clone())));
                        queue.push_back(DocEvent::Resource(ResourceEvent::Added(key.clone())));
                    }
                }
            }
        });

        Self {
            inner: Rc::new(DocInner {
                text_observers: RefCell::new(HashMap::new()),
                _resources_observer: resources_observer,
                before_transaction: Emitter::new(),
                text_changed: Emitter::new(),
                resource_changed: Emitter::new(),
                queue,
                resources,
                doc,
            }),
        }
    }

    // ── Resource texts ──────────────────────────────────────────────

    pub fn text(&self, resource: &str) -> Option<TextRef> {
        let txn = self.inner.doc.transact();
        match self.inner.resources.get(&txn, resource) {
            Some(Out::YText(text)) => Some(text),
            _ => None,
        }
    }

    pub fn has_text(&self, resource: &str) -> bool {
        self.text(resource).is_some()
    }

    pub fn text_content(&self, resource: &str) -> Option<String> {
        let text = self.text(resource)?;
        let txn = self.inner.doc.transact();
        Some(text.get_string(&txn))
    }

    pub fn resources(&self) -> Vec<String> {
        let txn = self.inner.doc.transact();
        let mut keys: Vec<String> = self.inner.resources.keys(&txn).map(str::to_string).collect();
        keys.sort();
        keys
    }

    /// Create the text for `resource` unless one exists. Returns whether
    /// a text was created.
    pub fn insert_text(&self, resource: &str, content: &str) -> Result<bool, SyncError> {
        self.run_mutation(|| {
            let mut txn = self.inner.doc.transact_mut();
            if self.inner.resources.get(&txn, resource).is_some() {
                return false;
            }
            self.inner
                .resources
                .insert(&mut txn, resource, TextPrelim::new(content));
            true
        })
    }

    pub fn remove_text(&self, resource: &str) -> Result<bool, SyncError> {
        self.run_mutation(|| {
            let mut txn = self.inner.doc.transact_mut();
            self.inner.resources.remove(&mut txn, resource).is_some()
        })
    }

    /// Make sure changes to `resource`'s text are reported through
    /// [`on_text_changed`](Self::on_text_changed).
    pub(crate) fn observe_text(&self, resource: &str) -> Result<TextRef, SyncError> {
        let text = self
            .text(resource)
            .ok_or_else(|| SyncError::UnknownResource(resource.to_string()))?;

        let mut observers = self.inner.text_observers.borrow_mut();
        if !observers.contains_key(resource) {
            let name: Arc<str> = Arc::from(resource);
            let q = self.inner.queue.clone();
            let tag = name.clone();
            let subscription = text.observe(move |txn, event| {
                let delta = event.delta(txn).iter().map(DeltaRun::from_delta).collect();
                pending(&q).push_back(DocEvent::Text(TextChange {
                    resource: tag.clone(),
                    delta,
                }));
            });
            observers.insert(name, subscription);
        }
        Ok(text)
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Run `f` in a transaction tagged with `origin`.
    pub fn transact_with<R>(
        &self,
        origin: &Origin,
        f: impl FnOnce(&mut TransactionMut) -> R,
    ) -> Result<R, SyncError> {
        self.run_mutation(|| {
            let mut txn = self.inner.doc.transact_mut_with(origin.clone());
            f(&mut txn)
        })
    }

    /// Run a closure that opens its own transactions (undo/redo),
    /// surrounded by the before-transaction hook and an event flush.
    pub fn run_mutation<R>(&self, f: impl FnOnce() -> R) -> Result<R, SyncError> {
        self.inner.before_transaction.emit(&());
        let result = f();
        self.flush()?;
        Ok(result)
    }

    /// Dispatch queued events. Every event is delivered; the first
    /// listener error is returned.
    fn flush(&self) -> Result<(), SyncError> {
        let mut first_error = None;
        loop {
            let next = pending(&self.inner.queue).pop_front();
            let Some(event) = next else {
                break;
            };
            match event {
                DocEvent::Text(change) => {
                    for result in self.inner.text_changed.emit(&change) {
                        if let Err(e) = result {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                DocEvent::Resource(event) => {
                    if let ResourceEvent::Removed(name) = &event {
                        self.inner.text_observers.borrow_mut().remove(name);
                    }
                    self.inner.resource_changed.emit(&event);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ── Update exchange ─────────────────────────────────────────────

    pub fn state_vector(&self) -> Vec<u8> {
        self.inner.doc.transact().state_vector().encode_v1()
    }

    /// Everything this document has that `state_vector` lacks.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        let sv = StateVector::decode_v1(state_vector)?;
        Ok(self.inner.doc.transact().encode_diff_v1(&sv))
    }

    pub fn encode_state(&self) -> Vec<u8> {
        self.inner
            .doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    pub fn apply_update(&self, update: &[u8]) -> Result<(), SyncError> {
        let update = Update::decode_v1(update)?;
        let applied = self.run_mutation(|| {
            let mut txn = self.inner.doc.transact_mut();
            txn.apply_update(update)
        })?;
        applied.map_err(|e| SyncError::Update(e.to_string()))
    }

    // ── Positions ───────────────────────────────────────────────────

    /// Pin a byte offset of `resource`'s text.
    pub fn relative_position(&self, resource: &str, offset: usize) -> Option<RelativePosition> {
        let text = self.text(resource)?;
        let mut txn = self.inner.doc.transact_mut();
        let units = offset::byte_to_utf16(&text.get_string(&txn), offset);
        let index = text.sticky_index(&mut txn, units, Assoc::After)?;
        Some(RelativePosition::new(Arc::from(resource), index))
    }

    /// Resolve to a byte offset of the position's resource as it reads now.
    pub fn absolute_position(&self, position: &RelativePosition) -> Option<usize> {
        let text = self.text(position.resource())?;
        let txn = self.inner.doc.transact();
        let resolved = position.sticky_index().get_offset(&txn)?;
        Some(offset::utf16_to_byte(&text.get_string(&txn), resolved.index))
    }

    // ── Listeners ───────────────────────────────────────────────────

    pub fn on_before_transaction(&self, listener: impl Fn() + 'static) -> Subscription {
        self.inner.before_transaction.subscribe(move |_| listener())
    }

    pub fn on_text_changed(
        &self,
        listener: impl Fn(&TextChange) -> Result<(), SyncError> + 'static,
    ) -> Subscription {
        self.inner.text_changed.subscribe(listener)
    }

    pub fn on_resource_changed(&self, listener: impl Fn(&ResourceEvent) + 'static) -> Subscription {
        self.inner.resource_changed.subscribe(listener)
    }

    /// Undo history for `text` limited to transactions tagged `origin`.
    pub(crate) fn undo_manager(&self, text: &TextRef, origin: Origin) -> UndoManager {
        let mut undo = UndoManager::new(&self.inner.doc, text);
        undo.include_origin(origin);
        undo
    }
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}
