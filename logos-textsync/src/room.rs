//! Room/document server: the authoritative side of the shared document.
//!
//! ```text
//!  client A ──► request_initial_content(uri) ─┐
//!  client B ──► request_initial_content(uri) ─┼─► one in-flight seed ──► ContentStore::load
//!                                             │            │
//!                        remove_text(uri) ────┘  (aborts)  ▼
//!                                              resources[uri] = Text(content)
//! ```
//!
//! Concurrent requests for the same resource share one in-flight future.
//! Removing a text while its seed is in flight rejects every waiter and
//! keeps the late content out of the document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, RwLock};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, Map, MapRef, Out, ReadTxn, StateVector, TextPrelim, Transact, Update};

use crate::config::ServerConfig;
use crate::document::{new_doc, RESOURCES};
use crate::error::{SeedError, SyncError};
use crate::store::{ContentStore, FsStore};

type SeedFuture = Shared<BoxFuture<'static, Result<(), SeedError>>>;
type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

struct InFlight {
    id: u64,
    future: SeedFuture,
    abort: AbortHandle,
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub active_rooms: usize,
    pub seed_requests: u64,
    pub seeded_texts: u64,
    pub failed_seeds: u64,
    pub removed_texts: u64,
    pub applied_updates: u64,
}

/// What happened to a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub uri: String,
    pub kind: FileChangeKind,
}

impl FileEvent {
    pub fn new(uri: impl Into<String>, kind: FileChangeKind) -> Self {
        Self {
            uri: uri.into(),
            kind,
        }
    }
}

/// The room server.
pub struct RoomServer {
    config: ServerConfig,
    store: Arc<dyn ContentStore>,
    /// Room name → authoritative document
    rooms: Arc<RwLock<HashMap<String, Doc>>>,
    /// Seeds waiting on the store, keyed by resource
    in_flight: InFlightMap,
    next_request: AtomicU64,
    stats: Arc<RwLock<ServerStats>>,
}

impl RoomServer {
    pub fn new(config: ServerConfig, store: Arc<dyn ContentStore>) -> Self {
        log::info!("Room server created for room {}", config.room);
        Self {
            config,
            store,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_request: AtomicU64::new(1),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Server that seeds from the filesystem under `config.storage_root`.
    pub fn with_filesystem(config: ServerConfig) -> Self {
        let store = Arc::new(FsStore::new(config.storage_root.clone()));
        Self::new(config, store)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The room's document, created on first access.
    pub async fn get_document(&self, room: &str) -> Doc {
        if let Some(doc) = self.rooms.read().await.get(room) {
            return doc.clone();
        }
        let mut rooms = self.rooms.write().await;
        if let Some(doc) = rooms.get(room) {
            return doc.clone();
        }
        let doc = new_doc();
        rooms.insert(room.to_string(), doc.clone());
        let active = rooms.len();
        drop(rooms);

        self.stats.write().await.active_rooms = active;
        log::info!("Created room {room}");
        doc
    }

    async fn resource_doc(&self) -> Doc {
        self.get_document(&self.config.room).await
    }

    /// Make sure `uri` has a text in the room, loading it from the store
    /// if needed. Concurrent calls for one resource share a single load.
    pub async fn request_initial_content(&self, uri: &str) -> Result<(), SeedError> {
        let doc = self.resource_doc().await;
        self.stats.write().await.seed_requests += 1;

        let future = {
            let mut in_flight = self.in_flight.lock().await;
            if has_text(&doc, uri) {
                log::debug!("{uri} already present, nothing to seed");
                return Ok(());
            }
            match in_flight.get(uri) {
                Some(entry) => {
                    log::debug!("Joining in-flight seed for {uri}");
                    entry.future.clone()
                }
                None => {
                    let id = self.next_request.fetch_add(1, Ordering::Relaxed);
                    let (abort, registration) = AbortHandle::new_pair();
                    let task = seed(SeedTask {
                        uri: uri.to_string(),
                        id,
                        doc,
                        store: self.store.clone(),
                        in_flight: self.in_flight.clone(),
                        stats: self.stats.clone(),
                    });
                    let removed = uri.to_string();
                    let future = Abortable::new(task, registration)
                        .map(move |result| {
                            result.unwrap_or_else(|_| Err(SeedError::Removed(removed)))
                        })
                        .boxed()
                        .shared();
                    in_flight.insert(
                        uri.to_string(),
                        InFlight {
                            id,
                            future: future.clone(),
                            abort,
                        },
                    );
                    future
                }
            }
        };

        match self.config.seed_timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| SeedError::Timeout(uri.to_string()))?,
            None => future.await,
        }
    }

    /// Remove `uri`'s text, rejecting any seed still in flight for it.
    pub async fn remove_text(&self, uri: &str) -> bool {
        let doc = self.resource_doc().await;
        let removed = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(entry) = in_flight.remove(uri) {
                entry.abort.abort();
                log::info!("Cancelled in-flight seed for {uri}");
            }
            remove_text(&doc, uri)
        };
        if removed {
            self.stats.write().await.removed_texts += 1;
            log::info!("Removed text {uri}");
        }
        removed
    }

    /// Created files are seeded, deleted files lose their text. Updates
    /// are left to clients, which ask for removal when unbound.
    pub async fn handle_file_event(&self, event: &FileEvent) -> Result<(), SeedError> {
        match event.kind {
            FileChangeKind::Created => self.request_initial_content(&event.uri).await,
            FileChangeKind::Deleted => {
                self.remove_text(&event.uri).await;
                Ok(())
            }
            FileChangeKind::Updated => {
                log::trace!("Ignoring update notification for {}", event.uri);
                Ok(())
            }
        }
    }

    // ── Update relay ────────────────────────────────────────────────

    pub async fn state_vector(&self, room: &str) -> Vec<u8> {
        let doc = self.get_document(room).await;
        let txn = doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Changes in `room` that a peer with `state_vector` is missing.
    pub async fn encode_diff(&self, room: &str, state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        let sv = StateVector::decode_v1(state_vector)?;
        let doc = self.get_document(room).await;
        let txn = doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    pub async fn apply_update(&self, room: &str, update: &[u8]) -> Result<(), SyncError> {
        let update = Update::decode_v1(update)?;
        let doc = self.get_document(room).await;
        apply(&doc, update)?;
        self.stats.write().await.applied_updates += 1;
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub async fn has_text(&self, uri: &str) -> bool {
        has_text(&self.resource_doc().await, uri)
    }

    pub async fn text_content(&self, uri: &str) -> Option<String> {
        let doc = self.resource_doc().await;
        let resources = doc.get_or_insert_map(RESOURCES);
        let txn = doc.transact();
        match resources.get(&txn, uri) {
            Some(Out::YText(text)) => Some(text.get_string(&txn)),
            _ => None,
        }
    }

    /// Resource URIs present in the room, sorted.
    pub async fn resources(&self) -> Vec<String> {
        let doc = self.resource_doc().await;
        let resources = doc.get_or_insert_map(RESOURCES);
        let txn = doc.transact();
        let mut keys: Vec<String> = resources.keys(&txn).map(str::to_string).collect();
        keys.sort();
        keys
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }
}

struct SeedTask {
    uri: String,
    id: u64,
    doc: Doc,
    store: Arc<dyn ContentStore>,
    in_flight: InFlightMap,
    stats: Arc<RwLock<ServerStats>>,
}

async fn seed(task: SeedTask) -> Result<(), SeedError> {
    let SeedTask {
        uri,
        id,
        doc,
        store,
        in_flight,
        stats,
    } = task;
    let loaded = store.load(&uri).await;

    {
        let mut in_flight = in_flight.lock().await;
        if !in_flight.get(&uri).is_some_and(|entry| entry.id == id) {
            // Removed (and possibly re-requested) while loading.
            return Err(SeedError::Removed(uri));
        }
        in_flight.remove(&uri);
        if let Ok(content) = &loaded {
            insert_text(&doc, &uri, content);
        }
    }

    match loaded {
        Ok(content) => {
            stats.write().await.seeded_texts += 1;
            log::info!("Seeded {uri} ({} bytes)", content.len());
            Ok(())
        }
        Err(e) => {
            stats.write().await.failed_seeds += 1;
            log::warn!("Failed to seed {uri}: {e}");
            Err(e)
        }
    }
}

fn resources_map(doc: &Doc) -> MapRef {
    doc.get_or_insert_map(RESOURCES)
}

fn has_text(doc: &Doc, uri: &str) -> bool {
    let resources = resources_map(doc);
    let txn = doc.transact();
    resources.get(&txn, uri).is_some()
}

fn insert_text(doc: &Doc, uri: &str, content: &str) {
    let resources = resources_map(doc);
    let mut txn = doc.transact_mut();
    if resources.get(&txn, uri).is_none() {
        resources.insert(&mut txn, uri, TextPrelim::new(content));
    }
}

fn remove_text(doc: &Doc, uri: &str) -> bool {
    let resources = resources_map(doc);
    let mut txn = doc.transact_mut();
    resources.remove(&mut txn, uri).is_some()
}

fn apply(doc: &Doc, update: Update) -> Result<(), SyncError> {
    let mut txn = doc.transact_mut();
    txn.apply_update(update)
        .map_err(|e| SyncError::Update(e.to_string()))
}
