//! Integration tests for the room server: deduplicated seeding,
//! cancellation on removal, and a full client round trip.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use logos_textsync::{
    Awareness, BindingManager, ContentStore, MemoryEditor, MemoryModel, MemoryStore,
    MemoryStyleSheet, RoomServer, SeedError, SeedQueue, SeedRequest, ServerConfig, SharedDocument,
    TextEdit, TextModel,
};
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};

/// A store whose loads block until the gate opens.
struct GatedStore {
    gate: Arc<Notify>,
    loads: Arc<AtomicUsize>,
    content: String,
}

impl ContentStore for GatedStore {
    fn load(&self, _uri: &str) -> BoxFuture<'static, Result<String, SeedError>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.clone();
        let content = self.content.clone();
        async move {
            gate.notified().await;
            Ok(content)
        }
        .boxed()
    }
}

fn gated_server(config: ServerConfig) -> (Arc<RoomServer>, Arc<Notify>, Arc<AtomicUsize>) {
    let gate = Arc::new(Notify::new());
    let loads = Arc::new(AtomicUsize::new(0));
    let store = GatedStore {
        gate: gate.clone(),
        loads: loads.clone(),
        content: "seeded content".to_string(),
    };
    (Arc::new(RoomServer::new(config, Arc::new(store))), gate, loads)
}

#[tokio::test]
async fn test_concurrent_requests_share_one_load() {
    let (server, gate, loads) = gated_server(ServerConfig::default());

    let first = tokio::spawn({
        let server = server.clone();
        async move { server.request_initial_content("file:///a.rs").await }
    });
    let second = tokio::spawn({
        let server = server.clone();
        async move { server.request_initial_content("file:///a.rs").await }
    });
    sleep(Duration::from_millis(20)).await;
    assert_eq!(server.in_flight_count().await, 1);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(
        server.text_content("file:///a.rs").await.as_deref(),
        Some("seeded content")
    );
    assert_eq!(server.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_removal_rejects_in_flight_request() {
    let (server, gate, _loads) = gated_server(ServerConfig::default());

    let waiter = tokio::spawn({
        let server = server.clone();
        async move { server.request_initial_content("file:///b.rs").await }
    });
    sleep(Duration::from_millis(20)).await;

    assert!(!server.remove_text("file:///b.rs").await);
    assert_eq!(
        waiter.await.unwrap(),
        Err(SeedError::Removed("file:///b.rs".into()))
    );

    // Opening the gate afterwards must not bring the text back.
    gate.notify_one();
    sleep(Duration::from_millis(20)).await;
    assert!(!server.has_text("file:///b.rs").await);
    assert_eq!(server.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_request_after_removal_starts_fresh() {
    let (server, gate, loads) = gated_server(ServerConfig::default());

    let cancelled = tokio::spawn({
        let server = server.clone();
        async move { server.request_initial_content("file:///c.rs").await }
    });
    sleep(Duration::from_millis(20)).await;
    server.remove_text("file:///c.rs").await;
    assert!(cancelled.await.unwrap().is_err());

    let retry = tokio::spawn({
        let server = server.clone();
        async move { server.request_initial_content("file:///c.rs").await }
    });
    sleep(Duration::from_millis(20)).await;
    gate.notify_one();
    assert_eq!(retry.await.unwrap(), Ok(()));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert!(server.has_text("file:///c.rs").await);
}

#[tokio::test]
async fn test_seed_timeout() {
    let (server, _gate, _loads) =
        gated_server(ServerConfig::with_seed_timeout(Duration::from_millis(30)));

    let result = server.request_initial_content("file:///slow.rs").await;
    assert_eq!(result, Err(SeedError::Timeout("file:///slow.rs".into())));
    assert!(!server.has_text("file:///slow.rs").await);
}

fn relay_down(server_update: &[u8], doc: &SharedDocument) {
    doc.apply_update(server_update).unwrap();
}

#[tokio::test]
async fn test_client_round_trip() {
    let store = MemoryStore::new();
    store.insert("file:///main.rs", "fn main() {}\n");
    let server = RoomServer::new(ServerConfig::default(), Arc::new(store));
    let room = server.config().room.clone();

    let doc = SharedDocument::new();
    let seeds = Rc::new(SeedQueue::new());
    let manager = BindingManager::new(
        doc.clone(),
        Rc::new(Awareness::new(1)),
        seeds.clone(),
        Rc::new(MemoryStyleSheet::new()),
    );
    let model = MemoryModel::new("");
    let editor = MemoryEditor::new(model.clone());
    manager
        .activate("file:///main.rs", model.clone(), Some(editor))
        .unwrap();

    for request in seeds.drain() {
        match request {
            SeedRequest::InitialContent(uri) => server.request_initial_content(&uri).await.unwrap(),
            SeedRequest::Remove(uri) => {
                server.remove_text(&uri).await;
            }
        }
    }
    let update = server.encode_diff(&room, &doc.state_vector()).await.unwrap();
    relay_down(&update, &doc);

    assert_eq!(model.text(), "fn main() {}\n");
    assert!(manager.binding("file:///main.rs").is_some());

    model
        .apply_edits(&[TextEdit::insert(11, "\n    println!(\"hi\");\n")])
        .unwrap();
    let up = doc
        .encode_diff(&server.state_vector(&room).await)
        .unwrap();
    server.apply_update(&room, &up).await.unwrap();

    assert_eq!(
        server.text_content("file:///main.rs").await.as_deref(),
        Some("fn main() {\n    println!(\"hi\");\n}\n")
    );
    assert_eq!(server.stats().await.applied_updates, 1);
}
