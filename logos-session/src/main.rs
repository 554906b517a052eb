//! Logos Session — headless collaborative editing session.
//!
//! Starts a room server backed by an in-memory store, attaches two
//! clients to the same resource, and relays document updates and
//! presence between them until both buffers converge. Set `RUST_LOG`
//! to watch bindings being created and seeds being served.

use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;

use log::{info, warn};

use logos_textsync::{
    Awareness, BindingManager, CodeEditor, CollabConfig, MemoryEditor, MemoryModel, MemoryStore,
    MemoryStyleSheet, RoomServer, SeedQueue, SeedRequest, ServerConfig, SharedDocument, TextEdit,
    TextModel, UserInfo,
};

const URI: &str = "file:///workspace/src/main.rs";

/// One editing client: shared document, presence and a single editor.
struct Client {
    name: String,
    room: String,
    doc: SharedDocument,
    awareness: Rc<Awareness>,
    seeds: Rc<SeedQueue>,
    manager: BindingManager,
    model: Rc<MemoryModel>,
    editor: Rc<MemoryEditor>,
}

impl Client {
    fn new(config: &CollabConfig) -> Self {
        let doc = SharedDocument::new();
        let awareness = Rc::new(Awareness::new(config.resolve_client_id()));
        let seeds = Rc::new(SeedQueue::new());
        let manager = BindingManager::new(
            doc.clone(),
            awareness.clone(),
            seeds.clone(),
            Rc::new(MemoryStyleSheet::new()),
        );
        let user = config.resolve_user();
        manager.register_user_info(Some(user.clone()));

        let model = MemoryModel::new("");
        let editor = MemoryEditor::new(model.clone());
        Self {
            name: user.nickname,
            room: config.room.clone(),
            doc,
            awareness,
            seeds,
            manager,
            model,
            editor,
        }
    }

    fn open(&self, uri: &str) -> Result<(), Box<dyn Error>> {
        let editor: Rc<dyn CodeEditor> = self.editor.clone();
        self.manager.activate(uri, self.model.clone(), Some(editor))?;
        Ok(())
    }

    /// Forward queued seed requests to the server.
    async fn send_requests(&self, server: &RoomServer) {
        for request in self.seeds.drain() {
            match request {
                SeedRequest::InitialContent(uri) => {
                    if let Err(e) = server.request_initial_content(&uri).await {
                        warn!("{}: seeding {uri} failed: {e}", self.name);
                    }
                }
                SeedRequest::Remove(uri) => {
                    server.remove_text(&uri).await;
                }
            }
        }
    }

    async fn pull(&self, server: &RoomServer) -> Result<(), Box<dyn Error>> {
        let update = server.encode_diff(&self.room, &self.doc.state_vector()).await?;
        self.doc.apply_update(&update)?;
        Ok(())
    }

    async fn push(&self, server: &RoomServer) -> Result<(), Box<dyn Error>> {
        let server_sv = server.state_vector(&self.room).await;
        let update = self.doc.encode_diff(&server_sv)?;
        server.apply_update(&self.room, &update).await?;
        Ok(())
    }

    fn share_presence(&self, other: &Client) -> Result<(), Box<dyn Error>> {
        let payload = self.awareness.encode_local_update()?;
        other.awareness.apply_update(&payload)?;
        Ok(())
    }
}

fn client_config(client_id: u64, nickname: &str) -> CollabConfig {
    CollabConfig {
        client_id: Some(client_id),
        ..CollabConfig::with_user(UserInfo::new(format!("user-{client_id}"), nickname))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    info!("Starting Logos session...");

    let store = MemoryStore::new();
    store.insert(URI, "fn main() {\n}\n");
    let server = RoomServer::new(ServerConfig::default(), Arc::new(store));

    let alice = Client::new(&client_config(1, "alice"));
    let bob = Client::new(&client_config(2, "bob"));

    for client in [&alice, &bob] {
        client.open(URI)?;
        client.send_requests(&server).await;
        client.pull(&server).await?;
    }
    info!("Both clients bound to {URI}");

    // Concurrent edits on either side of the closing brace.
    alice
        .model
        .apply_edits(&[TextEdit::insert(12, "    println!(\"hello\");\n")])?;
    bob.model.apply_edits(&[TextEdit::insert(14, "\nfn helper() {}\n")])?;

    for client in [&alice, &bob] {
        client.push(&server).await?;
    }
    for client in [&alice, &bob] {
        client.pull(&server).await?;
    }

    bob.editor.select_offsets(3, 7);
    bob.share_presence(&alice)?;
    alice.share_presence(&bob)?;

    for client in [&alice, &bob] {
        info!(
            "{} sees {} remote decoration(s)",
            client.name,
            client.editor.decorations().len()
        );
    }

    if alice.model.text() == bob.model.text() {
        info!("Buffers converged:\n{}", alice.model.text());
    } else {
        warn!(
            "Buffers diverged:\n--- {}\n{}\n--- {}\n{}",
            alice.name,
            alice.model.text(),
            bob.name,
            bob.model.text()
        );
    }

    alice.manager.destroy();
    bob.manager.destroy();
    info!("Server stats: {:?}", server.stats().await);
    Ok(())
}
