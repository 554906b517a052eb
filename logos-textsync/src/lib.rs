//! # logos-textsync — Collaborative text binding for Logos
//!
//! Keeps editor buffers in sync with texts held in a shared CRDT
//! document, and shows where remote collaborators are working.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  local edits   ┌──────────────┐  updates   ┌─────────────┐
//! │ TextModel /  │ ─────────────► │ TextBinding  │ ◄────────► │ RoomServer  │
//! │ CodeEditor   │ ◄───────────── │ (per uri)    │            │ (authority) │
//! └──────┬───────┘  remote deltas └──────┬───────┘            └──────┬──────┘
//!        │                               │                           │
//!        ▼                               ▼                           ▼
//! ┌──────────────┐               ┌──────────────┐            ┌─────────────┐
//! │ CursorReg-   │ ◄──────────── │  Awareness   │            │ ContentStore│
//! │ istry        │   presence    │  (presence)  │            │ (seeding)   │
//! └──────────────┘               └──────────────┘            └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`] — Shared document: resource texts, change events, update exchange
//! - [`binding`] — Two-way binding between one text and one buffer
//! - [`manager`] — Binding lifecycle across views and seed requests
//! - [`awareness`] — Presence channel (user info and selections per client)
//! - [`presence`] — Remote cursor widgets per editor
//! - [`styles`] — Per-client style rules
//! - [`room`] — Room/document server with deduplicated seeding
//! - [`offset`] — Byte and UTF-16 offset conversion
//! - [`surface`] — Editor and buffer abstractions, with in-memory implementations

pub mod awareness;
pub mod binding;
pub mod color;
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod manager;
pub mod offset;
pub mod position;
pub mod presence;
pub mod room;
pub mod store;
pub mod styles;
pub mod surface;

// Re-exports for convenience
pub use awareness::{Awareness, AwarenessUpdate, ClientId, PresenceChange, PresenceState};
pub use binding::{ApplyGuard, TextBinding};
pub use color::{color_for_client, CursorColor, PALETTE};
pub use config::{CollabConfig, ServerConfig, UserInfo, DEFAULT_ROOM};
pub use document::{DeltaRun, ResourceEvent, SharedDocument, TextChange};
pub use error::{SeedError, SyncError};
pub use event::{Emitter, Subscription};
pub use manager::{BindingManager, SeedQueue, SeedRequest, SeedRequester};
pub use position::{RelativePosition, RelativeSelection, WirePosition, WireSelection};
pub use presence::{CursorRegistries, CursorRegistry, CursorRegistryLookup, CursorWidget};
pub use room::{FileChangeKind, FileEvent, RoomServer, ServerStats};
pub use store::{ContentStore, FsStore, MemoryStore};
pub use styles::{ClientStyles, MemoryStyleSheet, StyleHost, StyleRule};
pub use surface::memory::{MemoryEditor, MemoryModel};
pub use surface::{
    CodeEditor, ContentChange, ContentWidget, Decoration, DecorationId, EditorId, ModelId,
    Position, Range, Selection, SelectionDirection, TextEdit, TextModel,
};
