//! Error types for the text synchronization layer.
//!
//! Client-side failures (applying edits, decoding updates, presence
//! payloads) are [`SyncError`]. The server seed path uses [`SeedError`],
//! which is `Clone` so a single failure can be handed to every waiter of
//! a shared in-flight request.

use thiserror::Error;

/// Errors raised by documents, bindings and the presence channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A CRDT change carried a delta run that is not plain text
    /// (embed, formatting). Applying the rest would desynchronize the
    /// buffer from the CRDT text.
    #[error("unexpected delta run in {resource}: {kind}")]
    UnexpectedDelta { resource: String, kind: String },

    #[error("edit at {offset}+{length} is outside a buffer of {len} bytes or splits a character")]
    InvalidEdit { offset: usize, length: usize, len: usize },

    #[error("no shared text for resource {0}")]
    UnknownResource(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("update rejected: {0}")]
    Update(String),

    #[error("presence payload: {0}")]
    Presence(String),

    #[error("binding for {0} is disposed")]
    Disposed(String),
}

impl From<yrs::encoding::read::Error> for SyncError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

/// Errors from seeding a resource's initial content on the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    #[error("no stored content for {0}")]
    NotFound(String),

    #[error("reading {uri} failed: {message}")]
    Io { uri: String, message: String },

    /// The text was removed while the seed request was still in flight.
    #[error("{0} was removed before seeding completed")]
    Removed(String),

    #[error("seeding {0} timed out")]
    Timeout(String),
}

impl SeedError {
    pub fn io(uri: impl Into<String>, err: &std::io::Error) -> Self {
        SeedError::Io {
            uri: uri.into(),
            message: err.to_string(),
        }
    }
}
