//! Client and server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room every resource text lives in unless configured otherwise.
pub const DEFAULT_ROOM: &str = "logos-workspace";

/// Identity shown next to this client's cursor on other clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub nickname: String,
}

impl UserInfo {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
        }
    }

    /// Generate an anonymous identity for clients that never registered one.
    pub fn anonymous() -> Self {
        let id = Uuid::new_v4().to_string();
        let nickname = format!("guest-{}", &id[..8]);
        Self { id, nickname }
    }
}

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Room to attach the shared document to
    pub room: String,
    /// Identity published on the presence channel (None = anonymous)
    pub user: Option<UserInfo>,
    /// Fixed presence client id (None = random)
    pub client_id: Option<u64>,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            user: None,
            client_id: None,
        }
    }
}

impl CollabConfig {
    pub fn with_user(user: UserInfo) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }

    /// The configured client id, or a fresh random one.
    pub fn resolve_client_id(&self) -> u64 {
        self.client_id.unwrap_or_else(|| {
            // Keep ids within the range JavaScript peers can represent exactly.
            (Uuid::new_v4().as_u128() as u64) & 0x001F_FFFF_FFFF_FFFF
        })
    }

    pub fn resolve_user(&self) -> UserInfo {
        self.user.clone().unwrap_or_else(UserInfo::anonymous)
    }
}

/// Room/document server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Room that resource texts are seeded into
    pub room: String,
    /// Root directory for relative paths in the filesystem store
    pub storage_root: Option<PathBuf>,
    /// Upper bound for a single seed request (None = wait indefinitely)
    pub seed_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            storage_root: None,
            seed_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn with_storage_root(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_seed_timeout(timeout: Duration) -> Self {
        Self {
            seed_timeout: Some(timeout),
            ..Self::default()
        }
    }
}
