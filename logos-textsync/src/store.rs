//! Where the room server reads initial resource content from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::SeedError;

/// Async source of a resource's content, keyed by URI.
pub trait ContentStore: Send + Sync + 'static {
    fn load(&self, uri: &str) -> BoxFuture<'static, Result<String, SeedError>>;
}

/// In-memory store, for tests and headless sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, content: impl Into<String>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.into(), content.into());
    }

    pub fn remove(&self, uri: &str) -> Option<String> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
    }
}

impl ContentStore for MemoryStore {
    fn load(&self, uri: &str) -> BoxFuture<'static, Result<String, SeedError>> {
        let result = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
            .ok_or_else(|| SeedError::NotFound(uri.to_string()));
        async move { result }.boxed()
    }
}

/// Reads `file://` URIs (or plain paths) from disk. Relative paths
/// resolve against `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FsStore {
    root: Option<PathBuf>,
}

impl FsStore {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn path_for(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ContentStore for FsStore {
    fn load(&self, uri: &str) -> BoxFuture<'static, Result<String, SeedError>> {
        let path = self.path_for(uri);
        let uri = uri.to_string();
        async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Ok(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SeedError::NotFound(uri)),
                Err(e) => Err(SeedError::io(uri, &e)),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_load() {
        let store = MemoryStore::new();
        store.insert("file:///a.rs", "fn a() {}");
        assert_eq!(store.load("file:///a.rs").await.unwrap(), "fn a() {}");

        store.remove("file:///a.rs");
        assert_eq!(
            store.load("file:///a.rs").await,
            Err(SeedError::NotFound("file:///a.rs".into()))
        );
    }

    #[test]
    fn test_fs_store_paths() {
        let store = FsStore::new(Some(PathBuf::from("/work")));
        assert_eq!(store.path_for("file:///abs/x.rs"), PathBuf::from("/abs/x.rs"));
        assert_eq!(store.path_for("src/lib.rs"), PathBuf::from("/work/src/lib.rs"));
        assert_eq!(FsStore::default().path_for("b.rs"), PathBuf::from("b.rs"));
    }

    #[tokio::test]
    async fn test_fs_store_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        let store = FsStore::new(Some(dir.path().to_path_buf()));

        assert_eq!(store.load("main.rs").await.unwrap(), "fn main() {}\n");
        assert_eq!(
            store.load("missing.rs").await,
            Err(SeedError::NotFound("missing.rs".into()))
        );
    }
}
