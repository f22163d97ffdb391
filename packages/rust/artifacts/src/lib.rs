//! Object-store interface for input documents and rendered artifacts.
//!
//! Durable storage is an external collaborator; the pipeline only depends on
//! the [`ObjectStore`] seam. [`FsObjectStore`] is the bundled implementation,
//! keeping everything under one local root directory. Download access goes
//! through short-lived signed references rather than raw keys.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use tailor_shared::{Result, TailorError};

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Tenant-scoped blob storage. Keys are `/`-separated and always start with
/// the tenant id; implementations must reject traversal outside their root.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `key`, overwriting any existing object.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch an object, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete an object. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Signed references
// ---------------------------------------------------------------------------

/// A time-limited download reference handed to API consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedReference {
    pub key: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issue a signed reference for `key`, valid for `ttl`.
pub fn sign_reference(key: &str, secret: &str, ttl: Duration) -> SignedReference {
    let expires_at = Utc::now() + ttl;
    SignedReference {
        key: key.to_string(),
        token: reference_token(key, secret, expires_at),
        expires_at,
    }
}

/// Check a reference's token and expiry against the current time.
pub fn verify_reference(reference: &SignedReference, secret: &str) -> bool {
    reference.expires_at > Utc::now()
        && reference.token == reference_token(&reference.key, secret, reference.expires_at)
}

fn reference_token(key: &str, secret: &str, expires_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    hasher.update(expires_at.timestamp().to_be_bytes());
    hasher.update(b"\n");
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of artifact bytes, recorded in the artifact registry.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Filesystem implementation
// ---------------------------------------------------------------------------

/// Local-directory object store.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| TailorError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Resolve a key to a path under the root, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(TailorError::ObjectStore("empty object key".into()));
        }
        let path = Path::new(key);
        let traversal = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if traversal {
            return Err(TailorError::ObjectStore(format!(
                "object key '{key}' escapes the store root"
            )));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TailorError::io(parent, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| TailorError::io(&path, e))?;
        debug!(key, len = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TailorError::io(&path, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| TailorError::io(&path, e))?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(TailorError::io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| TailorError::io(&dir, e))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TailorError::io(&path, e)),
        }
    }
}
