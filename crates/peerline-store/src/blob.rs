use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use peerline_shared::constants::MAX_FILE_SIZE;

use crate::error::StoreError;

const CONTENT_ID_LEN: usize = 64;

/// Storage for file attachments, addressed by content id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its content id. Storing the same bytes twice
    /// returns the same id.
    async fn put(&self, data: &[u8]) -> Result<String, StoreError>;

    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Largest blob `put` accepts.
    fn max_size(&self) -> usize;
}

/// Lowercase hex BLAKE3 of the bytes.
pub fn content_id(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

fn check_put(data: &[u8], max: usize) -> Result<(), StoreError> {
    if data.is_empty() {
        return Err(StoreError::Empty);
    }
    if data.len() > max {
        return Err(StoreError::TooLarge {
            size: data.len(),
            max,
        });
    }
    Ok(())
}

/// Whether `id` has the shape of an id minted by [`content_id`].
///
/// Such ids only resolve against a local store, never on a public gateway.
pub fn is_local_content_id(id: &str) -> bool {
    id.len() == CONTENT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if is_local_content_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidContentId(id.to_string()))
    }
}

/// Verify that a resolved path stays within the base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, StoreError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(StoreError::InvalidContentId(target.display().to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(StoreError::InvalidContentId(target.display().to_string()));
    }
    Ok(resolved)
}

/// Blobs as files named by content id under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FsBlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_path).await?;

        info!(path = %base_path.display(), max_size, "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        check_id(id)?;
        ensure_within(&self.base_path, &self.base_path.join(id))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: &[u8]) -> Result<String, StoreError> {
        check_put(data, self.max_size)?;

        let id = content_id(data);
        let path = self.blob_path(&id)?;

        if fs::try_exists(&path).await? {
            debug!(id = %id, "Blob already stored");
            return Ok(id);
        }

        fs::write(&path, data).await?;
        debug!(id = %id, size = data.len(), "Stored blob");
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(id)?;

        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let data = fs::read(&path).await?;
        debug!(id = %id, size = data.len(), "Retrieved blob");
        Ok(data)
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// In-memory blobs.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    max_size: usize,
}

impl MemoryBlobStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8]) -> Result<String, StoreError> {
        check_put(data, self.max_size)?;
        let id = content_id(data);
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_insert_with(|| data.to_vec());
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        check_id(id)?;
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}
