//! Read access to repository content.
//!
//! The sync subsystem never mutates the repository. Builders walk it through
//! the [`Repository`] trait so that a live persistence layer, a catalog file or
//! a test fixture can stand behind it.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{Bitstream, Item, Scope};

/// Read-only view of the repository's object model.
pub trait Repository: Send + Sync {
    /// One page of the items reachable under a scope, ordered deterministically.
    fn items_page(&self, scope: &Scope, offset: usize, limit: usize)
        -> Result<Vec<Item>, SyncError>;

    /// Look an item up by repository identifier.
    fn item(&self, id: &str) -> Result<Option<Item>, SyncError>;

    /// Look an item up by handle.
    fn item_by_handle(&self, handle: &str) -> Result<Option<Item>, SyncError>;

    /// Look a bitstream up by identifier, together with its owning item.
    fn bitstream(&self, id: &str) -> Result<Option<(Item, Bitstream)>, SyncError>;

    /// Open the raw bytes of a bitstream.
    fn open_bitstream(&self, bitstream: &Bitstream) -> Result<Box<dyn Read + Send>, SyncError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<Item>,
}

/// In-process repository backed by a catalog of items.
///
/// Bitstream bytes come from an in-memory blob map first, then from
/// `content_dir/<bitstream id>` when a content directory is configured.
pub struct CatalogRepository {
    items: RwLock<Vec<Item>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    content_dir: Option<PathBuf>,
}

impl CatalogRepository {
    /// Create an empty catalog without a content directory.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            blobs: RwLock::new(HashMap::new()),
            content_dir: None,
        }
    }

    /// Create an empty catalog serving bytes from `content_dir`.
    pub fn with_content_dir(content_dir: Option<PathBuf>) -> Self {
        Self {
            content_dir,
            ..Self::new()
        }
    }

    /// Load a JSON catalog (`{"items": [...]}`) and serve bytes from `content_dir`.
    pub fn from_file(catalog: &Path, content_dir: Option<PathBuf>) -> Result<Self, SyncError> {
        let contents = fs::read_to_string(catalog)?;
        let parsed: CatalogFile =
            serde_json::from_str(&contents).map_err(|e| SyncError::Repository {
                msg: format!("invalid catalog {}: {}", catalog.display(), e),
            })?;

        let repo = Self::with_content_dir(content_dir);
        for item in parsed.items {
            repo.upsert_item(item)?;
        }
        Ok(repo)
    }

    /// Insert an item, replacing any item with the same identifier.
    pub fn upsert_item(&self, item: Item) -> Result<(), SyncError> {
        let mut items = self.items.write().map_err(lock_error)?;
        items.retain(|i| i.id != item.id);
        let pos = items
            .binary_search_by(|i| i.handle.cmp(&item.handle))
            .unwrap_or_else(|p| p);
        items.insert(pos, item);
        Ok(())
    }

    /// Remove an item; returns it if it existed.
    pub fn remove_item(&self, id: &str) -> Result<Option<Item>, SyncError> {
        let mut items = self.items.write().map_err(lock_error)?;
        let pos = items.iter().position(|i| i.id == id);
        Ok(pos.map(|p| items.remove(p)))
    }

    /// Store the bytes of a bitstream in memory.
    pub fn put_content(&self, bitstream_id: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        self.blobs
            .write()
            .map_err(lock_error)?
            .insert(bitstream_id.to_string(), bytes);
        Ok(())
    }

    /// Number of items in the catalog.
    pub fn len(&self) -> usize {
        self.items.read().map(|i| i.len()).unwrap_or(0)
    }

    /// True if the catalog holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CatalogRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_error<T>(err: std::sync::PoisonError<T>) -> SyncError {
    SyncError::Repository {
        msg: err.to_string(),
    }
}

impl Repository for CatalogRepository {
    fn items_page(
        &self,
        scope: &Scope,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Item>, SyncError> {
        let items = self.items.read().map_err(lock_error)?;
        Ok(items
            .iter()
            .filter(|item| match scope {
                Scope::Site => true,
                Scope::Container(handle) => item.is_contained_in(handle),
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn item(&self, id: &str) -> Result<Option<Item>, SyncError> {
        let items = self.items.read().map_err(lock_error)?;
        Ok(items.iter().find(|i| i.id == id).cloned())
    }

    fn item_by_handle(&self, handle: &str) -> Result<Option<Item>, SyncError> {
        let items = self.items.read().map_err(lock_error)?;
        Ok(items.iter().find(|i| i.handle == handle).cloned())
    }

    fn bitstream(&self, id: &str) -> Result<Option<(Item, Bitstream)>, SyncError> {
        let items = self.items.read().map_err(lock_error)?;
        for item in items.iter() {
            let found = item
                .bundles
                .iter()
                .flat_map(|b| b.bitstreams.iter())
                .find(|bs| bs.id == id);
            if let Some(bs) = found {
                return Ok(Some((item.clone(), bs.clone())));
            }
        }
        Ok(None)
    }

    fn open_bitstream(&self, bitstream: &Bitstream) -> Result<Box<dyn Read + Send>, SyncError> {
        if let Some(bytes) = self.blobs.read().map_err(lock_error)?.get(&bitstream.id) {
            return Ok(Box::new(Cursor::new(bytes.clone())));
        }
        if let Some(dir) = &self.content_dir {
            let path = dir.join(&bitstream.id);
            if path.is_file() {
                return Ok(Box::new(fs::File::open(path)?));
            }
        }
        Err(SyncError::not_found(format!(
            "content of bitstream {}",
            bitstream.id
        )))
    }
}
