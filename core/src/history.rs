use crate::backend::Backend;
use crate::snapshot::Index;
use crate::store::ObjectStore;
use crate::types::{Digest, IndexID};
use crate::{Error, Result};
use bytes::Bytes;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const LATEST_KEY: &str = "refs/latest";
pub const INDEXES_DIR: &str = "refs/indexes";

/// Append-only chain of snapshots.
///
/// Each retained Index has a ref `refs/indexes/<id>` holding the digest of
/// its metadata blob; `refs/latest` names the head. Lineage follows
/// `parent` links, so forgetting an Index truncates the lineage of
/// everything built on top of it.
pub struct History {
    backend: Arc<dyn Backend>,
    store: Arc<ObjectStore>,
    head: Mutex<()>,
}

impl History {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<ObjectStore>) -> Self {
        Self {
            backend,
            store,
            head: Mutex::new(()),
        }
    }

    fn index_key(id: &str) -> Result<String> {
        // Ids become path components; anything but a digest is unknown.
        if Digest::from_str(id).is_err() {
            return Err(Error::not_found(id));
        }
        Ok(format!("{}/{}", INDEXES_DIR, id))
    }

    pub async fn latest_id(&self) -> Result<Option<IndexID>> {
        match self.backend.read(LATEST_KEY).await {
            Ok(data) => {
                let id = String::from_utf8_lossy(&data).trim().to_string();
                Ok((!id.is_empty()).then_some(id))
            }
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn latest(&self) -> Result<Option<Index>> {
        match self.latest_id().await? {
            Some(id) => Ok(Some(self.get(&id).await?)),
            None => Ok(None),
        }
    }

    /// Digest of the metadata blob of a retained Index.
    pub async fn index_digest(&self, id: &str) -> Result<Digest> {
        let data = self
            .backend
            .read(&Self::index_key(id)?)
            .await
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::not_found(id),
                other => other,
            })?;
        let text = String::from_utf8_lossy(&data);
        Digest::from_str(text.trim()).map_err(|e| Error::corrupt(id, e))
    }

    pub async fn get(&self, id: &str) -> Result<Index> {
        let digest = self.index_digest(id).await?;
        let index: Index = self.store.get_json(&digest).await?;
        if index.id != id {
            return Err(Error::corrupt(id, format!("ref points at index {}", index.short_id())));
        }
        Ok(index)
    }

    pub async fn contains(&self, id: &str) -> Result<bool> {
        match Self::index_key(id) {
            Ok(key) => self.backend.exists(&key).await,
            Err(_) => Ok(false),
        }
    }

    /// Persists `index` and moves the head to it. The head must still be the
    /// Index's parent; anything else means another writer got there first.
    pub async fn append(&self, index: &Index) -> Result<Digest> {
        let _guard = self.head.lock().await;

        let current = self.latest_id().await?;
        if current != index.parent {
            return Err(Error::Conflict(format!(
                "history head moved to {} while indexing on top of {}",
                current.as_deref().unwrap_or("<none>"),
                index.parent.as_deref().unwrap_or("<none>")
            )));
        }

        let digest = self.store.put_json(index).await?;
        self.backend
            .write(&Self::index_key(&index.id)?, Bytes::from(digest.to_hex()))
            .await?;
        self.backend
            .write(LATEST_KEY, Bytes::from(index.id.clone()))
            .await?;

        info!(index = %index.short_id(), files = index.count, "Appended index to history");
        Ok(digest)
    }

    /// Ids of every retained Index.
    pub async fn ids(&self) -> Result<Vec<IndexID>> {
        let keys = self.backend.list(INDEXES_DIR).await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.rsplit('/').next())
            .filter(|id| Digest::from_str(id).is_ok())
            .map(str::to_string)
            .collect())
    }

    /// Every retained Index, most recent first.
    pub async fn all(&self) -> Result<Vec<Index>> {
        let mut indexes = Vec::new();
        for id in self.ids().await? {
            indexes.push(self.get(&id).await?);
        }
        indexes.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(indexes)
    }

    /// Walks `parent` links from `from` (the head when `None`), newest first.
    /// Stops at the first parent that is no longer retained.
    pub async fn lineage(&self, from: Option<&str>, limit: Option<usize>) -> Result<Vec<Index>> {
        let mut next = match from {
            Some(id) => Some(id.to_string()),
            None => self.latest_id().await?,
        };

        let limit = limit.unwrap_or(usize::MAX);
        let mut chain = Vec::new();
        while let Some(id) = next.take() {
            if chain.len() >= limit {
                break;
            }
            if !chain.is_empty() && !self.contains(&id).await? {
                debug!(index = %id, "Lineage reaches a forgotten index");
                break;
            }
            let index = self.get(&id).await?;
            next = index.parent.clone();
            chain.push(index);
        }
        Ok(chain)
    }

    /// Unlinks a non-head Index so purge can reclaim what only it reached.
    pub async fn forget(&self, id: &str) -> Result<()> {
        let _guard = self.head.lock().await;

        if self.latest_id().await?.as_deref() == Some(id) {
            return Err(Error::Conflict(format!("cannot forget the latest index {}", id)));
        }
        let key = Self::index_key(id)?;
        if !self.backend.exists(&key).await? {
            return Err(Error::not_found(id));
        }
        self.backend.delete(&key).await?;
        info!(index = %id, "Forgot index");
        Ok(())
    }
}
