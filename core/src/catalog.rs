use crate::backend::Backend;
use crate::codec;
use crate::types::{Digest, FileID};
use crate::{Error, Result};
use bytes::Bytes;
use std::str::FromStr;
use std::sync::Arc;

pub const FILES_DIR: &str = "refs/files";

/// Maps File ids to the digest of their metadata blob.
///
/// File ids are derived from path, time and chunk list rather than from the
/// serialized File, so the object store alone cannot resolve them.
pub struct FileCatalog {
    backend: Arc<dyn Backend>,
}

impl FileCatalog {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn key(id: &str) -> Result<String> {
        if !codec::is_valid_id(id) {
            return Err(Error::not_found(id));
        }
        Ok(format!("{}/{}/{}", FILES_DIR, &id[..2], &id[2..]))
    }

    /// Records where the metadata of `id` lives, replacing an entry that
    /// points anywhere else.
    pub async fn record(&self, id: &str, digest: &Digest) -> Result<()> {
        let key = Self::key(id)?;
        match self.lookup(id).await {
            Ok(existing) if existing == *digest => return Ok(()),
            Ok(_) | Err(Error::NotFound { .. }) | Err(Error::Corrupt { .. }) => {}
            Err(e) => return Err(e),
        }
        self.backend.write(&key, Bytes::from(digest.to_hex())).await
    }

    pub async fn lookup(&self, id: &str) -> Result<Digest> {
        let data = self.backend.read(&Self::key(id)?).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found(id),
            other => other,
        })?;
        let text = String::from_utf8_lossy(&data);
        Digest::from_str(text.trim()).map_err(|e| Error::corrupt(id, e))
    }

    pub async fn ids(&self) -> Result<Vec<FileID>> {
        let keys = self.backend.list(FILES_DIR).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(FILES_DIR)?.strip_prefix('/')?;
                let id = rest.replace('/', "");
                codec::is_valid_id(&id).then_some(id)
            })
            .collect())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.backend.delete(&Self::key(id)?).await
    }
}
