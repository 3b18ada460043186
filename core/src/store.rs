use crate::backend::Backend;
use crate::crypto::Encryptor;
use crate::types::Digest;
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const OBJECTS_DIR: &str = "objects";

/// Content-addressed, deduplicating blob store.
///
/// Objects are keyed by the BLAKE3 digest of their plaintext and persisted
/// zlib-compressed then encrypted, sharded by the first two hex characters:
///
/// ```text
/// objects/
/// ├── 3f/
/// │   └── a09c…    # 62 remaining hex chars
/// └── e1/
///     └── 77b2…
/// ```
///
/// Chunks and serialized File/Index metadata are stored the same way; the
/// store never looks inside a blob.
pub struct ObjectStore {
    backend: Arc<dyn Backend>,
    encryptor: Arc<Encryptor>,
    verify_existing: bool,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn Backend>, encryptor: Arc<Encryptor>) -> Self {
        Self {
            backend,
            encryptor,
            verify_existing: false,
        }
    }

    /// Fully decode and compare an existing object on every duplicate `put`
    /// instead of only checking its stored length.
    pub fn with_verify_existing(mut self, verify: bool) -> Self {
        self.verify_existing = verify;
        self
    }

    pub fn object_key(digest: &Digest) -> String {
        let hex = digest.to_hex();
        format!("{}/{}/{}", OBJECTS_DIR, &hex[..2], &hex[2..])
    }

    fn parse_key(key: &str) -> Option<Digest> {
        let rest = key.strip_prefix(OBJECTS_DIR)?.strip_prefix('/')?;
        let (shard, tail) = rest.split_once('/')?;
        Digest::from_str(&format!("{}{}", shard, tail)).ok()
    }

    /// Stores `data` and returns its digest. Storing content that is already
    /// present writes nothing.
    pub async fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::from_data(data);
        let key = Self::object_key(&digest);
        let compressed = compress(data)?;

        if self.backend.exists(&key).await? {
            self.check_existing(&digest, &key, data, compressed.len()).await?;
            debug!(object = %digest.short_string(), "Object already stored");
            return Ok(digest);
        }

        let sealed = self.encryptor.encrypt(&compressed)?;
        self.backend.write(&key, Bytes::from(sealed)).await?;
        Ok(digest)
    }

    async fn check_existing(
        &self,
        digest: &Digest,
        key: &str,
        data: &[u8],
        compressed_len: usize,
    ) -> Result<()> {
        if !self.verify_existing {
            let stored = self.backend.stat(key).await?.size;
            if stored == Encryptor::sealed_len(compressed_len) as u64 {
                return Ok(());
            }
            // A different compressor build may legitimately change the
            // length, so only a full comparison can call it a collision.
            warn!(object = %digest.short_string(), stored, "Stored length differs, verifying content");
        }

        // No hash check here, a mismatch is the collision itself.
        let existing = self.open(digest).await?;
        if existing != data {
            return Err(Error::Collision { id: digest.to_hex() });
        }
        Ok(())
    }

    /// Fetches and verifies an object.
    pub async fn get(&self, digest: &Digest) -> Result<Bytes> {
        let data = self.open(digest).await?;
        let actual = Digest::from_data(&data);
        if actual != *digest {
            return Err(Error::corrupt(
                digest,
                format!("content hashes to {}", actual.short_string()),
            ));
        }
        Ok(Bytes::from(data))
    }

    /// Reads, decrypts and decompresses the object stored under `digest`
    /// without checking its content against the digest.
    async fn open(&self, digest: &Digest) -> Result<Vec<u8>> {
        let key = Self::object_key(digest);
        let sealed = self.backend.read(&key).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found(digest),
            other => other,
        })?;

        let compressed = self
            .encryptor
            .decrypt(&sealed)
            .map_err(|e| Error::corrupt(digest, e))?;
        decompress(&compressed).map_err(|e| Error::corrupt(digest, e))
    }

    pub async fn has(&self, digest: &Digest) -> Result<bool> {
        self.backend.exists(&Self::object_key(digest)).await
    }

    pub async fn delete(&self, digest: &Digest) -> Result<()> {
        self.backend.delete(&Self::object_key(digest)).await
    }

    /// Clears temp files left by writes that never completed.
    pub async fn sweep_temp(&self, grace: Duration, dry_run: bool) -> Result<usize> {
        self.backend.sweep_temp(grace, dry_run).await
    }

    /// Digests of every stored object.
    pub async fn list(&self) -> Result<Vec<Digest>> {
        let keys = self.backend.list(OBJECTS_DIR).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let digest = Self::parse_key(key);
                if digest.is_none() {
                    warn!(key = %key, "Skipping foreign file in object directory");
                }
                digest
            })
            .collect())
    }

    /// Bytes the object occupies at rest.
    pub async fn stored_size(&self, digest: &Digest) -> Result<u64> {
        let key = Self::object_key(digest);
        match self.backend.stat(&key).await {
            Ok(info) => Ok(info.size),
            Err(Error::NotFound { .. }) => Err(Error::not_found(digest)),
            Err(e) => Err(e),
        }
    }

    pub async fn put_json<T: Serialize>(&self, value: &T) -> Result<Digest> {
        let data = serde_json::to_vec(value)?;
        self.put(&data).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, digest: &Digest) -> Result<T> {
        let data = self.get(digest).await?;
        serde_json::from_slice(&data).map_err(|e| Error::corrupt(digest, e))
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder.read_to_end(&mut result)?;
    Ok(result)
}
