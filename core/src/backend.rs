use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Local,
    Memory,
}

/// Flat key/value persistence under a repository root. Keys are
/// `/`-separated relative paths.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Fails with [`Error::NotFound`] when the key is absent.
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Replaces the value atomically: readers see the old or the new bytes,
    /// never a partial write.
    async fn write(&self, key: &str, data: Bytes) -> Result<()>;

    /// Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every key below `prefix`, recursively, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn stat(&self, key: &str) -> Result<ObjectInfo>;

    /// Removes temp files abandoned by interrupted writes that are older
    /// than `grace`, returning how many were (or would be) removed.
    async fn sweep_temp(&self, grace: Duration, dry_run: bool) -> Result<usize>;

    fn backend_type(&self) -> BackendType;
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

const TMP_MARKER: &str = ".tmp-";

pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

fn map_io(op: &str, key: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::not_found(key)
    } else {
        Error::Store(format!("Failed to {} {}: {}", op, key, e))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Error::io_at(&self.base_path, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        fs::try_exists(self.full_path(key))
            .await
            .map_err(|e| map_io("stat", key, e))
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        let data = fs::read(self.full_path(key))
            .await
            .map_err(|e| map_io("read", key, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        let full_path = self.full_path(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io("create", key, e))?;
        }

        // Same-directory temp file so the rename stays on one filesystem.
        let mut tmp_name = full_path.as_os_str().to_owned();
        tmp_name.push(format!("{}{}", TMP_MARKER, uuid::Uuid::new_v4().simple()));
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, &data)
            .await
            .map_err(|e| map_io("write", key, e))?;
        if let Err(e) = fs::rename(&tmp_path, &full_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(map_io("write", key, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.full_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.base_path.clone();
        let root = self.full_path(prefix);
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut results = Vec::new();
            if !root.is_dir() {
                return Ok(results);
            }
            for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::Store(format!("Failed to list {}: {}", prefix, e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.contains(TMP_MARKER) {
                    results.push(key);
                }
            }
            results.sort();
            Ok(results)
        })
        .await
        .map_err(|e| Error::Store(format!("List task failed: {}", e)))?
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let metadata = fs::metadata(self.full_path(key))
            .await
            .map_err(|e| map_io("stat", key, e))?;

        let modified = metadata
            .modified()
            .map_err(|e| Error::Store(format!("Failed to get modified time: {}", e)))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: metadata.len(),
            modified: modified.into(),
        })
    }

    async fn sweep_temp(&self, grace: Duration, dry_run: bool) -> Result<usize> {
        let base = self.base_path.clone();
        let cutoff = SystemTime::now().checked_sub(grace).unwrap_or(SystemTime::UNIX_EPOCH);

        let stale = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let mut stale = Vec::new();
            if !base.is_dir() {
                return Ok(stale);
            }
            for entry in walkdir::WalkDir::new(&base) {
                let entry = entry.map_err(|e| Error::Store(format!("Failed to scan {}: {}", base.display(), e)))?;
                if !entry.file_type().is_file()
                    || !entry.file_name().to_string_lossy().contains(TMP_MARKER)
                {
                    continue;
                }
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if modified <= cutoff {
                    stale.push(entry.into_path());
                }
            }
            Ok(stale)
        })
        .await
        .map_err(|e| Error::Store(format!("Sweep task failed: {}", e)))??;

        if !dry_run {
            for path in &stale {
                match fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io_at(path, e)),
                }
            }
        }
        Ok(stale.len())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }
}

/// Volatile backend for tests and throwaway repositories.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, (Bytes, DateTime<Utc>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::not_found(key))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(&dir))
            .cloned()
            .collect())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let objects = self.objects.read().await;
        let (data, modified) = objects.get(key).ok_or_else(|| Error::not_found(key))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            modified: *modified,
        })
    }

    // Writes are never partial here.
    async fn sweep_temp(&self, _grace: Duration, _dry_run: bool) -> Result<usize> {
        Ok(0)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }
}
