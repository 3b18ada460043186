use crate::codec;
use crate::types::{Digest, FileID, IndexID};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One regular file captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileID,
    /// Relative to the data root, always `/`-separated.
    pub path: String,
    pub size: u64,
    /// Modification time in milliseconds since the epoch.
    pub updated: i64,
    pub chunks: Vec<Digest>,
}

impl File {
    /// A file with a provisional id and no chunks yet.
    pub fn new(path: impl Into<String>, size: u64, updated: i64) -> Self {
        let path = path.into();
        Self {
            id: codec::provisional_id(&path, updated),
            path,
            size,
            updated,
            chunks: Vec::new(),
        }
    }

    /// Sets the chunk list and upgrades the id to its final form.
    pub fn finalize(&mut self, chunks: Vec<Digest>) {
        self.chunks = chunks;
        self.id = codec::finalize_id(&self.id, &self.chunks);
    }

    pub fn sec_updated(&self) -> i64 {
        self.updated / 1000
    }

    /// Path and timestamp part of the id.
    pub fn id_prefix(&self) -> &str {
        codec::id_prefix(&self.id)
    }
}

/// An immutable snapshot of the data tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub id: IndexID,
    pub memo: String,
    pub parent: Option<IndexID>,
    /// Milliseconds since the epoch.
    pub created: i64,
    /// Sorted File ids.
    pub files: Vec<FileID>,
    pub count: usize,
    pub size: u64,
    /// Stable identifier of the machine that took the snapshot. Empty in
    /// snapshots recorded before it existed.
    #[serde(default)]
    pub system_id: String,
    pub system_name: String,
    pub system_os: String,
}

/// The machine a snapshot is taken on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub id: String,
    pub name: String,
    pub os: String,
}

impl SystemInfo {
    /// Describes this machine. The id is derived from host name and OS
    /// unless the caller overrides it.
    pub fn current() -> Self {
        let name = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let os = std::env::consts::OS.to_string();
        let id = Digest::from_data(format!("{}\n{}", name, os).as_bytes()).to_hex()[..16].to_string();
        Self { id, name, os }
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl Index {
    /// A new snapshot attributed to the current machine.
    pub fn new(memo: impl Into<String>, parent: Option<IndexID>, files: &[File]) -> Self {
        let system = SystemInfo::current();
        let mut ids: Vec<FileID> = files.iter().map(|f| f.id.clone()).collect();
        ids.sort();
        ids.dedup();

        let mut index = Self {
            id: String::new(),
            memo: memo.into(),
            parent,
            created: Utc::now().timestamp_millis(),
            count: ids.len(),
            files: ids,
            size: files.iter().map(|f| f.size).sum(),
            system_id: system.id,
            system_name: system.name,
            system_os: system.os,
        };
        index.id = index.compute_id();
        index
    }

    /// Attributes the snapshot to `system`. The id does not cover it.
    pub fn with_system(mut self, system: &SystemInfo) -> Self {
        self.system_id = system.id.clone();
        self.system_name = system.name.clone();
        self.system_os = system.os.clone();
        self
    }

    /// Digest over the member File ids and the snapshot metadata.
    pub fn compute_id(&self) -> IndexID {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.memo.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.parent.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
        hasher.update(self.created.to_string().as_bytes());
        for id in &self.files {
            hasher.update(b"\n");
            hasher.update(id.as_bytes());
        }
        Digest::from(hasher.finalize()).to_hex()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.created)
            .single()
            .unwrap_or_default()
    }

    pub fn short_id(&self) -> String {
        self.id.chars().take(8).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {} files ({} bytes) on {} at {}: {}",
            self.short_id(),
            self.count,
            self.size,
            self.system_name,
            self.created_at().format("%Y-%m-%d %H:%M:%S UTC"),
            self.memo
        )
    }
}
