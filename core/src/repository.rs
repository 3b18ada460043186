use crate::backend::{Backend, LocalBackend};
use crate::catalog::FileCatalog;
use crate::chunker::Chunker;
use crate::crypto::Encryptor;
use crate::filter::{IgnoreFilter, NoIgnore};
use crate::history::History;
use crate::snapshot::{File, Index, SystemInfo};
use crate::store::ObjectStore;
use crate::walk::Walker;
use crate::{Error, FORMAT_VERSION, RepoConfig, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const CONFIG_KEY: &str = "config";
const KEY_CHECK: &[u8] = b"reprise-key-check";

/// Runtime knobs that are not persisted with the repository.
#[derive(Clone)]
pub struct RepoOptions {
    /// Upper bound on files processed concurrently.
    pub workers: usize,
    /// Fully compare content on every duplicate object write.
    pub verify_existing: bool,
    pub ignore: Arc<dyn IgnoreFilter>,
    /// Machine new snapshots are attributed to.
    pub system: SystemInfo,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            verify_existing: false,
            ignore: Arc::new(NoIgnore),
            system: SystemInfo::current(),
        }
    }
}

/// A snapshot repository bound to one data tree.
///
/// # Repository Structure
///
/// ```text
/// repository/
/// ├── config          # RepoConfig (JSON)
/// ├── objects/        # Encrypted chunks and metadata blobs
/// └── refs/
///     ├── latest      # Head of the history
///     ├── indexes/    # Index id -> metadata blob digest
///     └── files/      # File id -> metadata blob digest
/// ```
///
/// # Examples
///
/// ```no_run
/// use reprise_core::{IndexOptions, Repo, RepoConfig, RepoOptions};
/// use reprise_core::crypto::MasterKey;
///
/// #[tokio::main]
/// async fn main() -> reprise_core::Result<()> {
///     let key = MasterKey::generate();
///     let repo = Repo::init(
///         "./repo",
///         "./data",
///         key.as_bytes(),
///         RepoConfig::default(),
///         RepoOptions::default(),
///     )
///     .await?;
///
///     let index = repo.index("first snapshot", &IndexOptions::default()).await?;
///     println!("{}", index.summary());
///     Ok(())
/// }
/// ```
pub struct Repo {
    data_path: PathBuf,
    /// Set when the repository lives on the local filesystem, so walks can
    /// skip it if it sits inside the data tree.
    repo_path: Option<PathBuf>,
    config: RepoConfig,
    pub(crate) store: Arc<ObjectStore>,
    pub(crate) history: History,
    pub(crate) catalog: FileCatalog,
    pub(crate) chunker: Chunker,
    pub(crate) options: RepoOptions,
    /// Serialises index and purge runs.
    pub(crate) write_lock: Mutex<()>,
}

impl Repo {
    /// Creates a repository on the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns `Error::RepositoryExists` if a repository already exists at the path.
    pub async fn init<P: AsRef<Path>, D: AsRef<Path>>(
        path: P,
        data_path: D,
        key: &[u8],
        config: RepoConfig,
        options: RepoOptions,
    ) -> Result<Self> {
        let path = absolute(path.as_ref())?;
        let backend = Arc::new(LocalBackend::new(&path));
        let mut repo = Self::init_with(backend, data_path, key, config, options).await?;
        repo.repo_path = Some(path);
        Ok(repo)
    }

    /// Opens an existing repository on the local filesystem.
    ///
    /// # Errors
    ///
    /// * `Error::RepositoryNotFound` - No repository at the path
    /// * `Error::InvalidKey` - The key does not match the repository
    /// * `Error::InvalidFormatVersion` - Unsupported repository version
    pub async fn open<P: AsRef<Path>, D: AsRef<Path>>(
        path: P,
        data_path: D,
        key: &[u8],
        options: RepoOptions,
    ) -> Result<Self> {
        let path = absolute(path.as_ref())?;
        let backend = Arc::new(LocalBackend::new(&path));
        let mut repo = Self::open_with(backend, data_path, key, options).await?;
        repo.repo_path = Some(path);
        Ok(repo)
    }

    /// Reads the persisted configuration without unlocking the repository,
    /// e.g. to fetch KDF parameters before deriving the key.
    pub async fn read_config<P: AsRef<Path>>(path: P) -> Result<RepoConfig> {
        let backend = LocalBackend::new(path.as_ref());
        Self::load_config(&backend, &path.as_ref().display().to_string()).await
    }

    pub async fn init_with<D: AsRef<Path>>(
        backend: Arc<dyn Backend>,
        data_path: D,
        key: &[u8],
        mut config: RepoConfig,
        options: RepoOptions,
    ) -> Result<Self> {
        if backend.exists(CONFIG_KEY).await? {
            return Err(Error::RepositoryExists {
                path: format!("{:?} backend", backend.backend_type()),
            });
        }
        config.chunker.validate()?;
        backend.init().await?;

        let encryptor = Encryptor::new(key)?;
        config.version = FORMAT_VERSION;
        config.key_check = encryptor.encrypt(KEY_CHECK)?;

        let config_json = serde_json::to_string_pretty(&config)?;
        backend.write(CONFIG_KEY, Bytes::from(config_json)).await?;
        info!(repo = %config.id, "Initialized repository");

        Self::assemble(backend, data_path.as_ref(), encryptor, config, options)
    }

    pub async fn open_with<D: AsRef<Path>>(
        backend: Arc<dyn Backend>,
        data_path: D,
        key: &[u8],
        options: RepoOptions,
    ) -> Result<Self> {
        let label = format!("{:?} backend", backend.backend_type());
        let config = Self::load_config(backend.as_ref(), &label).await?;

        let encryptor = Encryptor::new(key)?;
        match encryptor.decrypt(&config.key_check) {
            Ok(marker) if marker == KEY_CHECK => {}
            _ => return Err(Error::InvalidKey),
        }

        Self::assemble(backend, data_path.as_ref(), encryptor, config, options)
    }

    async fn load_config(backend: &dyn Backend, label: &str) -> Result<RepoConfig> {
        let data = match backend.read(CONFIG_KEY).await {
            Ok(data) => data,
            Err(Error::NotFound { .. }) => {
                return Err(Error::RepositoryNotFound {
                    path: label.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        let config: RepoConfig = serde_json::from_slice(&data)?;
        if config.version != FORMAT_VERSION {
            return Err(Error::InvalidFormatVersion {
                version: config.version,
            });
        }
        Ok(config)
    }

    fn assemble(
        backend: Arc<dyn Backend>,
        data_path: &Path,
        encryptor: Encryptor,
        config: RepoConfig,
        options: RepoOptions,
    ) -> Result<Self> {
        if options.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".to_string()));
        }
        let chunker = Chunker::new(config.chunker)?;
        let store = Arc::new(
            ObjectStore::new(backend.clone(), Arc::new(encryptor))
                .with_verify_existing(options.verify_existing),
        );

        Ok(Self {
            data_path: absolute(data_path)?,
            repo_path: None,
            config,
            history: History::new(backend.clone(), store.clone()),
            catalog: FileCatalog::new(backend),
            store,
            chunker,
            options,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn repo_path(&self) -> Option<&Path> {
        self.repo_path.as_deref()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn walker(&self, root: &Path) -> Walker {
        Walker {
            root: root.to_path_buf(),
            exclude: self.repo_path.iter().cloned().collect(),
            filter: self.options.ignore.clone(),
        }
    }

    pub async fn get_file(&self, id: &str) -> Result<File> {
        let digest = self.catalog.lookup(id).await?;
        let file: File = self.store.get_json(&digest).await?;
        if file.id != id {
            return Err(Error::corrupt(id, format!("catalog points at file {}", file.id)));
        }
        Ok(file)
    }

    /// Loads every File of `index`, in the index's order.
    pub async fn get_files(&self, index: &Index) -> Result<Vec<File>> {
        futures::stream::iter(index.files.iter().map(|id| self.get_file(id)))
            .buffered(self.options.workers)
            .try_collect()
            .await
    }

    /// Path-level changes needed to go from `from` to `to`.
    pub async fn diff(&self, from: &str, to: &str) -> Result<IndexDiff> {
        let from = self.history.get(from).await?;
        let to = self.history.get(to).await?;

        let before: HashMap<String, File> = self
            .get_files(&from)
            .await?
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect();
        let after = self.get_files(&to).await?;

        let mut diff = IndexDiff::default();
        for file in &after {
            match before.get(&file.path) {
                None => diff.added.push(file.path.clone()),
                Some(old) if old.id != file.id => diff.updated.push(file.path.clone()),
                Some(_) => {}
            }
        }
        let after_paths: std::collections::HashSet<&str> =
            after.iter().map(|f| f.path.as_str()).collect();
        diff.removed = before
            .keys()
            .filter(|p| !after_paths.contains(p.as_str()))
            .cloned()
            .collect();

        diff.added.sort();
        diff.updated.sort();
        diff.removed.sort();
        Ok(diff)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl IndexDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::io_at(path, e))
}
