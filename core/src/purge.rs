use crate::progress::{CancelFlag, NoProgress, Progress};
use crate::repository::Repo;
use crate::types::Digest;
use crate::Result;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct PurgeOptions {
    /// Compute what would be reclaimed without deleting anything.
    pub dry_run: bool,
    /// Backend temp files younger than this may belong to a write still in
    /// flight and are left alone.
    pub temp_grace: Duration,
    pub progress: Arc<dyn Progress>,
    pub cancel: CancelFlag,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            temp_grace: Duration::from_secs(60 * 60),
            progress: Arc::new(NoProgress),
            cancel: CancelFlag::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeStat {
    /// Indexes retained in history.
    pub indexes: usize,
    /// Files reachable from those indexes.
    pub files: usize,
    /// Objects deleted.
    pub objects: usize,
    /// Stored bytes reclaimed.
    pub size: u64,
    /// Abandoned temp files removed.
    pub temp_files: usize,
}

impl Repo {
    /// Deletes every object and catalog entry no retained Index reaches,
    /// along with temp files abandoned by interrupted writes.
    ///
    /// Any reachable object that fails to load aborts the run before
    /// anything is deleted.
    pub async fn purge(&self, options: &PurgeOptions) -> Result<PurgeStat> {
        let _guard = self.write_lock.lock().await;
        let progress = options.progress.clone();
        let cancel = &options.cancel;

        let index_ids = self.history.ids().await?;
        let mut reachable: HashSet<Digest> = HashSet::new();
        let mut file_ids: BTreeSet<String> = BTreeSet::new();
        for id in &index_ids {
            cancel.check()?;
            reachable.insert(self.history.index_digest(id).await?);
            let index = self.history.get(id).await?;
            file_ids.extend(index.files);
        }

        let blobs: Vec<(Digest, Vec<Digest>)> =
            futures::stream::iter(file_ids.iter().map(|id| async move {
                cancel.check()?;
                let digest = self.catalog.lookup(id).await?;
                let file = self.get_file(id).await?;
                Ok::<_, crate::Error>((digest, file.chunks))
            }))
            .buffered(self.options.workers)
            .try_collect()
            .await?;
        for (digest, chunks) in blobs {
            reachable.insert(digest);
            reachable.extend(chunks);
        }

        let garbage: Vec<Digest> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|d| !reachable.contains(d))
            .collect();
        let stale_files: Vec<String> = self
            .catalog
            .ids()
            .await?
            .into_iter()
            .filter(|id| !file_ids.contains(id))
            .collect();

        let mut stat = PurgeStat {
            indexes: index_ids.len(),
            files: file_ids.len(),
            ..PurgeStat::default()
        };

        // Catalog entries first: an interrupted run must never leave one
        // pointing at a deleted blob.
        if !options.dry_run {
            for id in &stale_files {
                cancel.check()?;
                self.catalog.remove(id).await?;
            }
        }

        let total = garbage.len();
        progress.purge_delete_objects(total);
        for digest in &garbage {
            cancel.check()?;
            stat.size += self.store.stored_size(digest).await?;
            if !options.dry_run {
                self.store.delete(digest).await?;
            }
            stat.objects += 1;
            progress.purge_delete_object(stat.objects, total);
            debug!(object = %digest.short_string(), dry_run = options.dry_run, "Unreachable object");
        }

        stat.temp_files = self.store.sweep_temp(options.temp_grace, options.dry_run).await?;

        info!(
            indexes = stat.indexes,
            files = stat.files,
            objects = stat.objects,
            size = stat.size,
            temp_files = stat.temp_files,
            stale_files = stale_files.len(),
            dry_run = options.dry_run,
            "Purged repository"
        );
        Ok(stat)
    }
}
