use crate::codec;
use crate::progress::{CancelFlag, NoProgress, Progress};
use crate::repository::Repo;
use crate::snapshot::{File, Index};
use crate::walk::LocalFile;
use crate::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::BufReader;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct IndexOptions {
    pub progress: Arc<dyn Progress>,
    pub cancel: CancelFlag,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            progress: Arc::new(NoProgress),
            cancel: CancelFlag::new(),
        }
    }
}

impl Repo {
    /// Snapshots the data tree and appends the result to history.
    ///
    /// Files whose path, modification second and size match the latest
    /// snapshot are reused without being read. When nothing changed at all
    /// the latest Index is returned as is.
    pub async fn index(&self, memo: &str, options: &IndexOptions) -> Result<Index> {
        let _guard = self.write_lock.lock().await;
        let progress = options.progress.clone();
        let cancel = options.cancel.clone();

        let data_path = self.data_path().to_path_buf();
        if !data_path.is_dir() {
            return Err(Error::io_at(
                &data_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "data directory not found"),
            ));
        }

        let latest = self.history.latest().await?;

        progress.index_before_walk(&data_path.display().to_string());
        let walker = self.walker(&data_path);
        let walk_progress = progress.clone();
        let walk_cancel = cancel.clone();
        let listing = tokio::task::spawn_blocking(move || {
            walker.walk(walk_progress.as_ref(), &walk_cancel, |p, path| p.index_walk(path))
        })
        .await
        .map_err(Error::join)??;
        if !listing.stale_temps.is_empty() {
            debug!(count = listing.stale_temps.len(), "Skipping leftover restore files");
        }
        let locals = listing.files;

        let latest_files = match &latest {
            Some(index) => self.latest_files(index, progress.as_ref(), &cancel).await?,
            None => Vec::new(),
        };
        let by_prefix: HashMap<String, File> = latest_files
            .into_iter()
            .map(|f| (f.id_prefix().to_string(), f))
            .collect();

        let mut files = Vec::with_capacity(locals.len());
        let mut upserts = Vec::new();
        for local in locals {
            let provisional = codec::provisional_id(&local.path, local.updated);
            match by_prefix.get(codec::id_prefix(&provisional)) {
                Some(known) if known.path == local.path && known.size == local.size => {
                    files.push(known.clone());
                }
                _ => upserts.push(local),
            }
        }
        let reused = files.len();

        let total = upserts.len();
        progress.index_upsert_files(total);
        let mut pending = futures::stream::iter(
            upserts
                .into_iter()
                .map(|local| self.upsert_file(local, &cancel)),
        )
        .buffer_unordered(self.options.workers);

        let mut count = 0;
        while let Some(result) = pending.next().await {
            let file = result?;
            count += 1;
            progress.index_upsert_file(count, total);
            files.push(file);
        }
        drop(pending);

        if files.is_empty() && latest.is_none() {
            return Err(Error::EmptyIndex);
        }

        let parent = latest.as_ref().map(|l| l.id.clone());
        let index = Index::new(memo, parent, &files).with_system(&self.options.system);
        if let Some(latest) = latest {
            if latest.files == index.files {
                info!(index = %latest.short_id(), files = latest.count, "No changes since latest index");
                return Ok(latest);
            }
        }

        self.history.append(&index).await?;
        info!(
            index = %index.short_id(),
            files = index.count,
            reused,
            upserted = total,
            "Created index"
        );
        Ok(index)
    }

    async fn latest_files(
        &self,
        index: &Index,
        progress: &dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<Vec<File>> {
        let total = index.files.len();
        progress.index_before_get_latest_files(total);

        let mut loading = futures::stream::iter(index.files.iter().map(|id| self.get_file(id)))
            .buffered(self.options.workers);
        let mut files = Vec::with_capacity(total);
        while let Some(file) = loading.next().await {
            cancel.check()?;
            files.push(file?);
            progress.index_get_latest_file(files.len(), total);
        }
        Ok(files)
    }

    /// Chunks one file, stores its new chunks and its metadata.
    async fn upsert_file(&self, local: LocalFile, cancel: &CancelFlag) -> Result<File> {
        cancel.check()?;

        let chunker = self.chunker;
        let abs_path = local.abs_path.clone();
        let chunks = tokio::task::spawn_blocking(move || {
            let handle = std::fs::File::open(&abs_path).map_err(|e| Error::io_at(&abs_path, e))?;
            chunker
                .chunk_reader(BufReader::new(handle))
                .map_err(|e| match e {
                    Error::Io(io) => Error::io_at(&abs_path, io),
                    other => other,
                })
        })
        .await
        .map_err(Error::join)??;

        let mut digests = Vec::with_capacity(chunks.len());
        let mut size = 0u64;
        for chunk in &chunks {
            if self.options.verify_existing || !self.store.has(&chunk.id()).await? {
                self.store.put(chunk.data()).await?;
            }
            digests.push(chunk.id());
            size += chunk.len() as u64;
        }

        let mut file = File::new(local.path, size, local.updated);
        file.finalize(digests);
        let digest = self.store.put_json(&file).await?;
        self.catalog.record(&file.id, &digest).await?;

        debug!(path = %file.path, id = %file.id, chunks = file.chunks.len(), "Indexed file");
        Ok(file)
    }
}
