use crate::codec;
use crate::progress::{CancelFlag, NoProgress, Progress};
use crate::repository::Repo;
use crate::snapshot::File;
use crate::walk::{self, LocalFile};
use crate::{Error, Result};
use filetime::FileTime;
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CheckoutOptions {
    /// Directory to reconstruct. Defaults to the repository's data tree.
    pub target: Option<PathBuf>,
    /// Rewrite every file, even those that look unchanged.
    pub force: bool,
    pub progress: Arc<dyn Progress>,
    pub cancel: CancelFlag,
}

impl Default for CheckoutOptions {
    fn default() -> Self {
        Self {
            target: None,
            force: false,
            progress: Arc::new(NoProgress),
            cancel: CancelFlag::new(),
        }
    }
}

impl Repo {
    /// Makes the target directory match the Index `index_id`.
    ///
    /// Returns how many files were written and how many were removed.
    /// Paths excluded by the ignore filter are left alone.
    pub async fn checkout(&self, index_id: &str, options: &CheckoutOptions) -> Result<(usize, usize)> {
        let progress = options.progress.clone();
        let cancel = options.cancel.clone();

        let index = self.history.get(index_id).await?;
        let files = self.get_files(&index).await?;

        let target = match &options.target {
            Some(target) => std::path::absolute(target).map_err(|e| Error::io_at(target, e))?,
            None => self.data_path().to_path_buf(),
        };
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| Error::io_at(&target, e))?;
        // Same form the walker reports, so removals and exclusions line up
        // when the target is reached through a symlink.
        let target = tokio::fs::canonicalize(&target)
            .await
            .map_err(|e| Error::io_at(&target, e))?;

        progress.checkout_before_walk(&target.display().to_string());
        let walker = self.walker(&target);
        let walk_progress = progress.clone();
        let walk_cancel = cancel.clone();
        let listing = tokio::task::spawn_blocking(move || {
            walker.walk(walk_progress.as_ref(), &walk_cancel, |p, path| p.checkout_walk(path))
        })
        .await
        .map_err(Error::join)??;
        for temp in &listing.stale_temps {
            debug!(path = %temp.display(), "Removing leftover restore file");
            tokio::fs::remove_file(temp)
                .await
                .map_err(|e| Error::io_at(temp, e))?;
        }
        let locals: HashMap<String, LocalFile> = listing
            .files
            .into_iter()
            .map(|l| (l.path.clone(), l))
            .collect();

        let wanted: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let mut upserts: Vec<(&File, PathBuf)> = Vec::new();
        for file in &files {
            if !options.force && matches_local(file, locals.get(&file.path)) {
                continue;
            }
            let relative = safe_relative(&file.path).ok_or_else(|| {
                Error::corrupt(&file.id, format!("unsafe path {:?}", file.path))
            })?;
            upserts.push((file, relative));
        }
        let mut removals: Vec<&LocalFile> = locals
            .values()
            .filter(|l| !wanted.contains(l.path.as_str()))
            .collect();
        removals.sort_by(|a, b| a.path.cmp(&b.path));

        // Files standing where a directory is needed go before any worker
        // starts, since siblings would otherwise race to remove them.
        let parents: BTreeSet<&Path> = upserts
            .iter()
            .filter_map(|(_, relative)| relative.parent())
            .filter(|parent| !parent.as_os_str().is_empty())
            .collect();
        for parent in parents {
            cancel.check()?;
            clear_ancestors(&target, parent).await?;
        }

        let total = upserts.len();
        progress.checkout_upsert_files(total);
        let mut pending = futures::stream::iter(
            upserts
                .into_iter()
                .map(|(file, relative)| self.restore_file(&target, file, relative, &cancel)),
        )
        .buffer_unordered(self.options.workers);

        let mut upserted = 0;
        while let Some(result) = pending.next().await {
            result?;
            upserted += 1;
            progress.checkout_upsert_file(upserted, total);
        }
        drop(pending);

        let total = removals.len();
        progress.checkout_remove_files(total);
        let mut removed = 0;
        for local in removals {
            cancel.check()?;
            remove_file(&target, &local.abs_path).await?;
            removed += 1;
            progress.checkout_remove_file(removed, total);
        }

        info!(
            index = %index.short_id(),
            target = %target.display(),
            upserted,
            removed,
            "Checked out index"
        );
        Ok((upserted, removed))
    }

    /// Reassembles one file from its chunks next to its final location, then
    /// moves it into place.
    async fn restore_file(
        &self,
        target: &Path,
        file: &File,
        relative: PathBuf,
        cancel: &CancelFlag,
    ) -> Result<()> {
        cancel.check()?;

        let path = target.join(&relative);
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| target.to_path_buf());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::io_at(&parent, e))?;

        let temp = parent.join(walk::restore_temp_name());
        let result = self.write_chunks(&temp, file).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| Error::io_at(&path, e))?,
            _ => {}
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::io_at(&path, e));
        }

        debug!(path = %file.path, size = file.size, "Restored file");
        Ok(())
    }

    async fn write_chunks(&self, temp: &Path, file: &File) -> Result<()> {
        let mut out = tokio::fs::File::create(temp)
            .await
            .map_err(|e| Error::io_at(temp, e))?;

        let mut written = 0u64;
        for digest in &file.chunks {
            let data = self.store.get(digest).await?;
            out.write_all(&data).await.map_err(|e| Error::io_at(temp, e))?;
            written += data.len() as u64;
        }
        if written != file.size {
            return Err(Error::corrupt(
                &file.id,
                format!("reassembled {} bytes, expected {}", written, file.size),
            ));
        }
        out.flush().await.map_err(|e| Error::io_at(temp, e))?;
        drop(out);

        let secs = file.updated.div_euclid(1000);
        let nanos = (file.updated.rem_euclid(1000) * 1_000_000) as u32;
        filetime::set_file_mtime(temp, FileTime::from_unix_time(secs, nanos))
            .map_err(|e| Error::io_at(temp, e))
    }
}

fn matches_local(file: &File, local: Option<&LocalFile>) -> bool {
    match local {
        Some(local) => {
            local.size == file.size
                && codec::id_prefix(&codec::provisional_id(&local.path, local.updated)) == file.id_prefix()
        }
        None => false,
    }
}

/// Only plain relative components are accepted, so a stored path can never
/// reach outside the target.
fn safe_relative(path: &str) -> Option<PathBuf> {
    let relative = PathBuf::from(path);
    let plain = !path.is_empty()
        && !path.contains('\\')
        && relative.components().all(|c| matches!(c, Component::Normal(_)));
    plain.then_some(relative)
}

/// Removes files or symlinks occupying a directory position along `dir`,
/// itself included.
async fn clear_ancestors(target: &Path, dir: &Path) -> Result<()> {
    let mut current = target.to_path_buf();
    for component in dir.components() {
        current.push(component);
        match tokio::fs::symlink_metadata(&current).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => tokio::fs::remove_file(&current)
                .await
                .map_err(|e| Error::io_at(&current, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => break,
            Err(e) => return Err(Error::io_at(&current, e)),
        }
    }
    Ok(())
}

/// Deletes one extraneous file and prunes directories it leaves empty.
async fn remove_file(target: &Path, path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if !meta.is_dir() => {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| Error::io_at(path, e))?;
        }
        // Already replaced by a restored file or directory.
        _ => return Ok(()),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == target || !current.starts_with(target) {
            break;
        }
        if tokio::fs::remove_dir(current).await.is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexOptions;
    use crate::crypto::MasterKey;
    use crate::progress::tests::Recorder;
    use crate::repository::tests::{T, local_repo, small_config, write_file};
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.push((rel, std::fs::read(entry.path()).unwrap()));
            }
        }
        out
    }

    fn into(target: &Path) -> CheckoutOptions {
        CheckoutOptions {
            target: Some(target.to_path_buf()),
            ..CheckoutOptions::default()
        }
    }

    #[tokio::test]
    async fn test_checkout_into_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        write_file(repo.data_path(), "foo", b"hello", T);
        let index = repo.index("Index 1", &IndexOptions::default()).await.unwrap();

        let target = dir.path().join("restore");
        let (upserted, removed) = repo.checkout(&index.id, &into(&target)).await.unwrap();
        assert_eq!((upserted, removed), (1, 0));
        assert_eq!(std::fs::read(target.join("foo")).unwrap(), b"hello");

        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(target.join("foo")).unwrap());
        assert_eq!(mtime.unix_seconds(), T);
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        let mut rng = StdRng::seed_from_u64(7);
        for (i, size) in [0usize, 1, 63, 1024, 4096, 50_000].into_iter().enumerate() {
            let mut data = vec![0u8; size];
            rng.fill_bytes(&mut data);
            write_file(repo.data_path(), &format!("d{}/file{}.bin", i % 2, i), &data, T + i as i64);
        }
        let index = repo.index("random", &IndexOptions::default()).await.unwrap();

        let target = dir.path().join("restore");
        repo.checkout(&index.id, &into(&target)).await.unwrap();
        assert_eq!(read_tree(&target), read_tree(repo.data_path()));

        // A second pass finds nothing to do.
        assert_eq!(repo.checkout(&index.id, &into(&target)).await.unwrap(), (0, 0));
        let forced = CheckoutOptions {
            force: true,
            ..into(&target)
        };
        assert_eq!(repo.checkout(&index.id, &forced).await.unwrap(), (6, 0));
    }

    #[tokio::test]
    async fn test_checkout_reconciles_with_other_index() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        let data = repo.data_path().to_path_buf();

        write_file(&data, "foo", b"version a", T);
        write_file(&data, "only_a/x", b"a only", T);
        let a = repo.index("a", &IndexOptions::default()).await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();
        write_file(&data, "foo", b"version b!", T + 5);
        write_file(&data, "nested/only_b/y", b"b only", T);
        let b = repo.index("b", &IndexOptions::default()).await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let options = CheckoutOptions {
            progress: recorder.clone(),
            ..CheckoutOptions::default()
        };
        let (upserted, removed) = repo.checkout(&a.id, &options).await.unwrap();
        assert_eq!((upserted, removed), (2, 1));
        assert_eq!(
            read_tree(&data),
            vec![
                ("foo".to_string(), b"version a".to_vec()),
                ("only_a/x".to_string(), b"a only".to_vec()),
            ]
        );
        assert!(!data.join("nested").exists());
        assert_eq!(recorder.counts("checkout_upsert_file"), vec![1, 2]);
        assert_eq!(recorder.counts("checkout_remove_file"), vec![1]);

        repo.checkout(&b.id, &CheckoutOptions::default()).await.unwrap();
        assert!(!data.join("only_a").exists());
        assert_eq!(std::fs::read(data.join("nested/only_b/y")).unwrap(), b"b only");
    }

    #[tokio::test]
    async fn test_file_and_directory_swap_places() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        let data = repo.data_path().to_path_buf();

        write_file(&data, "a", b"plain file", T);
        let as_file = repo.index("file", &IndexOptions::default()).await.unwrap();
        std::fs::remove_file(data.join("a")).unwrap();
        write_file(&data, "a/b", b"nested file", T);
        let as_dir = repo.index("dir", &IndexOptions::default()).await.unwrap();

        let target = dir.path().join("restore");
        repo.checkout(&as_dir.id, &into(&target)).await.unwrap();
        repo.checkout(&as_file.id, &into(&target)).await.unwrap();
        assert_eq!(std::fs::read(target.join("a")).unwrap(), b"plain file");

        repo.checkout(&as_dir.id, &into(&target)).await.unwrap();
        assert_eq!(std::fs::read(target.join("a/b")).unwrap(), b"nested file");
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        let missing = "0".repeat(64);
        assert!(matches!(
            repo.checkout(&missing, &CheckoutOptions::default()).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            repo.checkout("../escape", &CheckoutOptions::default()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        write_file(repo.data_path(), "foo", b"hello", T);
        let index = repo.index("Index 1", &IndexOptions::default()).await.unwrap();

        let file = repo.get_file(&index.files[0]).await.unwrap();
        repo.store().delete(&file.chunks[0]).await.unwrap();

        let target = dir.path().join("restore");
        let result = repo.checkout(&index.id, &into(&target)).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(!target.join("foo").exists());
    }

    #[tokio::test]
    async fn test_file_becomes_directory_with_many_children() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        let data = repo.data_path().to_path_buf();

        write_file(&data, "a", b"plain file", T);
        let as_file = repo.index("file", &IndexOptions::default()).await.unwrap();
        std::fs::remove_file(data.join("a")).unwrap();
        let children: Vec<(String, Vec<u8>)> = (0..8)
            .map(|i| (format!("a/f{}", i), format!("child {}", i).into_bytes()))
            .collect();
        for (path, content) in &children {
            write_file(&data, path, content, T);
        }
        let as_dir = repo.index("dir", &IndexOptions::default()).await.unwrap();

        let target = dir.path().join("restore");
        for _ in 0..10 {
            let (upserted, _) = repo.checkout(&as_file.id, &into(&target)).await.unwrap();
            assert_eq!(upserted, 1);
            assert_eq!(read_tree(&target), vec![("a".to_string(), b"plain file".to_vec())]);

            let (upserted, _) = repo.checkout(&as_dir.id, &into(&target)).await.unwrap();
            assert_eq!(upserted, 8);
            assert_eq!(read_tree(&target), children);
        }
    }

    #[tokio::test]
    async fn test_ignored_local_file_survives_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        write_file(&data, "foo", b"tracked", T);
        let options = crate::RepoOptions {
            ignore: Arc::new(crate::filter::PatternIgnore::new(["*.log"]).unwrap()),
            ..crate::RepoOptions::default()
        };
        let repo = Repo::init(dir.path().join("repo"), &data, MasterKey::generate().as_bytes(), small_config(), options)
            .await
            .unwrap();
        let index = repo.index("Index 1", &IndexOptions::default()).await.unwrap();

        write_file(&data, "keep.log", b"local only", T);
        write_file(&data, "logs/deep.log", b"also local", T);
        write_file(&data, "extra", b"not tracked", T);
        let (upserted, removed) = repo.checkout(&index.id, &CheckoutOptions::default()).await.unwrap();
        assert_eq!((upserted, removed), (0, 1));
        assert_eq!(std::fs::read(data.join("keep.log")).unwrap(), b"local only");
        assert_eq!(std::fs::read(data.join("logs/deep.log")).unwrap(), b"also local");
        assert!(!data.join("extra").exists());
    }

    async fn assert_repository_intact(repo_path: &Path, data: &Path, key: &MasterKey, index_id: &str) {
        assert!(repo_path.join("config").exists());
        let reopened = Repo::open(repo_path, data, key.as_bytes(), crate::RepoOptions::default())
            .await
            .unwrap();
        assert_eq!(reopened.history().latest_id().await.unwrap().as_deref(), Some(index_id));
        let index = reopened.history().get(index_id).await.unwrap();
        assert_eq!(reopened.get_files(&index).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_leaves_nested_repository_alone() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        write_file(&data, "foo", b"hello", T);
        let key = MasterKey::generate();
        let repo_path = data.join(".reprise");
        let repo = Repo::init(&repo_path, &data, key.as_bytes(), small_config(), crate::RepoOptions::default())
            .await
            .unwrap();
        let index = repo.index("Index 1", &IndexOptions::default()).await.unwrap();

        assert_eq!(repo.checkout(&index.id, &CheckoutOptions::default()).await.unwrap(), (0, 0));
        std::fs::remove_file(data.join("foo")).unwrap();
        assert_eq!(repo.checkout(&index.id, &CheckoutOptions::default()).await.unwrap(), (1, 0));
        assert_repository_intact(&repo_path, &data, &key, &index.id).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_checkout_through_symlinked_data_leaves_repository_alone() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        write_file(&real, "foo", b"hello", T);
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let key = MasterKey::generate();
        let repo_path = real.join(".reprise");
        let repo = Repo::init(&repo_path, &link, key.as_bytes(), small_config(), crate::RepoOptions::default())
            .await
            .unwrap();
        let index = repo.index("Index 1", &IndexOptions::default()).await.unwrap();
        let files = repo.get_files(&index).await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["foo"]);

        assert_eq!(repo.checkout(&index.id, &CheckoutOptions::default()).await.unwrap(), (0, 0));
        assert_eq!(repo.checkout(&index.id, &into(&link)).await.unwrap(), (0, 0));
        assert_repository_intact(&repo_path, &link, &key, &index.id).await;
    }

    #[tokio::test]
    async fn test_leftover_restore_files_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path(), &MasterKey::generate()).await;
        let data = repo.data_path().to_path_buf();
        write_file(&data, "sub/foo", b"hello", T);
        let temp = data.join("sub").join(walk::restore_temp_name());
        std::fs::write(&temp, b"half written").unwrap();

        let index = repo.index("Index 1", &IndexOptions::default()).await.unwrap();
        let files = repo.get_files(&index).await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["sub/foo"]);

        assert_eq!(repo.checkout(&index.id, &CheckoutOptions::default()).await.unwrap(), (0, 0));
        assert!(!temp.exists());
        assert_eq!(read_tree(&data), vec![("sub/foo".to_string(), b"hello".to_vec())]);
    }

    #[test]
    fn test_safe_relative() {
        assert!(safe_relative("a/b/c").is_some());
        assert!(safe_relative("").is_none());
        assert!(safe_relative("../x").is_none());
        assert!(safe_relative("a/../../x").is_none());
        assert!(safe_relative("/etc/passwd").is_none());
        assert!(safe_relative("./a").is_none());
        assert!(safe_relative("a\\b").is_none());
    }
}
