use crate::filter::IgnoreFilter;
use crate::progress::{CancelFlag, Progress};
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// A regular file found under a data root.
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Relative to the root, `/`-separated.
    pub path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    /// Milliseconds since the epoch.
    pub updated: i64,
}

/// Name prefix and suffix of the temp files checkout writes next to their
/// final location.
const RESTORE_TEMP_PREFIX: &str = ".reprise-";
const RESTORE_TEMP_SUFFIX: &str = ".tmp";

pub(crate) fn restore_temp_name() -> String {
    format!("{}{}{}", RESTORE_TEMP_PREFIX, uuid::Uuid::new_v4().simple(), RESTORE_TEMP_SUFFIX)
}

fn is_restore_temp(name: &str) -> bool {
    name.starts_with(RESTORE_TEMP_PREFIX) && name.ends_with(RESTORE_TEMP_SUFFIX)
}

/// Result of a walk.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub files: Vec<LocalFile>,
    /// Leftovers of interrupted restores. Never part of a snapshot.
    pub stale_temps: Vec<PathBuf>,
}

pub(crate) struct Walker {
    pub root: PathBuf,
    /// Absolute directories never descended into, e.g. a repository that
    /// lives inside its own data tree.
    pub exclude: Vec<PathBuf>,
    pub filter: Arc<dyn IgnoreFilter>,
}

pub(crate) fn millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Symlinks resolved when the path exists, so a repository reached through a
/// different route than the data tree is still recognised.
fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::io_at(path, std::io::Error::other("path escapes the data root")))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            Error::io_at(path, std::io::Error::new(ErrorKind::InvalidData, "path is not valid UTF-8"))
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

impl Walker {
    /// Lists regular files in path order. A missing root yields nothing;
    /// any other unreadable entry aborts the walk.
    pub fn walk(
        &self,
        progress: &dyn Progress,
        cancel: &CancelFlag,
        on_path: fn(&dyn Progress, &str),
    ) -> Result<Listing> {
        let mut listing = Listing::default();
        if !self.root.exists() {
            return Ok(listing);
        }

        let root = resolve(&self.root);
        let exclude: Vec<PathBuf> = self.exclude.iter().map(|p| resolve(p)).collect();
        let entries = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if exclude.iter().any(|ex| entry.path().starts_with(ex)) {
                    return false;
                }
                match relative_path(&root, entry.path()) {
                    Ok(rel) => !self.filter.should_ignore(&rel),
                    // Surfaced below when the entry itself is processed.
                    Err(_) => true,
                }
            });

        for entry in entries {
            cancel.check()?;
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                Error::io_at(path, io)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_str().is_some_and(is_restore_temp) {
                listing.stale_temps.push(entry.path().to_path_buf());
                continue;
            }

            let path = relative_path(&root, entry.path())?;
            let metadata = entry
                .metadata()
                .map_err(|e| Error::io_at(entry.path(), e.into()))?;
            let modified = metadata
                .modified()
                .map_err(|e| Error::io_at(entry.path(), e))?;

            on_path(progress, &path);
            listing.files.push(LocalFile {
                path,
                abs_path: entry.path().to_path_buf(),
                size: metadata.len(),
                updated: millis(modified),
            });
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{NoIgnore, PatternIgnore};
    use crate::progress::NoProgress;

    fn noop(_: &dyn Progress, _: &str) {}

    #[test]
    fn test_walk_lists_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top"), b"1").unwrap();
        std::fs::write(dir.path().join("a/b/deep"), b"22").unwrap();
        std::fs::write(dir.path().join("bar"), b"333").unwrap();
        std::fs::create_dir_all(dir.path().join(".repo/objects")).unwrap();
        std::fs::write(dir.path().join(".repo/objects/x"), b"x").unwrap();

        let walker = Walker {
            root: dir.path().to_path_buf(),
            exclude: vec![dir.path().join(".repo")],
            filter: Arc::new(PatternIgnore::new(["bar"]).unwrap()),
        };
        let files = walker.walk(&NoProgress, &CancelFlag::new(), noop).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b/deep", "top"]);
        assert_eq!(files[0].size, 2);
        assert!(files[0].updated > 0);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let walker = Walker {
            root: dir.path().join("absent"),
            exclude: Vec::new(),
            filter: Arc::new(NoIgnore),
        };
        let listing = walker.walk(&NoProgress, &CancelFlag::new(), noop).unwrap();
        assert!(listing.files.is_empty() && listing.stale_temps.is_empty());
    }

    #[test]
    fn test_cancelled_walk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"1").unwrap();
        let walker = Walker {
            root: dir.path().to_path_buf(),
            exclude: Vec::new(),
            filter: Arc::new(NoIgnore),
        };
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(walker.walk(&NoProgress, &cancel, noop), Err(Error::Cancelled)));
    }

    #[test]
    fn test_restore_temps_are_listed_apart() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("kept"), b"1").unwrap();
        let temp = dir.path().join("sub").join(restore_temp_name());
        std::fs::write(&temp, b"partial").unwrap();

        let walker = Walker {
            root: dir.path().to_path_buf(),
            exclude: Vec::new(),
            filter: Arc::new(NoIgnore),
        };
        let listing = walker.walk(&NoProgress, &CancelFlag::new(), noop).unwrap();
        let paths: Vec<_> = listing.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["kept"]);
        assert_eq!(listing.stale_temps.len(), 1);
        assert!(listing.stale_temps[0].ends_with(temp.file_name().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn test_exclusion_sees_through_symlinked_root() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(real.join(".repo/objects")).unwrap();
        std::fs::write(real.join(".repo/objects/x"), b"x").unwrap();
        std::fs::write(real.join("foo"), b"foo").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let walker = Walker {
            root: link.clone(),
            exclude: vec![real.join(".repo")],
            filter: Arc::new(NoIgnore),
        };
        let files = walker.walk(&NoProgress, &CancelFlag::new(), noop).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["foo"]);

        // And the other way around: repository named through the link.
        let walker = Walker {
            root: real.clone(),
            exclude: vec![link.join(".repo")],
            filter: Arc::new(NoIgnore),
        };
        let files = walker.walk(&NoProgress, &CancelFlag::new(), noop).unwrap().files;
        assert_eq!(files.len(), 1);
    }
}
