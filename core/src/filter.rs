use crate::{Error, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Decides which paths of the data tree take part in snapshots. Consulted by
/// both indexing and checkout, with `/`-separated paths relative to the
/// data root.
pub trait IgnoreFilter: Send + Sync {
    fn should_ignore(&self, relative_path: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoIgnore;

impl IgnoreFilter for NoIgnore {
    fn should_ignore(&self, _relative_path: &str) -> bool {
        false
    }
}

/// Gitignore-syntax patterns, one per line.
pub struct PatternIgnore {
    matcher: Gitignore,
}

impl PatternIgnore {
    pub fn new<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GitignoreBuilder::new("");
        for line in lines {
            builder
                .add_line(None, line.as_ref())
                .map_err(|e| Error::InvalidConfig(format!("ignore pattern: {}", e)))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("ignore patterns: {}", e)))?;
        Ok(Self { matcher })
    }
}

impl IgnoreFilter for PatternIgnore {
    fn should_ignore(&self, relative_path: &str) -> bool {
        self.matcher
            .matched_path_or_any_parents(relative_path, false)
            .is_ignore()
    }
}
