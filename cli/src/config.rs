//! User configuration, read from `config.toml` in the platform config
//! directory (`~/.config/reprise/config.toml` on Linux). Command-line flags
//! and environment variables take precedence over every value here.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub repo: Option<PathBuf>,
    pub data: Option<PathBuf>,
    /// Concurrent file workers. Unset means one per CPU.
    pub workers: Option<usize>,
    /// Gitignore-style patterns, relative to the data directory.
    pub ignore: Vec<String>,
    /// Identifies this machine in snapshots. Defaults to one derived from
    /// the host name.
    pub system_id: Option<String>,
}

impl CliConfig {
    pub fn path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "reprise").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads the user configuration. A missing file is an empty config.
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "repo = \"/backups/notes\"\nworkers = 2\nignore = [\"*.tmp\", \"target/\"]\nsystem_id = \"laptop-1\"\n",
        )
        .unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config.repo, Some(PathBuf::from("/backups/notes")));
        assert_eq!(config.data, None);
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.ignore, vec!["*.tmp", "target/"]);
        assert_eq!(config.system_id.as_deref(), Some("laptop-1"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();
        assert!(CliConfig::load_from(&path).is_err());
    }
}
