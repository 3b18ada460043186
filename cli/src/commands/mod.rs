pub mod checkout;
pub mod diff;
pub mod forget;
pub mod index;
pub mod init;
pub mod log;
pub mod purge;
pub mod show;

use crate::Cli;
use crate::config::CliConfig;
use anyhow::{Context, Result, anyhow};
use reprise_core::crypto::MasterKey;
use reprise_core::{PatternIgnore, Repo, RepoOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Repository coordinates merged from flags, environment and config file.
pub struct Target {
    pub repo: PathBuf,
    pub data: PathBuf,
    pub options: RepoOptions,
}

impl Target {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let config = CliConfig::load()?;

        let repo = cli
            .repo
            .clone()
            .or(config.repo)
            .ok_or_else(|| anyhow!("Repository path required (--repo or REPRISE_REPO)"))?;
        let data = cli
            .data
            .clone()
            .or(config.data)
            .ok_or_else(|| anyhow!("Data directory required (--data or REPRISE_DATA)"))?;

        let mut options = RepoOptions::default();
        if let Some(workers) = config.workers {
            options.workers = workers;
        }
        if !config.ignore.is_empty() {
            options.ignore = Arc::new(PatternIgnore::new(&config.ignore)?);
        }
        if let Some(id) = config.system_id {
            options.system.id = id;
        }

        Ok(Self { repo, data, options })
    }

    pub async fn open(self, cli: &Cli) -> Result<Repo> {
        let password = password(cli, "Enter repository password: ")?;
        let config = Repo::read_config(&self.repo)
            .await
            .with_context(|| format!("Failed to open repository at {}", self.repo.display()))?;
        let key = MasterKey::derive_from_password(&password, &config.kdf)?;

        info!("Opening repository at: {}", self.repo.display());
        Ok(Repo::open(&self.repo, &self.data, key.as_bytes(), self.options).await?)
    }
}

pub fn password(cli: &Cli, prompt: &str) -> Result<String> {
    if let Some(password) = &cli.password {
        return Ok(password.clone());
    }
    print!("{}", prompt);
    io::stdout().flush()?;
    let password = rpassword::read_password()?;
    if password.is_empty() {
        return Err(anyhow!("Password required"));
    }
    Ok(password)
}

/// Accepts a full Index id or a unique prefix of one.
pub async fn resolve_index(repo: &Repo, id: &str) -> Result<String> {
    if id == "latest" {
        return repo
            .history()
            .latest_id()
            .await?
            .ok_or_else(|| anyhow!("Repository has no snapshots yet"));
    }

    let matches: Vec<String> = repo
        .history()
        .ids()
        .await?
        .into_iter()
        .filter(|candidate| candidate.starts_with(id))
        .collect();
    match matches.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(anyhow!("No snapshot matches {}", id)),
        _ => Err(anyhow!("Snapshot id {} is ambiguous ({} matches)", id, matches.len())),
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MiB");
    }
}
