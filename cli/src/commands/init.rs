use super::{Target, password};
use anyhow::{Result, anyhow};
use clap::Args;
use reprise_core::crypto::MasterKey;
use reprise_core::{Repo, RepoConfig};
use tracing::info;

#[derive(Args)]
pub struct InitCommand {
    #[arg(long, help = "Average chunk size in bytes")]
    avg_chunk_size: Option<u32>,
}

impl InitCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let target = Target::resolve(cli)?;

        let secret = password(cli, "Enter new repository password: ")?;
        if cli.password.is_none() {
            let confirm = password(cli, "Confirm password: ")?;
            if confirm != secret {
                return Err(anyhow!("Passwords do not match"));
            }
        }

        let mut config = RepoConfig::default();
        if let Some(avg) = self.avg_chunk_size {
            config.chunker.min_size = avg / 2;
            config.chunker.avg_size = avg;
            config.chunker.max_size = avg.saturating_mul(8);
        }
        let key = MasterKey::derive_from_password(&secret, &config.kdf)?;

        info!("Initializing repository at: {}", target.repo.display());
        let repo = Repo::init(&target.repo, &target.data, key.as_bytes(), config, target.options).await?;

        println!("Initialized repository {} at {}", repo.config().id, target.repo.display());
        println!("Data directory: {}", repo.data_path().display());
        Ok(())
    }
}
