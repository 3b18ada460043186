use super::{Target, resolve_index};
use crate::progress::BarProgress;
use anyhow::Result;
use clap::Args;
use reprise_core::CheckoutOptions;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct CheckoutCommand {
    #[arg(help = "Snapshot id, unique prefix or \"latest\"")]
    id: String,

    #[arg(long, help = "Restore into this directory instead of the data directory")]
    target: Option<PathBuf>,

    #[arg(long, help = "Rewrite files even when they look unchanged")]
    force: bool,
}

impl CheckoutCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = Target::resolve(cli)?.open(cli).await?;
        let id = resolve_index(&repo, &self.id).await?;

        let progress = Arc::new(BarProgress::new(cli.quiet));
        let options = CheckoutOptions {
            target: self.target.clone(),
            force: self.force,
            progress: progress.clone(),
            ..CheckoutOptions::default()
        };
        let result = repo.checkout(&id, &options).await;
        progress.finish();
        let (upserted, removed) = result?;

        let location = self.target.as_deref().unwrap_or(repo.data_path());
        println!("Checked out {} into {}", &id[..8.min(id.len())], location.display());
        println!("Written: {}", upserted);
        println!("Removed: {}", removed);
        Ok(())
    }
}
