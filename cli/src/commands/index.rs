use super::{Target, format_size};
use crate::progress::BarProgress;
use anyhow::Result;
use clap::Args;
use reprise_core::IndexOptions;
use std::sync::Arc;

#[derive(Args)]
pub struct IndexCommand {
    #[arg(short, long, default_value = "", help = "Note stored with the snapshot")]
    message: String,
}

impl IndexCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = Target::resolve(cli)?.open(cli).await?;
        let previous = repo.history().latest_id().await?;

        let progress = Arc::new(BarProgress::new(cli.quiet));
        let options = IndexOptions {
            progress: progress.clone(),
            ..IndexOptions::default()
        };
        let result = repo.index(&self.message, &options).await;
        progress.finish();
        let index = result?;

        if previous.as_deref() == Some(index.id.as_str()) {
            println!("No changes since {}", index.short_id());
        } else {
            println!("Created snapshot {}", index.short_id());
        }
        println!("Files: {}", index.count);
        println!("Size: {}", format_size(index.size));
        Ok(())
    }
}
