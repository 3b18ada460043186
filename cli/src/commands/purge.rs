use super::{Target, format_size};
use crate::progress::BarProgress;
use anyhow::Result;
use clap::Args;
use reprise_core::PurgeOptions;
use std::sync::Arc;

#[derive(Args)]
pub struct PurgeCommand {
    #[arg(long, help = "Report what would be deleted without deleting it")]
    dry_run: bool,
}

impl PurgeCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = Target::resolve(cli)?.open(cli).await?;
        if self.dry_run {
            println!("DRY RUN - nothing will be deleted");
        }

        let progress = Arc::new(BarProgress::new(cli.quiet));
        let options = PurgeOptions {
            dry_run: self.dry_run,
            progress: progress.clone(),
            ..PurgeOptions::default()
        };
        let result = repo.purge(&options).await;
        progress.finish();
        let stat = result?;

        println!("Snapshots retained: {}", stat.indexes);
        println!("Files referenced: {}", stat.files);
        let verb = if self.dry_run { "Would delete" } else { "Deleted" };
        println!("{}: {} objects ({})", verb, stat.objects, format_size(stat.size));
        if stat.temp_files > 0 {
            println!("{}: {} abandoned temp files", verb, stat.temp_files);
        }
        Ok(())
    }
}
