use super::{Target, resolve_index};
use anyhow::{Result, anyhow};
use clap::Args;

#[derive(Args)]
pub struct ForgetCommand {
    #[arg(help = "Snapshots to forget")]
    ids: Vec<String>,

    #[arg(long, help = "Keep the N most recent snapshots and forget the rest")]
    keep_last: Option<usize>,
}

impl ForgetCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        if self.ids.is_empty() && self.keep_last.is_none() {
            return Err(anyhow!("Nothing to forget: pass snapshot ids or --keep-last"));
        }
        if self.keep_last == Some(0) {
            return Err(anyhow!("--keep-last must be at least 1"));
        }

        let repo = Target::resolve(cli)?.open(cli).await?;
        let mut doomed = Vec::new();
        for id in &self.ids {
            doomed.push(resolve_index(&repo, id).await?);
        }
        if let Some(keep) = self.keep_last {
            let latest = repo.history().latest_id().await?;
            doomed.extend(
                repo.history()
                    .all()
                    .await?
                    .into_iter()
                    .filter(|index| Some(&index.id) != latest.as_ref())
                    .skip(keep.saturating_sub(1))
                    .map(|index| index.id),
            );
        }
        doomed.sort();
        doomed.dedup();

        for id in &doomed {
            repo.history().forget(id).await?;
            println!("Forgot {}", &id[..8.min(id.len())]);
        }
        if doomed.is_empty() {
            println!("Nothing to forget");
        } else {
            println!("Run `reprise purge` to reclaim space");
        }
        Ok(())
    }
}
