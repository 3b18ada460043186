use super::{Target, resolve_index};
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct DiffCommand {
    #[arg(help = "Older snapshot")]
    from: String,

    #[arg(help = "Newer snapshot", default_value = "latest")]
    to: String,

    #[arg(long, help = "Print as JSON")]
    json: bool,
}

impl DiffCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = Target::resolve(cli)?.open(cli).await?;
        let from = resolve_index(&repo, &self.from).await?;
        let to = resolve_index(&repo, &self.to).await?;
        let diff = repo.diff(&from, &to).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&diff)?);
            return Ok(());
        }
        if diff.is_empty() {
            println!("No differences");
            return Ok(());
        }
        for path in &diff.added {
            println!("+ {}", path);
        }
        for path in &diff.updated {
            println!("M {}", path);
        }
        for path in &diff.removed {
            println!("- {}", path);
        }
        Ok(())
    }
}
