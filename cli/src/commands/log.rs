use super::{Target, format_size};
use anyhow::{Result, anyhow};
use clap::Args;

#[derive(Args)]
pub struct LogCommand {
    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,

    #[arg(short = 'n', long, help = "Show at most N snapshots")]
    limit: Option<usize>,
}

impl LogCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = Target::resolve(cli)?.open(cli).await?;
        let indexes = repo.history().lineage(None, self.limit).await?;

        match self.format.as_deref().unwrap_or("table") {
            "table" => {
                if indexes.is_empty() {
                    println!("No snapshots found");
                    return Ok(());
                }
                println!("{:<10} {:<20} {:<15} {:>7} {:>12}  {}", "ID", "Date", "Host", "Files", "Size", "Memo");
                println!("{:-<90}", "");
                for index in indexes {
                    println!(
                        "{:<10} {:<20} {:<15} {:>7} {:>12}  {}",
                        index.short_id(),
                        index.created_at().format("%Y-%m-%d %H:%M:%S"),
                        index.system_name,
                        index.count,
                        format_size(index.size),
                        index.memo
                    );
                }
            }
            "json" => println!("{}", serde_json::to_string_pretty(&indexes)?),
            other => return Err(anyhow!("Unsupported format: {}", other)),
        }
        Ok(())
    }
}
