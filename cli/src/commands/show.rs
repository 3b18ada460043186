use super::{Target, format_size, resolve_index};
use anyhow::Result;
use clap::Args;
use chrono::{TimeZone, Utc};

#[derive(Args)]
pub struct ShowCommand {
    #[arg(help = "Snapshot id, unique prefix or \"latest\"")]
    id: String,

    #[arg(long, help = "Print as JSON")]
    json: bool,
}

impl ShowCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = Target::resolve(cli)?.open(cli).await?;
        let id = resolve_index(&repo, &self.id).await?;
        let index = repo.history().get(&id).await?;
        let mut files = repo.get_files(&index).await?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        if self.json {
            let value = serde_json::json!({ "index": index, "files": files });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        println!("{}", index.summary());
        if let Some(parent) = &index.parent {
            println!("Parent: {}", parent);
        }
        if !index.system_id.is_empty() {
            println!("System: {} ({}, {})", index.system_name, index.system_os, index.system_id);
        }
        println!();
        for file in files {
            let updated = Utc
                .timestamp_millis_opt(file.updated)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("{:>12}  {:<20} {}", format_size(file.size), updated, file.path);
        }
        Ok(())
    }
}
