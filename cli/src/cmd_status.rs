//! `vaultindex status` — show persisted watermarks and the resume block.

use anyhow::{Context, Result};
use vaultindex_core::{IndexerConfig, ResumePoint, WatermarkResolver};

use crate::StatusArgs;

pub async fn run(args: StatusArgs) -> Result<()> {
    let store = vaultindex_storage::open(&args.resume.database_url)
        .await
        .with_context(|| "opening the event store")?;

    let config = IndexerConfig {
        start_block: args.resume.start_block,
        force_start_block: args.resume.force_start_block,
        ..IndexerConfig::default()
    };
    let resume = WatermarkResolver::new(store.as_ref())
        .resolve(&config)
        .await
        .context("resolving the resume block")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resume)?);
    } else {
        print!("{}", render(&resume));
    }
    Ok(())
}

fn render(resume: &ResumePoint) -> String {
    let mut out = String::new();
    out.push_str("Table watermarks:\n");
    for (kind, mark) in &resume.table_marks {
        let mark = mark.map_or_else(|| "(empty)".to_string(), |b| b.to_string());
        out.push_str(&format!("  {:<18} {}\n", kind.table_name(), mark));
    }
    match &resume.indexer_status {
        Some(status) => out.push_str(&format!(
            "Indexer status:      block {} (updated at {})\n",
            status.last_block,
            chrono::DateTime::from_timestamp(status.updated_at, 0)
                .map_or_else(|| status.updated_at.to_string(), |t| t.to_rfc3339())
        )),
        None => out.push_str("Indexer status:      (none)\n"),
    }
    out.push_str(&format!(
        "Resume block:        {}{}\n",
        resume.start_block,
        if resume.forced { " (forced)" } else { "" }
    ));
    out
}
