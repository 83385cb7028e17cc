use std::path::Path;

use bossify_engine::BossConfig;
use bossify_ledger::{BossPaths, SqliteStore};

pub fn execute(cwd: &Path, json: bool) -> anyhow::Result<()> {
    let config = BossConfig::from_env()?;
    let root = BossPaths::find_root(cwd)
        .ok_or_else(|| anyhow::anyhow!("not a git repository (or any parent)"))?;
    let store = SqliteStore::open_or_create(&config.db_path(&root))?;

    let records = store.list_all()?;
    if records.is_empty() && !json {
        println!("(no bossifications recorded)");
        return Ok(());
    }

    for record in records {
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!(
                "{}  tree {}  {} <{}> @{}  \"{}\"",
                record.recorded_at,
                &record.identity.tree_digest[..12.min(record.identity.tree_digest.len())],
                record.identity.author_name,
                record.identity.author_email,
                record.identity.author_timestamp,
                record.template
            );
        }
    }
    Ok(())
}
