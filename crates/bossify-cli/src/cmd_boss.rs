use std::path::Path;
use std::sync::Arc;

use bossify_engine::{BossConfig, ComputeSession, GitRepo, RewriteEngine, SshSession, TimeMode};
use bossify_ledger::SqliteStore;

pub fn execute(cwd: &Path, template: Option<&str>) -> anyhow::Result<()> {
    let config = BossConfig::from_env()?;
    tokio::runtime::Runtime::new()?.block_on(async {
        let repo = GitRepo::open(cwd).await?;
        let store = SqliteStore::open_or_create(&config.db_path(repo.root()))?;
        let session: Arc<dyn ComputeSession> = Arc::new(SshSession::from_config(&config));
        let engine = RewriteEngine::new(
            repo,
            session,
            config.target_prefix.clone(),
            config.inverse_failure_rate,
            TimeMode::Preserve,
        );

        let report = engine.amend_head(&store, template).await?;
        println!("{} -> {}", report.old_id, report.new_id);
        println!("{}", report.message);
        Ok(())
    })
}
