//! Engine configuration, resolved once from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use bossify_ledger::BossPaths;

/// Default target prefix: 8 hex characters, 32 bits.
pub const DEFAULT_TARGET_PREFIX: &str = "c0deb055";

/// Default inverse failure rate: accept at most a 1-in-100,000 chance of
/// exhausting a template without a hit.
pub const DEFAULT_INVERSE_FAILURE_RATE: f64 = 100_000.0;

const DEFAULT_REMOTE_HOST: &str = "bossrig";
const DEFAULT_MINER_CMD: &str = "codeboss";
const DEFAULT_POLL_SECS: u64 = 5;

/// Runtime configuration for the engine and its collaborators.
#[derive(Debug, Clone)]
pub struct BossConfig {
    /// Hex prefix the rewritten commit digests must start with.
    pub target_prefix: String,
    pub inverse_failure_rate: f64,
    /// SSH destination of the remote mining session.
    pub remote_host: String,
    /// Miner executable on the remote side.
    pub miner_cmd: String,
    /// Optional local command that wakes the remote instance.
    pub wake_cmd: Option<String>,
    /// Delay between readiness probes while the session is coming up.
    pub poll_interval: Duration,
    /// Overrides the `.bossify/bossify.db` default when set.
    pub db_override: Option<PathBuf>,
}

impl BossConfig {
    /// Read configuration from `BOSSIFY_*` environment variables, falling
    /// back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let target_prefix = match std::env::var("BOSSIFY_TARGET_PREFIX") {
            Ok(value) => validate_target(&value)?,
            Err(_) => DEFAULT_TARGET_PREFIX.to_string(),
        };
        let inverse_failure_rate = match std::env::var("BOSSIFY_FAILURE_RATE") {
            Ok(value) => {
                let rate: f64 = value
                    .parse()
                    .context("BOSSIFY_FAILURE_RATE must be a number")?;
                if rate < 1.0 {
                    bail!("BOSSIFY_FAILURE_RATE must be at least 1, got {rate}");
                }
                rate
            }
            Err(_) => DEFAULT_INVERSE_FAILURE_RATE,
        };
        let poll_secs = match std::env::var("BOSSIFY_POLL_SECS") {
            Ok(value) => value.parse().context("BOSSIFY_POLL_SECS must be seconds")?,
            Err(_) => DEFAULT_POLL_SECS,
        };
        Ok(Self {
            target_prefix,
            inverse_failure_rate,
            remote_host: std::env::var("BOSSIFY_REMOTE_HOST")
                .unwrap_or_else(|_| DEFAULT_REMOTE_HOST.to_string()),
            miner_cmd: std::env::var("BOSSIFY_MINER_CMD")
                .unwrap_or_else(|_| DEFAULT_MINER_CMD.to_string()),
            wake_cmd: std::env::var("BOSSIFY_WAKE_CMD").ok().filter(|s| !s.is_empty()),
            poll_interval: Duration::from_secs(poll_secs),
            db_override: std::env::var("BOSSIFY_DB").ok().map(PathBuf::from),
        })
    }

    /// Resolve the store location for a repository root.
    pub fn db_path(&self, repo_root: &Path) -> PathBuf {
        self.db_override
            .clone()
            .unwrap_or_else(|| BossPaths::discover(repo_root).db_file)
    }
}

/// Target prefixes must be non-empty lowercase hex, at most a full digest.
fn validate_target(value: &str) -> anyhow::Result<String> {
    let normalized = value.to_ascii_lowercase();
    if normalized.is_empty()
        || normalized.len() > 40
        || !normalized.bytes().all(|b| b.is_ascii_hexdigit())
    {
        bail!("BOSSIFY_TARGET_PREFIX must be 1-40 hex characters, got '{value}'");
    }
    Ok(normalized)
}
