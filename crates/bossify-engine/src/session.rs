//! Remote compute session: the transport the mining protocol runs over.
//!
//! The session is a single exclusive resource: one job at a time, submitted
//! only after the blocking readiness gate has passed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::BossConfig;

/// Raw output of one remote command. Expected non-zero miner exits come back
/// as `Ok`; transport-level failures are `Err`.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait ComputeSession: Send + Sync {
    /// Block until the session can accept a job, polling with a fixed delay.
    /// No timeout: a permanently stuck session blocks until interrupted.
    /// This is the authoritative readiness gate before every submission.
    async fn ensure_ready(&self) -> anyhow::Result<()>;

    /// Single best-effort wake signal. Callers discard the result.
    async fn wake(&self) -> anyhow::Result<()>;

    /// Run one mining job to completion and return its combined output.
    async fn run_miner(&self, argv: &[String]) -> anyhow::Result<SessionOutput>;
}

/// Fire the wake signal without waiting for it, overlapping instance wake-up
/// latency with local git bookkeeping. The detached task mutates nothing and
/// its failure is absorbed; `ensure_ready` remains the readiness gate.
pub fn spawn_warm_up(session: &Arc<dyn ComputeSession>) {
    let session = Arc::clone(session);
    let _ = tokio::spawn(async move {
        let _ = session.wake().await;
    });
}

/// SSH-backed session: readiness is ssh reachability, the wake signal is an
/// optional local shell command (typically a cloud instance resume), and a
/// job is one remote command line.
pub struct SshSession {
    pub host: String,
    pub miner_cmd: String,
    pub wake_cmd: Option<String>,
    pub poll_interval: Duration,
}

impl SshSession {
    pub fn from_config(config: &BossConfig) -> Self {
        Self {
            host: config.remote_host.clone(),
            miner_cmd: config.miner_cmd.clone(),
            wake_cmd: config.wake_cmd.clone(),
            poll_interval: config.poll_interval,
        }
    }

    async fn probe(&self) -> bool {
        Command::new("ssh")
            .args([
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=5",
                &self.host,
                "true",
            ])
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ComputeSession for SshSession {
    async fn ensure_ready(&self) -> anyhow::Result<()> {
        loop {
            if self.probe().await {
                return Ok(());
            }
            debug!(host = %self.host, "session not reachable yet, waiting");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wake(&self) -> anyhow::Result<()> {
        let Some(cmd) = &self.wake_cmd else {
            return Ok(());
        };
        let output = Command::new("sh").args(["-c", cmd]).output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "wake command failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn run_miner(&self, argv: &[String]) -> anyhow::Result<SessionOutput> {
        let command_line = std::iter::once(self.miner_cmd.as_str())
            .chain(argv.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        let output = Command::new("ssh")
            .args(["-o", "BatchMode=yes", &self.host, &command_line])
            .output()
            .await?;
        // 255 is ssh's own failure exit, never the miner's.
        if output.status.code() == Some(255) {
            anyhow::bail!(
                "ssh transport failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(SessionOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Quote one argument for the remote shell.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '+'));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
