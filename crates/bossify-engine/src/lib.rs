pub mod config;
pub mod error;
pub mod git;
pub mod mine;
pub mod rewrite;
pub mod session;

pub use config::BossConfig;
pub use error::BossError;
pub use git::{CommitMeta, GitDate, GitRepo};
pub use mine::{MiningFailure, MiningJob, MiningOutcome};
pub use rewrite::{BatchReport, RewriteEngine, RewriteReport, TimeMode};
pub use session::{ComputeSession, SessionOutput, SshSession};
