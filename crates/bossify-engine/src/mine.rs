//! Mining request protocol: job construction, dispatch, and textual result
//! interpretation.
//!
//! The request is fully self-describing: the remote side needs nothing from
//! the repository beyond these seven arguments. The response contract is
//! plain text: an entropy marker, a `Found in` line, and the winning message
//! as the last line of stdout.

use tracing::info;

use crate::error::BossError;
use crate::git::{CommitMeta, GitDate};
use crate::session::{ComputeSession, SessionOutput};

/// Markers the miner emits when it refuses a thin template. The second is
/// the miner's own phrasing ("Template has only N bits of entropy"); it can
/// trip even after local admission passed, since the miner applies its own
/// floor.
const ENTROPY_MARKERS: [&str; 2] = ["not enough entropy", "bits of entropy"];
/// Line prefix the miner emits on success.
const FOUND_MARKER: &str = "Found in ";
/// Diagnostic line carrying the winning digest.
const HASH_MARKER: &str = "Hash: ";

/// Everything the remote search needs to reconstruct the to-be-hashed
/// commit object deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningJob {
    pub template: String,
    pub tree: String,
    pub parent: String,
    /// `"Name <email>"`.
    pub author: String,
    pub timestamp: i64,
    /// `±HHMM`.
    pub timezone: String,
    pub target_prefix: String,
}

impl MiningJob {
    /// Build a job from live commit metadata. `date` is the timestamp the
    /// amend will stamp; the miner must hash exactly the bytes the final
    /// commit will contain. Root commits are rejected: the commit header
    /// cannot be reconstructed without a parent digest.
    pub fn from_commit(
        meta: &CommitMeta,
        template: &str,
        target_prefix: &str,
        date: &GitDate,
    ) -> Result<Self, BossError> {
        let parent = meta
            .first_parent()
            .ok_or_else(|| BossError::RootCommit(meta.id.clone()))?;
        Ok(Self {
            template: template.to_string(),
            tree: meta.tree.clone(),
            parent: parent.to_string(),
            author: meta.author_string(),
            timestamp: date.timestamp,
            timezone: date.timezone.clone(),
            target_prefix: target_prefix.to_string(),
        })
    }

    /// The miner's seven positional arguments, in its argv order.
    pub fn argv(&self) -> Vec<String> {
        vec![
            self.template.clone(),
            self.tree.clone(),
            self.parent.clone(),
            self.author.clone(),
            self.timestamp.to_string(),
            self.timezone.clone(),
            self.target_prefix.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    Success {
        /// The winning commit message, verbatim.
        message: String,
        /// The digest the miner reported, when its diagnostic line was
        /// present. The authoritative digest is captured after the amend.
        winning_digest: Option<String>,
    },
    Failure(MiningFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningFailure {
    /// The remote side refused the template outright.
    InsufficientEntropy,
    /// Every variant was tried without a hit. Fatal: admission control
    /// should make this unreachable, so it signals a protocol or
    /// arithmetic bug.
    SearchExhausted,
    /// The transport failed; carries the underlying error text verbatim.
    SessionError(String),
}

/// Interpret the miner's combined output.
///
/// The entropy marker wins over everything else; an exit outside the miner's
/// own codes (0 success, 1 exhausted, 2 entropy) means the run itself broke;
/// without a `Found in` line the search is exhausted; otherwise the last
/// line of stdout is the winning message. Progress and diagnostics all go to
/// stderr, so stdout's trailing line is the result by construction.
pub fn interpret(output: &SessionOutput) -> MiningOutcome {
    let combined = format!("{}\n{}", output.stdout, output.stderr);

    if combined
        .lines()
        .any(|line| ENTROPY_MARKERS.iter().any(|marker| line.contains(marker)))
    {
        return MiningOutcome::Failure(MiningFailure::InsufficientEntropy);
    }
    if !matches!(output.exit_code, Some(0..=2)) {
        let code = output
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return MiningOutcome::Failure(MiningFailure::SessionError(format!(
            "miner exited abnormally ({code}): {}",
            output.stderr.trim()
        )));
    }
    if !combined.lines().any(|line| line.starts_with(FOUND_MARKER)) {
        return MiningOutcome::Failure(MiningFailure::SearchExhausted);
    }

    let message = output
        .stdout
        .lines()
        .last()
        .unwrap_or_default()
        .to_string();
    let winning_digest = combined
        .lines()
        .find_map(|line| line.strip_prefix(HASH_MARKER))
        .map(|digest| digest.trim().to_string());

    MiningOutcome::Success {
        message,
        winning_digest,
    }
}

/// Dispatch one job and interpret the result. Transport failures become
/// `SessionError`; nothing is retried.
pub async fn submit(session: &dyn ComputeSession, job: &MiningJob) -> MiningOutcome {
    info!(
        target_prefix = %job.target_prefix,
        tree = %job.tree,
        "submitting mining job"
    );
    match session.run_miner(&job.argv()).await {
        Ok(output) => interpret(&output),
        Err(e) => MiningOutcome::Failure(MiningFailure::SessionError(e.to_string())),
    }
}
