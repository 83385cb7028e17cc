//! Stable commit identity and the persisted bossification record.

use serde::{Deserialize, Serialize};

/// The content+authorship tuple of a commit.
///
/// Deliberately excludes the commit's own hash and message: this is the
/// identity that survives a message-only rewrite, used as the join key
/// between a pre-rewrite commit and the record of which template to use for
/// it. Two commits sharing all four fields are treated as the same logical
/// commit (collision risk accepted, see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub tree_digest: String,
    pub author_name: String,
    pub author_email: String,
    /// Author date, epoch seconds.
    pub author_timestamp: i64,
}

/// A persisted record of which template was used to bossify a logical commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bossification {
    pub identity: CommitIdentity,
    pub template: String,
    /// RFC 3339 UTC timestamp of the last upsert.
    pub recorded_at: String,
}
