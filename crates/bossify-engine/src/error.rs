//! Failure taxonomy for the rewrite engine.

use bossify_core::{EntropyAssessment, TemplateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BossError {
    #[error("not a git repository (or any parent): {0}")]
    NotARepository(String),

    #[error("HEAD is detached; check out a branch first")]
    DetachedHead,

    #[error("commit {0} has no parent; the mining job needs a parent digest")]
    RootCommit(String),

    #[error("cannot resolve '{0}' to a commit")]
    UnresolvedRef(String),

    #[error("'{0}' is not an ancestor of HEAD")]
    NotAnAncestor(String),

    #[error("malformed template: {0}")]
    Template(#[from] TemplateError),

    #[error("insufficient entropy: {assessment}")]
    InsufficientEntropy { assessment: EntropyAssessment },

    #[error("mining session error: {0}")]
    Session(String),

    #[error("search space exhausted without a hit; admission control should have prevented this")]
    SearchExhausted,

    #[error("replay conflict, resolve manually; commits already rewritten stay rewritten:\n{0}")]
    ReplayConflict(String),

    #[error("commit {0} has no saved template; bossify it individually before rebase-all")]
    MissingSavedTemplate(String),

    #[error("no template given and none recorded for commit {0}")]
    NoTemplate(String),
}
