//! History rewrite engine: amend-head, single-ancestor rebase, and
//! whole-history cascading rebase, all built on one bossify-one primitive.
//!
//! The pipeline is strictly sequential; every step's input (parent digest,
//! ancestor state) depends on the previous step's output. The only
//! concurrency is the detached warm-up signal to the remote session.

use std::sync::Arc;

use anyhow::Result;
use bossify_core::{entropy, template, CommitIdentity, EntropyAssessment};
use bossify_ledger::SqliteStore;
use tracing::{info, warn};

use crate::error::BossError;
use crate::git::{CommitMeta, GitDate, GitRepo};
use crate::mine::{self, MiningFailure, MiningJob, MiningOutcome};
use crate::session::{spawn_warm_up, ComputeSession};

/// Timestamp handling for rewrites and replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMode {
    /// Keep the original author/committer timestamps.
    Preserve,
    /// Stamp rewritten and replayed commits with the wall clock.
    Now,
}

/// Outcome of one commit rewrite.
#[derive(Debug, Clone)]
pub struct RewriteReport {
    pub old_id: String,
    pub new_id: String,
    pub message: String,
    pub replayed: usize,
}

/// Outcome of a whole-history rewrite.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub rewritten: Vec<RewriteReport>,
    pub already_matching: usize,
    pub roots_skipped: usize,
}

pub struct RewriteEngine {
    repo: GitRepo,
    session: Arc<dyn ComputeSession>,
    target_prefix: String,
    inverse_failure_rate: f64,
    time_mode: TimeMode,
}

impl RewriteEngine {
    pub fn new(
        repo: GitRepo,
        session: Arc<dyn ComputeSession>,
        target_prefix: String,
        inverse_failure_rate: f64,
        time_mode: TimeMode,
    ) -> Self {
        Self {
            repo,
            session,
            target_prefix,
            inverse_failure_rate,
            time_mode,
        }
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    /// Mine and amend HEAD in place; the branch pointer follows naturally.
    pub async fn amend_head(
        &self,
        store: &SqliteStore,
        template_arg: Option<&str>,
    ) -> Result<RewriteReport> {
        if self.repo.current_branch().await?.is_none() {
            return Err(BossError::DetachedHead.into());
        }
        let meta = self.repo.commit_meta("HEAD").await?;
        if meta.parents.is_empty() {
            return Err(BossError::RootCommit(meta.id.clone()).into());
        }

        spawn_warm_up(&self.session);

        let template_text = self.resolve_template(store, &meta, template_arg)?;
        let assessment = self.admit(&template_text)?;
        let _ = store.upsert(&meta.identity(), &template_text)?;

        let date = self.rewrite_date(&meta);
        let message = self
            .mine_message(&meta, &template_text, &assessment, &date)
            .await?;
        let new_id = self
            .repo
            .amend_message(self.repo.root(), &message, &date)
            .await?;
        info!(old = %meta.id, new = %new_id, "amended HEAD");

        Ok(RewriteReport {
            old_id: meta.id,
            new_id,
            message,
            replayed: 0,
        })
    }

    /// Rewrite one ancestor of HEAD in isolation, reset the branch to the
    /// rewritten commit, and replay everything that came after it.
    pub async fn rebase_one(
        &self,
        store: &SqliteStore,
        target_ref: &str,
        template_arg: Option<&str>,
    ) -> Result<RewriteReport> {
        if self.repo.current_branch().await?.is_none() {
            return Err(BossError::DetachedHead.into());
        }
        let target = self
            .repo
            .rev_parse(target_ref)
            .await?
            .ok_or_else(|| BossError::UnresolvedRef(target_ref.to_string()))?;
        let head = self.repo.head().await?;
        if !self.repo.is_ancestor(&target, &head).await? {
            return Err(BossError::NotAnAncestor(target_ref.to_string()).into());
        }

        spawn_warm_up(&self.session);

        let meta = self.repo.commit_meta(&target).await?;
        if meta.parents.is_empty() {
            return Err(BossError::RootCommit(meta.id.clone()).into());
        }

        // The replay plan is built before anything moves.
        let replay = self.repo.commits_in(&format!("{target}..{head}")).await?;

        let template_text = self.resolve_template(store, &meta, template_arg)?;
        let assessment = self.admit(&template_text)?;
        let _ = store.upsert(&meta.identity(), &template_text)?;

        let (new_id, message) = self
            .bossify_isolated(&meta, &template_text, &assessment)
            .await?;
        self.splice(&new_id, &replay).await?;

        Ok(RewriteReport {
            old_id: meta.id,
            new_id,
            message,
            replayed: replay.len(),
        })
    }

    /// Rewrite every eligible commit in the history, oldest first, using
    /// previously saved templates.
    pub async fn rebase_all(&self, store: &SqliteStore) -> Result<BatchReport> {
        if self.repo.current_branch().await?.is_none() {
            return Err(BossError::DetachedHead.into());
        }

        spawn_warm_up(&self.session);

        // Planning pass: fail fast with zero mutation. A partial rewrite is
        // worse than no rewrite.
        let commits = self.repo.commits_in("HEAD").await?;
        let mut pending: Vec<(CommitIdentity, String)> = Vec::new();
        let mut already_matching = 0usize;
        let mut roots_skipped = 0usize;
        for meta in &commits {
            if meta.id.starts_with(&self.target_prefix) {
                already_matching += 1;
                continue;
            }
            if meta.parents.is_empty() {
                warn!(commit = %meta.id, "root commit has no parent digest to mine with, skipping");
                roots_skipped += 1;
                continue;
            }
            let record = store
                .lookup(&meta.identity())?
                .ok_or_else(|| BossError::MissingSavedTemplate(meta.id.clone()))?;
            let _ = self.admit(&record.template)?;
            pending.push((meta.identity(), record.template));
        }

        let mut rewritten = Vec::new();
        for (identity, template_text) in &pending {
            // Digests noted during planning are stale the moment an ancestor
            // was rewritten: re-derive the sequence and re-locate the target
            // by identity, never by a carried-over digest.
            let current = self.repo.commits_in("HEAD").await?;
            let mut matches = current.iter().filter(|meta| meta.identity() == *identity);
            let meta = matches
                .next()
                .cloned()
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "commit with recorded identity vanished mid-batch (tree {})",
                        identity.tree_digest
                    )
                })?;
            if matches.next().is_some() {
                warn!(
                    tree = %identity.tree_digest,
                    "multiple commits share this identity; rewriting the oldest"
                );
            }
            if meta.id.starts_with(&self.target_prefix) {
                already_matching += 1;
                continue;
            }

            let head = self.repo.head().await?;
            let replay = self
                .repo
                .commits_in(&format!("{}..{}", meta.id, head))
                .await?;
            let assessment = self.admit(template_text)?;
            let _ = store.upsert(&meta.identity(), template_text)?;

            let (new_id, message) = self
                .bossify_isolated(&meta, template_text, &assessment)
                .await?;
            self.splice(&new_id, &replay).await?;
            info!(old = %meta.id, new = %new_id, replayed = replay.len(), "rewrote commit");

            rewritten.push(RewriteReport {
                old_id: meta.id.clone(),
                new_id,
                message,
                replayed: replay.len(),
            });
        }

        Ok(BatchReport {
            rewritten,
            already_matching,
            roots_skipped,
        })
    }

    /// Parse and entropy-validate a template against the configured target.
    fn admit(&self, template_text: &str) -> Result<EntropyAssessment> {
        let nodes = template::parse(template_text).map_err(BossError::Template)?;
        let count = template::count_variants(&nodes);
        let bits = entropy::prefix_bits(&self.target_prefix);
        let assessment = entropy::validate(count, bits, self.inverse_failure_rate);
        if !assessment.is_valid {
            return Err(BossError::InsufficientEntropy { assessment }.into());
        }
        Ok(assessment)
    }

    /// Explicit template argument wins; otherwise the stored record for the
    /// commit's identity.
    fn resolve_template(
        &self,
        store: &SqliteStore,
        meta: &CommitMeta,
        arg: Option<&str>,
    ) -> Result<String> {
        if let Some(text) = arg {
            return Ok(text.to_string());
        }
        match store.lookup(&meta.identity())? {
            Some(record) => Ok(record.template),
            None => Err(BossError::NoTemplate(meta.id.clone()).into()),
        }
    }

    /// Submit the mining job through the blocking readiness gate and map the
    /// outcome into the failure taxonomy. A remote entropy refusal is
    /// reported with the locally computed numbers.
    async fn mine_message(
        &self,
        meta: &CommitMeta,
        template_text: &str,
        assessment: &EntropyAssessment,
        date: &GitDate,
    ) -> Result<String> {
        let job = MiningJob::from_commit(meta, template_text, &self.target_prefix, date)?;
        self.session
            .ensure_ready()
            .await
            .map_err(|e| BossError::Session(e.to_string()))?;
        match mine::submit(self.session.as_ref(), &job).await {
            MiningOutcome::Success {
                message,
                winning_digest,
            } => {
                if let Some(digest) = winning_digest {
                    info!(%digest, "miner reported winning digest");
                }
                Ok(message)
            }
            MiningOutcome::Failure(MiningFailure::InsufficientEntropy) => {
                Err(BossError::InsufficientEntropy {
                    assessment: assessment.clone(),
                }
                .into())
            }
            MiningOutcome::Failure(MiningFailure::SearchExhausted) => {
                Err(BossError::SearchExhausted.into())
            }
            MiningOutcome::Failure(MiningFailure::SessionError(text)) => {
                Err(BossError::Session(text).into())
            }
        }
    }

    /// bossify-one in an isolated worktree: the branch is untouched until
    /// the rewrite is verified, and the new digest is captured strictly
    /// before the worktree is torn down.
    async fn bossify_isolated(
        &self,
        meta: &CommitMeta,
        template_text: &str,
        assessment: &EntropyAssessment,
    ) -> Result<(String, String)> {
        let worktree = self.repo.add_worktree(&meta.id).await?;
        let date = self.rewrite_date(meta);
        let result = async {
            let message = self
                .mine_message(meta, template_text, assessment, &date)
                .await?;
            let new_id = self
                .repo
                .amend_message(worktree.path(), &message, &date)
                .await?;
            Ok((new_id, message))
        }
        .await;
        worktree.remove().await;
        result
    }

    /// Reset the branch to the rewritten commit and replay the downstream
    /// commits in their original order.
    async fn splice(&self, new_base: &str, replay: &[CommitMeta]) -> Result<()> {
        self.repo.reset_hard(new_base).await?;
        for commit in replay {
            match self.time_mode {
                TimeMode::Preserve => {
                    self.repo
                        .cherry_pick(&commit.id, Some(&commit.committer_date))
                        .await?;
                }
                TimeMode::Now => {
                    self.repo.cherry_pick(&commit.id, None).await?;
                    self.repo
                        .amend_dates(self.repo.root(), &GitDate::now())
                        .await?;
                }
            }
        }
        Ok(())
    }

    fn rewrite_date(&self, meta: &CommitMeta) -> GitDate {
        match self.time_mode {
            TimeMode::Preserve => meta.author_date.clone(),
            TimeMode::Now => GitDate::now(),
        }
    }
}
