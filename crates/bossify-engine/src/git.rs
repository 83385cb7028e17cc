//! Git collaborator: everything the rewrite engine needs from the
//! repository, spoken over the `git` CLI.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bossify_core::CommitIdentity;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::BossError;

/// A git date in raw format: epoch seconds plus a `±HHMM` offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitDate {
    pub timestamp: i64,
    pub timezone: String,
}

impl GitDate {
    /// `"<timestamp> <timezone>"`, the form `GIT_AUTHOR_DATE` /
    /// `GIT_COMMITTER_DATE` and `--date` accept.
    pub fn raw(&self) -> String {
        format!("{} {}", self.timestamp, self.timezone)
    }

    /// The wall clock, as UTC.
    pub fn now() -> Self {
        Self {
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    fn parse_raw(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.split_whitespace();
        let timestamp = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty git date"))?
            .parse()?;
        let timezone = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("git date '{raw}' has no timezone"))?
            .to_string();
        Ok(Self {
            timestamp,
            timezone,
        })
    }
}

/// Metadata of one commit, read fresh from the repository.
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub id: String,
    pub tree: String,
    pub parents: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub author_date: GitDate,
    pub committer_date: GitDate,
}

impl CommitMeta {
    /// The stable identity that survives a message-only rewrite.
    pub fn identity(&self) -> CommitIdentity {
        CommitIdentity {
            tree_digest: self.tree.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
            author_timestamp: self.author_date.timestamp,
        }
    }

    /// `"Name <email>"`, the form the mining job carries.
    pub fn author_string(&self) -> String {
        format!("{} <{}>", self.author_name, self.author_email)
    }

    pub fn first_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

/// NUL-separated field list for commit metadata, records ended by \x01.
const META_FORMAT: &str = "%H%x00%T%x00%P%x00%an%x00%ae%x00%ad%x00%cd%x01";

static WORKTREE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Handle to a git repository rooted at its top-level directory.
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Open the repository containing `dir`.
    pub async fn open(dir: &Path) -> anyhow::Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(BossError::NotARepository(dir.display().to_string()).into());
        }
        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run_in(
        &self,
        dir: &Path,
        args: &[&str],
        envs: &[(&str, String)],
    ) -> anyhow::Result<std::process::Output> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        Ok(cmd.output().await?)
    }

    async fn git_ok(
        &self,
        dir: &Path,
        args: &[&str],
        envs: &[(&str, String)],
    ) -> anyhow::Result<String> {
        let output = self.run_in(dir, args, envs).await?;
        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Name of the checked-out branch, or `None` when HEAD is detached.
    pub async fn current_branch(&self) -> anyhow::Result<Option<String>> {
        let output = self
            .run_in(&self.root, &["symbolic-ref", "--short", "-q", "HEAD"], &[])
            .await?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// Resolve a revision to a commit id, `None` if it does not exist.
    pub async fn rev_parse(&self, rev: &str) -> anyhow::Result<Option<String>> {
        let spec = format!("{rev}^{{commit}}");
        let output = self
            .run_in(&self.root, &["rev-parse", "--verify", "--quiet", &spec], &[])
            .await?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    pub async fn head(&self) -> anyhow::Result<String> {
        Ok(self
            .git_ok(&self.root, &["rev-parse", "HEAD"], &[])
            .await?
            .trim()
            .to_string())
    }

    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> anyhow::Result<bool> {
        let output = self
            .run_in(
                &self.root,
                &["merge-base", "--is-ancestor", ancestor, descendant],
                &[],
            )
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => anyhow::bail!(
                "git merge-base failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }

    /// Metadata of a single commit.
    pub async fn commit_meta(&self, rev: &str) -> anyhow::Result<CommitMeta> {
        let format = format!("--format={META_FORMAT}");
        let stdout = self
            .git_ok(
                &self.root,
                &["show", "-s", "--date=raw", &format, rev],
                &[],
            )
            .await?;
        let record = stdout
            .split('\x01')
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty metadata for {rev}"))?;
        parse_meta(record)
    }

    /// Metadata of every commit in a rev-list range, oldest first.
    pub async fn commits_in(&self, range: &str) -> anyhow::Result<Vec<CommitMeta>> {
        let format = format!("--format={META_FORMAT}");
        let stdout = self
            .git_ok(
                &self.root,
                &["log", "--reverse", "--date=raw", &format, range],
                &[],
            )
            .await?;
        stdout
            .split('\x01')
            .map(|record| record.trim_matches('\n'))
            .filter(|record| !record.is_empty())
            .map(parse_meta)
            .collect()
    }

    /// Create a detached worktree at `rev` in a scratch location.
    pub async fn add_worktree(&self, rev: &str) -> anyhow::Result<Worktree> {
        let path = std::env::temp_dir().join(format!(
            "bossify-wt-{}-{}",
            std::process::id(),
            WORKTREE_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let path_str = path.display().to_string();
        self.git_ok(
            &self.root,
            &["worktree", "add", "--detach", &path_str, rev],
            &[],
        )
        .await?;
        debug!(path = %path.display(), rev, "created isolated worktree");
        Ok(Worktree {
            repo_root: self.root.clone(),
            path,
            removed: false,
        })
    }

    /// Amend the commit checked out in `dir`, replacing its message and
    /// forcing both author-date and committer-date to `date`. Returns the
    /// new commit id.
    ///
    /// Signing is disabled and hooks are bypassed: either would alter the
    /// bytes the miner hashed.
    pub async fn amend_message(
        &self,
        dir: &Path,
        message: &str,
        date: &GitDate,
    ) -> anyhow::Result<String> {
        let raw = date.raw();
        self.git_ok(
            dir,
            &[
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--amend",
                "--no-verify",
                "-m",
                message,
                "--date",
                &raw,
            ],
            &[
                ("GIT_AUTHOR_DATE", raw.clone()),
                ("GIT_COMMITTER_DATE", raw.clone()),
            ],
        )
        .await?;
        Ok(self
            .git_ok(dir, &["rev-parse", "HEAD"], &[])
            .await?
            .trim()
            .to_string())
    }

    /// Re-stamp the commit checked out in `dir` with `date` on both author
    /// and committer, keeping tree, parent, and message.
    pub async fn amend_dates(&self, dir: &Path, date: &GitDate) -> anyhow::Result<()> {
        let raw = date.raw();
        let _ = self
            .git_ok(
                dir,
                &[
                    "-c",
                    "commit.gpgsign=false",
                    "commit",
                    "--amend",
                    "--no-edit",
                    "--no-verify",
                    "--date",
                    &raw,
                ],
                &[
                    ("GIT_AUTHOR_DATE", raw.clone()),
                    ("GIT_COMMITTER_DATE", raw.clone()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Move the checked-out branch (and working tree) to `rev`.
    pub async fn reset_hard(&self, rev: &str) -> anyhow::Result<()> {
        let _ = self
            .git_ok(&self.root, &["reset", "--hard", rev], &[])
            .await?;
        Ok(())
    }

    /// Replay `commit` onto the current HEAD. When `committer_date` is set
    /// it overrides git's default of "now"; the author date is carried over
    /// from the original commit either way.
    ///
    /// A conflict is fatal and reported verbatim; the conflicted state is
    /// left in place for manual resolution.
    pub async fn cherry_pick(
        &self,
        commit: &str,
        committer_date: Option<&GitDate>,
    ) -> anyhow::Result<()> {
        let mut envs = Vec::new();
        if let Some(date) = committer_date {
            envs.push(("GIT_COMMITTER_DATE", date.raw()));
        }
        let output = self
            .run_in(
                &self.root,
                &["-c", "commit.gpgsign=false", "cherry-pick", commit],
                &envs,
            )
            .await?;
        if !output.status.success() {
            let detail = format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(BossError::ReplayConflict(detail.trim().to_string()).into());
        }
        Ok(())
    }
}

fn parse_meta(record: &str) -> anyhow::Result<CommitMeta> {
    let fields: Vec<&str> = record.trim_matches('\n').split('\x00').collect();
    if fields.len() != 7 {
        anyhow::bail!(
            "unexpected commit metadata shape ({} fields)",
            fields.len()
        );
    }
    Ok(CommitMeta {
        id: fields[0].to_string(),
        tree: fields[1].to_string(),
        parents: fields[2].split_whitespace().map(String::from).collect(),
        author_name: fields[3].to_string(),
        author_email: fields[4].to_string(),
        author_date: GitDate::parse_raw(fields[5])?,
        committer_date: GitDate::parse_raw(fields[6])?,
    })
}

/// A disposable detached checkout. `remove` is the primary teardown; if git
/// refuses, the directory is deleted directly and the registration pruned.
/// Cleanup failures never escalate.
pub struct Worktree {
    repo_root: PathBuf,
    path: PathBuf,
    removed: bool,
}

impl Worktree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.removed = true;
        let removed = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(&self.path)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !removed {
            warn!(path = %self.path.display(), "git worktree remove failed, deleting directly");
            let _ = std::fs::remove_dir_all(&self.path);
            let _ = Command::new("git")
                .args(["worktree", "prune"])
                .current_dir(&self.repo_root)
                .output()
                .await;
        }
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let _ = std::fs::remove_dir_all(&self.path);
        let _ = std::process::Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_root)
            .output();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn git(dir: &Path, args: &[&str], envs: &[(&str, &str)]) {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        let output = cmd.output().await.unwrap();
        assert!(
            output.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    async fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"], &[]).await;
        git(dir, &["config", "user.name", "Ada Lovelace"], &[]).await;
        git(dir, &["config", "user.email", "ada@example.com"], &[]).await;
        git(dir, &["config", "commit.gpgsign", "false"], &[]).await;
    }

    async fn commit_file(dir: &Path, name: &str, content: &str, message: &str, ts: i64) {
        std::fs::write(dir.join(name), content).unwrap();
        let date = format!("{ts} +0100");
        git(dir, &["add", "."], &[]).await;
        git(
            dir,
            &["commit", "-q", "-m", message],
            &[
                ("GIT_AUTHOR_DATE", date.as_str()),
                ("GIT_COMMITTER_DATE", date.as_str()),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn open_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitRepo::open(dir.path()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BossError>(),
            Some(BossError::NotARepository(_))
        ));
    }

    #[tokio::test]
    async fn commit_meta_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;
        commit_file(dir.path(), "b.txt", "two", "second", 1_700_000_100).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        let meta = repo.commit_meta("HEAD").await.unwrap();
        assert_eq!(meta.author_name, "Ada Lovelace");
        assert_eq!(meta.author_email, "ada@example.com");
        assert_eq!(meta.author_date.timestamp, 1_700_000_100);
        assert_eq!(meta.author_date.timezone, "+0100");
        assert_eq!(meta.committer_date.timestamp, 1_700_000_100);
        assert_eq!(meta.parents.len(), 1);
        assert_eq!(meta.author_string(), "Ada Lovelace <ada@example.com>");

        let root_meta = repo.commit_meta("HEAD~1").await.unwrap();
        assert!(root_meta.parents.is_empty());
        assert_eq!(root_meta.first_parent(), None);
        assert_eq!(meta.first_parent(), Some(root_meta.id.as_str()));
    }

    #[tokio::test]
    async fn current_branch_and_detached() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        assert!(repo.current_branch().await.unwrap().is_some());

        let head = repo.head().await.unwrap();
        git(dir.path(), &["checkout", "-q", "--detach", &head], &[]).await;
        assert_eq!(repo.current_branch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rev_parse_and_ancestry() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;
        commit_file(dir.path(), "b.txt", "two", "second", 1_700_000_100).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        assert!(repo.rev_parse("HEAD").await.unwrap().is_some());
        assert_eq!(repo.rev_parse("no-such-ref").await.unwrap(), None);

        let head = repo.head().await.unwrap();
        let parent = repo.rev_parse("HEAD~1").await.unwrap().unwrap();
        assert!(repo.is_ancestor(&parent, &head).await.unwrap());
        assert!(repo.is_ancestor(&head, &head).await.unwrap());
        assert!(!repo.is_ancestor(&head, &parent).await.unwrap());
    }

    #[tokio::test]
    async fn commits_in_is_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;
        commit_file(dir.path(), "b.txt", "two", "second", 1_700_000_100).await;
        commit_file(dir.path(), "c.txt", "three", "third", 1_700_000_200).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        let all = repo.commits_in("HEAD").await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].parents.is_empty());
        assert_eq!(all[1].first_parent(), Some(all[0].id.as_str()));
        assert_eq!(all[2].first_parent(), Some(all[1].id.as_str()));

        let between = repo
            .commits_in(&format!("{}..{}", all[0].id, all[2].id))
            .await
            .unwrap();
        assert_eq!(between.len(), 2);
        assert_eq!(between[0].id, all[1].id);
    }

    #[tokio::test]
    async fn amend_rewrites_message_and_preserves_identity() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;
        commit_file(dir.path(), "b.txt", "two", "second", 1_700_000_100).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        let before = repo.commit_meta("HEAD").await.unwrap();

        let new_id = repo
            .amend_message(repo.root(), "minted message", &before.author_date)
            .await
            .unwrap();
        assert_ne!(new_id, before.id);

        let after = repo.commit_meta("HEAD").await.unwrap();
        assert_eq!(after.id, new_id);
        assert_eq!(after.tree, before.tree);
        assert_eq!(after.parents, before.parents);
        assert_eq!(after.identity(), before.identity());
        assert_eq!(after.committer_date, before.author_date);

        let message = repo
            .git_ok(repo.root(), &["log", "-1", "--format=%B"], &[])
            .await
            .unwrap();
        assert_eq!(message.trim(), "minted message");
    }

    #[tokio::test]
    async fn worktree_amend_leaves_branch_alone() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;
        commit_file(dir.path(), "b.txt", "two", "second", 1_700_000_100).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        let head_before = repo.head().await.unwrap();
        let target = repo.commit_meta("HEAD~1").await.unwrap();

        let wt = repo.add_worktree(&target.id).await.unwrap();
        let wt_path = wt.path().to_path_buf();
        assert!(wt_path.is_dir());

        let new_id = repo
            .amend_message(wt.path(), "isolated rewrite", &target.author_date)
            .await
            .unwrap();
        wt.remove().await;

        assert!(!wt_path.exists());
        assert_ne!(new_id, target.id);
        assert_eq!(repo.head().await.unwrap(), head_before);
    }

    #[tokio::test]
    async fn worktree_drop_is_best_effort_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        let head = repo.head().await.unwrap();
        let wt = repo.add_worktree(&head).await.unwrap();
        let wt_path = wt.path().to_path_buf();
        drop(wt);
        assert!(!wt_path.exists());
    }

    #[tokio::test]
    async fn cherry_pick_replays_and_conflicts_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "one", "first", 1_700_000_000).await;
        commit_file(dir.path(), "b.txt", "two", "second", 1_700_000_100).await;

        let repo = GitRepo::open(dir.path()).await.unwrap();
        let second = repo.commit_meta("HEAD").await.unwrap();

        // Replay "second" onto the root again, preserving its committer date.
        repo.reset_hard("HEAD~1").await.unwrap();
        repo.cherry_pick(&second.id, Some(&second.committer_date))
            .await
            .unwrap();
        let replayed = repo.commit_meta("HEAD").await.unwrap();
        assert_eq!(replayed.tree, second.tree);
        assert_eq!(replayed.committer_date, second.committer_date);

        // Now make the same pick conflict: diverge a.txt and replay a commit
        // that edits it from the other line of history.
        commit_file(dir.path(), "a.txt", "theirs", "edit a", 1_700_000_200).await;
        let conflicting = repo.commit_meta("HEAD").await.unwrap();
        repo.reset_hard("HEAD~1").await.unwrap();
        std::fs::write(dir.path().join("a.txt"), "ours").unwrap();
        git(dir.path(), &["add", "."], &[]).await;
        git(dir.path(), &["commit", "-q", "-m", "diverge"], &[]).await;

        let err = repo.cherry_pick(&conflicting.id, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BossError>(),
            Some(BossError::ReplayConflict(_))
        ));
    }

    #[test]
    fn git_date_raw_round_trip() {
        let date = GitDate::parse_raw("1700000000 +0530").unwrap();
        assert_eq!(date.timestamp, 1_700_000_000);
        assert_eq!(date.timezone, "+0530");
        assert_eq!(date.raw(), "1700000000 +0530");
        assert!(GitDate::parse_raw("1700000000").is_err());
    }
}
