use std::path::{Path, PathBuf};

/// All well-known paths under `.bossify/`.
#[derive(Debug, Clone)]
pub struct BossPaths {
    pub root: PathBuf,
    pub boss_dir: PathBuf,
    pub db_file: PathBuf,
}

impl BossPaths {
    /// Derive all paths from a repo root. Pure computation, no I/O.
    pub fn discover(repo_root: impl Into<PathBuf>) -> Self {
        let root = repo_root.into();
        let boss_dir = root.join(".bossify");
        Self {
            db_file: boss_dir.join("bossify.db"),
            boss_dir,
            root,
        }
    }

    /// Create the `.bossify/` directory. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.boss_dir)?;
        Ok(())
    }

    /// Walk up from `start` looking for a directory containing `.git/`.
    /// Returns `None` if not found.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut cur = start.to_path_buf();
        loop {
            if cur.join(".git").exists() {
                return Some(cur);
            }
            if !cur.pop() {
                return None;
            }
        }
    }
}
