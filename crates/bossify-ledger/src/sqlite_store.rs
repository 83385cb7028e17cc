//! SQLite-backed storage for bossification records.
//!
//! One row per logical commit, keyed by the stable commit identity
//! (tree digest + author name + author email + author timestamp) so that a
//! record survives the hash-invalidating rewrites it exists to drive.

use bossify_core::{Bossification, CommitIdentity};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS bossifications (
    tree_digest TEXT NOT NULL,
    author_name TEXT NOT NULL,
    author_email TEXT NOT NULL,
    author_timestamp INTEGER NOT NULL,
    template TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (tree_digest, author_name, author_email, author_timestamp)
);

CREATE INDEX IF NOT EXISTS idx_bossifications_recorded_at
    ON bossifications(recorded_at DESC);
";

/// SQLite-backed storage engine.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store with full schema.
    pub fn open_or_create(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.apply_pragmas()?;
        store.conn.execute_batch(SCHEMA_SQL)?;
        Ok(store)
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.conn.execute_batch(SCHEMA_SQL)?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Insert-or-replace keyed by identity: reprocessing a logical commit
    /// supersedes its stored template rather than accumulating history.
    /// Returns the stored record with its fresh `recorded_at`.
    pub fn upsert(
        &self,
        identity: &CommitIdentity,
        template: &str,
    ) -> anyhow::Result<Bossification> {
        let recorded_at = now_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO bossifications
             (tree_digest, author_name, author_email, author_timestamp, template, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.tree_digest,
                identity.author_name,
                identity.author_email,
                identity.author_timestamp,
                template,
                recorded_at,
            ],
        )?;
        debug!(tree = %identity.tree_digest, "recorded bossification");
        Ok(Bossification {
            identity: identity.clone(),
            template: template.to_string(),
            recorded_at,
        })
    }

    /// Find the record for a commit identity, if any.
    pub fn lookup(&self, identity: &CommitIdentity) -> anyhow::Result<Option<Bossification>> {
        let result = self
            .conn
            .query_row(
                "SELECT template, recorded_at FROM bossifications
                 WHERE tree_digest = ?1 AND author_name = ?2
                   AND author_email = ?3 AND author_timestamp = ?4",
                params![
                    identity.tree_digest,
                    identity.author_name,
                    identity.author_email,
                    identity.author_timestamp,
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(result.map(|(template, recorded_at)| Bossification {
            identity: identity.clone(),
            template,
            recorded_at,
        }))
    }

    /// All records, newest first.
    pub fn list_all(&self) -> anyhow::Result<Vec<Bossification>> {
        let mut stmt = self.conn.prepare(
            "SELECT tree_digest, author_name, author_email, author_timestamp,
                    template, recorded_at
             FROM bossifications
             ORDER BY recorded_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Bossification {
                identity: CommitIdentity {
                    tree_digest: row.get(0)?,
                    author_name: row.get(1)?,
                    author_email: row.get(2)?,
                    author_timestamp: row.get(3)?,
                },
                template: row.get(4)?,
                recorded_at: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("bossification query failed: {e}"))
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        // Merge WAL back into the main DB so users see a single file when idle.
        let _ = self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: i64) -> CommitIdentity {
        CommitIdentity {
            tree_digest: format!("{n:040x}"),
            author_name: "Ada".to_string(),
            author_email: "ada@example.com".to_string(),
            author_timestamp: 1_700_000_000 + n,
        }
    }

    fn tmp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_or_create(&dir.path().join("bossify.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn upsert_lookup_round_trip() {
        let (_dir, store) = tmp_store();
        let id = identity(1);
        store.upsert(&id, "{fix|Fix}: {typo|spelling}").unwrap();

        let found = store.lookup(&id).unwrap().unwrap();
        assert_eq!(found.template, "{fix|Fix}: {typo|spelling}");
        assert_eq!(found.identity, id);
    }

    #[test]
    fn lookup_missing_is_none() {
        let (_dir, store) = tmp_store();
        assert!(store.lookup(&identity(9)).unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_on_same_identity() {
        let (_dir, store) = tmp_store();
        let id = identity(1);
        store.upsert(&id, "first {a|b}").unwrap();
        store.upsert(&id, "second {c|d}").unwrap();

        assert_eq!(store.list_all().unwrap().len(), 1);
        let found = store.lookup(&id).unwrap().unwrap();
        assert_eq!(found.template, "second {c|d}");
    }

    #[test]
    fn identity_fields_all_participate_in_key() {
        let (_dir, store) = tmp_store();
        let base = identity(1);
        store.upsert(&base, "base").unwrap();

        let mut other_tree = base.clone();
        other_tree.tree_digest = "f".repeat(40);
        store.upsert(&other_tree, "tree").unwrap();

        let mut other_ts = base.clone();
        other_ts.author_timestamp += 1;
        store.upsert(&other_ts, "ts").unwrap();

        assert_eq!(store.list_all().unwrap().len(), 3);
        assert_eq!(store.lookup(&base).unwrap().unwrap().template, "base");
    }

    #[test]
    fn list_all_newest_first() {
        let (_dir, store) = tmp_store();
        for n in 0..5 {
            store.upsert(&identity(n), &format!("template {n}")).unwrap();
        }
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 5);
        // Same-second inserts fall back to rowid order, newest first.
        assert_eq!(all[0].template, "template 4");
        assert_eq!(all[4].template, "template 0");
    }

    #[test]
    fn reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("bossify.db");
        {
            let store = SqliteStore::open_or_create(&db).unwrap();
            store.upsert(&identity(1), "persisted").unwrap();
        }
        let store = SqliteStore::open_or_create(&db).unwrap();
        assert_eq!(store.lookup(&identity(1)).unwrap().unwrap().template, "persisted");
    }

    #[test]
    fn wal_checkpoint_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("bossify.db");
        {
            let store = SqliteStore::open_or_create(&db).unwrap();
            store.upsert(&identity(1), "wal test").unwrap();
        }
        assert!(db.exists());
        let wal = dir.path().join("bossify.db-wal");
        if wal.exists() {
            assert_eq!(std::fs::metadata(&wal).unwrap().len(), 0);
        }
    }

    #[test]
    fn recorded_at_is_rfc3339() {
        let (_dir, store) = tmp_store();
        let record = store.upsert(&identity(1), "x").unwrap();
        assert!(
            time::OffsetDateTime::parse(
                &record.recorded_at,
                &time::format_description::well_known::Rfc3339
            )
            .is_ok(),
            "bad timestamp: {}",
            record.recorded_at
        );
    }
}
