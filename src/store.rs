//! SQLite-backed snapshot store.
//!
//! Each parse of a master file commits one immutable snapshot: its records,
//! decoded fields, localized strings, and keyword names, all keyed by
//! `(snapshot_id, form_id)`. WAL journal mode keeps readers concurrent with
//! the single writer. Deleting a snapshot cascades to every dependent row.
//!
//! Writers batch rows inside explicit transactions; a failed or cancelled
//! snapshot is rolled back by deleting the snapshot row, which cascades.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{Error, Result};

/// Bump when the schema changes shape. Databases written by a newer version
/// are rejected with [`Error::SchemaMismatch`] instead of being misread.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS snapshots (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        label        TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        esm_sha256   TEXT NOT NULL,
        esm_size     INTEGER NOT NULL,
        record_count INTEGER NOT NULL DEFAULT 0,
        string_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS records (
        snapshot_id  INTEGER NOT NULL,
        form_id      INTEGER NOT NULL,
        record_type  TEXT NOT NULL,
        editor_id    TEXT,
        full_name    TEXT,
        data_hash    TEXT NOT NULL,
        flags        INTEGER NOT NULL DEFAULT 0,
        data_size    INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (snapshot_id, form_id),
        FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_records_type ON records(snapshot_id, record_type)",
    "CREATE INDEX IF NOT EXISTS idx_records_editor_id ON records(snapshot_id, editor_id)",
    "CREATE INDEX IF NOT EXISTS idx_records_full_name ON records(snapshot_id, full_name)",
    "CREATE TABLE IF NOT EXISTS decoded_fields (
        snapshot_id  INTEGER NOT NULL,
        form_id      INTEGER NOT NULL,
        field_name   TEXT NOT NULL,
        field_value  TEXT NOT NULL,
        field_kind   TEXT NOT NULL DEFAULT 'str',
        PRIMARY KEY (snapshot_id, form_id, field_name),
        FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS strings (
        snapshot_id  INTEGER NOT NULL,
        string_id    INTEGER NOT NULL,
        text         TEXT NOT NULL,
        PRIMARY KEY (snapshot_id, string_id),
        FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS keywords (
        snapshot_id  INTEGER NOT NULL,
        form_id      INTEGER NOT NULL,
        editor_id    TEXT NOT NULL,
        PRIMARY KEY (snapshot_id, form_id),
        FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS subrecords (
        snapshot_id  INTEGER NOT NULL,
        form_id      INTEGER NOT NULL,
        sub_type     TEXT NOT NULL,
        sub_index    INTEGER NOT NULL,
        data         BLOB NOT NULL,
        FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_subrecords_formid ON subrecords(snapshot_id, form_id)",
    "CREATE TABLE IF NOT EXISTS diffs (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        old_snapshot_id INTEGER NOT NULL,
        new_snapshot_id INTEGER NOT NULL,
        created_at      TEXT NOT NULL,
        added_count     INTEGER NOT NULL DEFAULT 0,
        removed_count   INTEGER NOT NULL DEFAULT 0,
        modified_count  INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS diff_entries (
        diff_id      INTEGER NOT NULL,
        form_id      INTEGER NOT NULL,
        change_type  TEXT NOT NULL,
        record_type  TEXT,
        editor_id    TEXT,
        full_name    TEXT,
        old_hash     TEXT,
        new_hash     TEXT,
        FOREIGN KEY (diff_id) REFERENCES diffs(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_diff_entries_diff ON diff_entries(diff_id)",
];

/// Snapshot metadata row.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: i64,
    pub label: String,
    pub created_at: String,
    pub esm_sha256: String,
    pub esm_size: i64,
    pub record_count: i64,
    pub string_count: i64,
}

/// A persisted record row.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub form_id: u32,
    pub record_type: String,
    pub editor_id: Option<String>,
    pub full_name: Option<String>,
    pub data_hash: String,
    pub flags: u32,
    pub data_size: u32,
}

/// A persisted decoded field row.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub form_id: u32,
    pub name: String,
    pub value: String,
    pub kind: String,
}

/// A persisted raw subrecord row (full-fidelity mode only).
#[derive(Debug, Clone)]
pub struct SubrecordRow {
    pub form_id: u32,
    pub sub_type: String,
    pub sub_index: u32,
    pub data: Vec<u8>,
}

/// The per-record columns the diff engine works from.
#[derive(Debug, Clone)]
pub struct RecordSummary {
    pub form_id: u32,
    pub record_type: String,
    pub editor_id: Option<String>,
    pub full_name: Option<String>,
    pub data_hash: String,
}

/// A decoded field as stored: `(kind, value)` text pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredField {
    pub name: String,
    pub value: String,
    pub kind: String,
}

/// One row of a persisted diff.
#[derive(Debug, Clone)]
pub struct DiffEntryRow {
    pub form_id: u32,
    /// "added", "removed", or "modified"
    pub change_type: String,
    pub record_type: Option<String>,
    pub editor_id: Option<String>,
    pub full_name: Option<String>,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Snapshot {
    Snapshot {
        id: row.get("id"),
        label: row.get("label"),
        created_at: row.get("created_at"),
        esm_sha256: row.get("esm_sha256"),
        esm_size: row.get("esm_size"),
        record_count: row.get("record_count"),
        string_count: row.get("string_count"),
    }
}

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> RecordSummary {
    let form_id: i64 = row.get("form_id");
    RecordSummary {
        form_id: form_id as u32,
        record_type: row.get("record_type"),
        editor_id: row.get("editor_id"),
        full_name: row.get("full_name"),
        data_hash: row.get("data_hash"),
    }
}

fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Database access layer for one snapshot database file.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Store {
    /// Derive the database path from the master file path: two directory
    /// levels up, under a fixed subdirectory. Two independent masters get two
    /// independent databases.
    pub fn derive_db_path(esm_path: &Path) -> PathBuf {
        let base = esm_path
            .parent()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("unesm").join("db").join("unesm.db")
    }

    /// Open (creating if missing) a snapshot database in WAL mode and run
    /// idempotent migrations. Rejects databases written by a newer schema.
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&pool).await?;
        }

        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await?;
        match version {
            None => {
                sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                    .bind(SCHEMA_VERSION)
                    .execute(&pool)
                    .await?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(Error::SchemaMismatch {
                    supported: SCHEMA_VERSION,
                    found: v,
                });
            }
            Some(_) => {}
        }

        Ok(Store { pool, db_path })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn db_size(&self) -> u64 {
        std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
    }

    // -- Snapshot lifecycle --

    /// Insert snapshot metadata and return the new id. Counts are zero until
    /// [`Store::commit_snapshot`].
    pub async fn begin_snapshot(
        &self,
        label: &str,
        esm_sha256: &str,
        esm_size: u64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO snapshots (label, created_at, esm_sha256, esm_size) VALUES (?, ?, ?, ?)",
        )
        .bind(label)
        .bind(now_utc())
        .bind(esm_sha256)
        .bind(esm_size as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Finalize a snapshot's counts. After this the snapshot is immutable.
    pub async fn commit_snapshot(
        &self,
        snapshot_id: i64,
        record_count: u64,
        string_count: u64,
    ) -> Result<()> {
        sqlx::query("UPDATE snapshots SET record_count = ?, string_count = ? WHERE id = ?")
            .bind(record_count as i64)
            .bind(string_count as i64)
            .bind(snapshot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a snapshot and, via cascade, everything it owns. Used both for
    /// retention and for rolling back a failed parse.
    pub async fn delete_snapshot(&self, snapshot_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM snapshots WHERE id = ?")
            .bind(snapshot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Batch inserts --

    pub async fn insert_records(&self, snapshot_id: i64, rows: &[RecordRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT OR REPLACE INTO records
                 (snapshot_id, form_id, record_type, editor_id, full_name, data_hash, flags, data_size)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(row.form_id as i64)
            .bind(&row.record_type)
            .bind(&row.editor_id)
            .bind(&row.full_name)
            .bind(&row.data_hash)
            .bind(row.flags as i64)
            .bind(row.data_size as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_fields(&self, snapshot_id: i64, rows: &[FieldRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT OR REPLACE INTO decoded_fields
                 (snapshot_id, form_id, field_name, field_value, field_kind)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(row.form_id as i64)
            .bind(&row.name)
            .bind(&row.value)
            .bind(&row.kind)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_strings(&self, snapshot_id: i64, entries: &[(u32, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (id, text) in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO strings (snapshot_id, string_id, text) VALUES (?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(*id as i64)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_keywords(&self, snapshot_id: i64, entries: &[(u32, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (form_id, editor_id) in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO keywords (snapshot_id, form_id, editor_id) VALUES (?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(*form_id as i64)
            .bind(editor_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_subrecords(&self, snapshot_id: i64, rows: &[SubrecordRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO subrecords (snapshot_id, form_id, sub_type, sub_index, data)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(row.form_id as i64)
            .bind(&row.sub_type)
            .bind(row.sub_index as i64)
            .bind(&row.data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // -- Snapshot queries --

    pub async fn get_snapshot(&self, snapshot_id: i64) -> Result<Option<Snapshot>> {
        let row = sqlx::query("SELECT * FROM snapshots WHERE id = ?")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_snapshot))
    }

    pub async fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let row = sqlx::query("SELECT * FROM snapshots ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_snapshot))
    }

    /// The two most recent snapshots as `(older, newer)`.
    pub async fn two_latest(&self) -> Result<Option<(Snapshot, Snapshot)>> {
        let rows = sqlx::query("SELECT * FROM snapshots ORDER BY id DESC LIMIT 2")
            .fetch_all(&self.pool)
            .await?;
        if rows.len() < 2 {
            return Ok(None);
        }
        Ok(Some((row_to_snapshot(&rows[1]), row_to_snapshot(&rows[0]))))
    }

    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query("SELECT * FROM snapshots ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    // -- Record queries --

    /// `form_id -> summary` for an entire snapshot, optionally filtered by
    /// record type. This is the working set of the diff engine.
    pub async fn record_summaries(
        &self,
        snapshot_id: i64,
        type_filter: Option<&str>,
    ) -> Result<HashMap<u32, RecordSummary>> {
        let rows = match type_filter {
            Some(kind) => {
                sqlx::query(
                    "SELECT form_id, record_type, editor_id, full_name, data_hash
                     FROM records WHERE snapshot_id = ? AND record_type = ?",
                )
                .bind(snapshot_id)
                .bind(kind)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT form_id, record_type, editor_id, full_name, data_hash
                     FROM records WHERE snapshot_id = ?",
                )
                .bind(snapshot_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .iter()
            .map(row_to_summary)
            .map(|s| (s.form_id, s))
            .collect())
    }

    pub async fn get_record(
        &self,
        snapshot_id: i64,
        form_id: u32,
    ) -> Result<Option<RecordSummary>> {
        let row = sqlx::query(
            "SELECT form_id, record_type, editor_id, full_name, data_hash
             FROM records WHERE snapshot_id = ? AND form_id = ?",
        )
        .bind(snapshot_id)
        .bind(form_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_summary))
    }

    pub async fn records_by_type(
        &self,
        snapshot_id: i64,
        record_type: &str,
    ) -> Result<Vec<RecordSummary>> {
        let rows = sqlx::query(
            "SELECT form_id, record_type, editor_id, full_name, data_hash
             FROM records WHERE snapshot_id = ? AND record_type = ? ORDER BY form_id",
        )
        .bind(snapshot_id)
        .bind(record_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_summary).collect())
    }

    pub async fn decoded_fields(&self, snapshot_id: i64, form_id: u32) -> Result<Vec<StoredField>> {
        let rows = sqlx::query(
            "SELECT field_name, field_value, field_kind
             FROM decoded_fields WHERE snapshot_id = ? AND form_id = ? ORDER BY field_name",
        )
        .bind(snapshot_id)
        .bind(form_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| StoredField {
                name: row.get("field_name"),
                value: row.get("field_value"),
                kind: row.get("field_kind"),
            })
            .collect())
    }

    pub async fn type_counts(&self, snapshot_id: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT record_type, COUNT(*) AS n FROM records WHERE snapshot_id = ?
             GROUP BY record_type ORDER BY n DESC",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("record_type"), row.get("n")))
            .collect())
    }

    pub async fn search_strings(
        &self,
        snapshot_id: i64,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(u32, String)>> {
        let rows = sqlx::query(
            "SELECT string_id, text FROM strings
             WHERE snapshot_id = ? AND text LIKE ? LIMIT ?",
        )
        .bind(snapshot_id)
        .bind(format!("%{}%", query))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("string_id");
                (id as u32, row.get("text"))
            })
            .collect())
    }

    pub async fn keyword_name(&self, snapshot_id: i64, form_id: u32) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT editor_id FROM keywords WHERE snapshot_id = ? AND form_id = ?",
        )
        .bind(snapshot_id)
        .bind(form_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("editor_id")))
    }

    // -- Diff persistence --

    /// Record a computed diff's headline numbers and per-record entries.
    pub async fn save_diff(
        &self,
        old_snapshot_id: i64,
        new_snapshot_id: i64,
        entries: &[DiffEntryRow],
    ) -> Result<i64> {
        let count_of = |change: &str| {
            entries.iter().filter(|e| e.change_type == change).count() as i64
        };

        let mut tx = self.pool.begin().await?;
        let diff_id = sqlx::query(
            "INSERT INTO diffs
             (old_snapshot_id, new_snapshot_id, created_at, added_count, removed_count, modified_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(old_snapshot_id)
        .bind(new_snapshot_id)
        .bind(now_utc())
        .bind(count_of("added"))
        .bind(count_of("removed"))
        .bind(count_of("modified"))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for entry in entries {
            sqlx::query(
                "INSERT INTO diff_entries
                 (diff_id, form_id, change_type, record_type, editor_id, full_name, old_hash, new_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(diff_id)
            .bind(entry.form_id as i64)
            .bind(&entry.change_type)
            .bind(&entry.record_type)
            .bind(&entry.editor_id)
            .bind(&entry.full_name)
            .bind(&entry.old_hash)
            .bind(&entry.new_hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(diff_id)
    }

    // -- Retention --

    /// Delete all but the `keep` most recent snapshots. Returns how many were
    /// removed.
    pub async fn purge(&self, keep: i64) -> Result<usize> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM snapshots ORDER BY id DESC LIMIT -1 OFFSET ?",
        )
        .bind(keep)
        .fetch_all(&self.pool)
        .await?;

        for id in &ids {
            self.delete_snapshot(*id).await?;
        }
        if !ids.is_empty() {
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }
        Ok(ids.len())
    }

    /// Delete every snapshot. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            sqlx::query("DELETE FROM diff_entries").execute(&self.pool).await?;
            sqlx::query("DELETE FROM diffs").execute(&self.pool).await?;
            sqlx::query("DELETE FROM snapshots").execute(&self.pool).await?;
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    fn record_row(form_id: u32, hash: &str) -> RecordRow {
        RecordRow {
            form_id,
            record_type: "WEAP".into(),
            editor_id: Some(format!("Weap{:X}", form_id)),
            full_name: None,
            data_hash: hash.into(),
            flags: 0,
            data_size: 16,
        }
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let (_dir, store) = temp_store().await;

        let id = store.begin_snapshot("v1", "abc123", 1024).await.unwrap();
        store
            .insert_records(id, &[record_row(1, "h1"), record_row(2, "h2")])
            .await
            .unwrap();
        store.commit_snapshot(id, 2, 0).await.unwrap();

        let snap = store.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snap.record_count, 2);
        assert_eq!(snap.esm_sha256, "abc123");

        let summaries = store.record_summaries(id, None).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[&1].data_hash, "h1");
    }

    #[tokio::test]
    async fn test_delete_snapshot_cascades() {
        let (_dir, store) = temp_store().await;

        let id = store.begin_snapshot("v1", "x", 0).await.unwrap();
        store.insert_records(id, &[record_row(1, "h")]).await.unwrap();
        store
            .insert_fields(
                id,
                &[FieldRow {
                    form_id: 1,
                    name: "damage".into(),
                    value: "50".into(),
                    kind: "float".into(),
                }],
            )
            .await
            .unwrap();

        store.delete_snapshot(id).await.unwrap();
        assert!(store.get_snapshot(id).await.unwrap().is_none());
        assert!(store.record_summaries(id, None).await.unwrap().is_empty());
        assert!(store.decoded_fields(id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_latest_order() {
        let (_dir, store) = temp_store().await;
        let a = store.begin_snapshot("old", "x", 0).await.unwrap();
        let b = store.begin_snapshot("new", "y", 0).await.unwrap();

        let (older, newer) = store.two_latest().await.unwrap().unwrap();
        assert_eq!(older.id, a);
        assert_eq!(newer.id, b);
    }

    #[tokio::test]
    async fn test_purge_keeps_most_recent() {
        let (_dir, store) = temp_store().await;
        for i in 0..5 {
            store
                .begin_snapshot(&format!("s{}", i), "x", 0)
                .await
                .unwrap();
        }
        let removed = store.purge(2).await.unwrap();
        assert_eq!(removed, 3);

        let left = store.list_snapshots().await.unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].label, "s3");
    }

    #[tokio::test]
    async fn test_schema_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        {
            let store = Store::open(&path).await.unwrap();
            sqlx::query("UPDATE schema_version SET version = ?")
                .bind(SCHEMA_VERSION + 1)
                .execute(store.pool())
                .await
                .unwrap();
        }
        let err = Store::open(&path).await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn test_derive_db_path_ascends_two_levels() {
        let path = Store::derive_db_path(Path::new("/games/fo76/Data/SeventySix.esm"));
        assert_eq!(
            path,
            Path::new("/games/fo76/unesm/db/unesm.db")
        );
    }
}
