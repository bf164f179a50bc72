//! Snapshot comparison.
//!
//! Records are matched across snapshots by FormID; per-record identity is the
//! `data_hash` over the uncompressed subrecord stream, so records that only
//! changed their on-disk compression compare equal. Matching records with
//! differing hashes get a field-level delta over their decoded fields.
//!
//! The two sides may live in different database files, which is how
//! production and public-test builds are compared.

use std::collections::HashMap;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::store::{RecordSummary, Store};

/// An added or removed record.
#[derive(Debug, Clone, Serialize)]
pub struct DiffRecord {
    pub form_id: u32,
    pub record_type: String,
    pub editor_id: Option<String>,
    pub full_name: Option<String>,
    pub data_hash: String,
}

impl DiffRecord {
    fn from_summary(s: &RecordSummary) -> Self {
        DiffRecord {
            form_id: s.form_id,
            record_type: s.record_type.clone(),
            editor_id: s.editor_id.clone(),
            full_name: s.full_name.clone(),
            data_hash: s.data_hash.clone(),
        }
    }

    pub fn form_id_hex(&self) -> String {
        format!("0x{:08X}", self.form_id)
    }
}

/// One field's delta within a modified record. A field present on only one
/// side has `None` on the other.
#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub name: String,
    pub kind: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// A record present on both sides with differing content.
#[derive(Debug, Clone, Serialize)]
pub struct ModifiedRecord {
    pub form_id: u32,
    pub record_type: String,
    pub editor_id: Option<String>,
    pub full_name: Option<String>,
    pub old_hash: String,
    pub new_hash: String,
    pub fields: Vec<FieldChange>,
}

impl ModifiedRecord {
    pub fn form_id_hex(&self) -> String {
        format!("0x{:08X}", self.form_id)
    }
}

/// The full structured diff, each bucket sorted by FormID ascending.
#[derive(Debug, Default, Serialize)]
pub struct DiffReport {
    pub old_snapshot_id: i64,
    pub new_snapshot_id: i64,
    /// Both snapshots were taken from byte-identical master files; the diff
    /// short-circuited to empty.
    pub identical_sources: bool,
    pub added: Vec<DiffRecord>,
    pub removed: Vec<DiffRecord>,
    pub modified: Vec<ModifiedRecord>,
}

impl DiffReport {
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }
}

/// Compares two snapshots, possibly across database files.
pub struct DiffEngine<'a> {
    old_store: &'a Store,
    new_store: &'a Store,
}

impl<'a> DiffEngine<'a> {
    /// Both sides in one database.
    pub fn new(store: &'a Store) -> Self {
        DiffEngine {
            old_store: store,
            new_store: store,
        }
    }

    /// Old and new sides in separate databases.
    pub fn cross(old_store: &'a Store, new_store: &'a Store) -> Self {
        DiffEngine {
            old_store,
            new_store,
        }
    }

    /// Compute the added/removed/modified sets, with field-level deltas for
    /// modified records.
    pub async fn compare(
        &self,
        old_id: i64,
        new_id: i64,
        type_filter: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<DiffReport> {
        let old_snap = self
            .old_store
            .get_snapshot(old_id)
            .await?
            .ok_or(Error::SnapshotNotFound(old_id))?;
        let new_snap = self
            .new_store
            .get_snapshot(new_id)
            .await?
            .ok_or(Error::SnapshotNotFound(new_id))?;

        let mut report = DiffReport {
            old_snapshot_id: old_id,
            new_snapshot_id: new_id,
            ..DiffReport::default()
        };

        // Same source bytes, same parse: skip the row scan entirely.
        if old_snap.esm_sha256 == new_snap.esm_sha256 {
            report.identical_sources = true;
            return Ok(report);
        }

        let old = self.old_store.record_summaries(old_id, type_filter).await?;
        let new = self.new_store.record_summaries(new_id, type_filter).await?;

        for (form_id, summary) in &new {
            if !old.contains_key(form_id) {
                report.added.push(DiffRecord::from_summary(summary));
            }
        }
        for (form_id, summary) in &old {
            if !new.contains_key(form_id) {
                report.removed.push(DiffRecord::from_summary(summary));
            }
        }

        let mut shared: Vec<u32> = old.keys().filter(|k| new.contains_key(*k)).copied().collect();
        shared.sort_unstable();

        for (i, form_id) in shared.iter().enumerate() {
            // Field loads dominate the cost; stay responsive to cancellation.
            if i % 256 == 0 && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let old_summary = &old[form_id];
            let new_summary = &new[form_id];
            if old_summary.data_hash == new_summary.data_hash {
                continue;
            }

            let fields = self.diff_fields(old_id, new_id, *form_id).await?;
            report.modified.push(ModifiedRecord {
                form_id: *form_id,
                record_type: new_summary.record_type.clone(),
                editor_id: new_summary
                    .editor_id
                    .clone()
                    .or_else(|| old_summary.editor_id.clone()),
                full_name: new_summary
                    .full_name
                    .clone()
                    .or_else(|| old_summary.full_name.clone()),
                old_hash: old_summary.data_hash.clone(),
                new_hash: new_summary.data_hash.clone(),
                fields,
            });
        }

        report.added.sort_unstable_by_key(|r| r.form_id);
        report.removed.sort_unstable_by_key(|r| r.form_id);
        report.modified.sort_unstable_by_key(|r| r.form_id);
        Ok(report)
    }

    /// Field-level delta for one record. Fields are compared as stored
    /// `(kind, value)` text pairs; the float canonicalization performed at
    /// decode time makes this bit-exact for floats.
    async fn diff_fields(&self, old_id: i64, new_id: i64, form_id: u32) -> Result<Vec<FieldChange>> {
        let old_fields: HashMap<String, (String, String)> = self
            .old_store
            .decoded_fields(old_id, form_id)
            .await?
            .into_iter()
            .map(|f| (f.name, (f.kind, f.value)))
            .collect();
        let new_fields: HashMap<String, (String, String)> = self
            .new_store
            .decoded_fields(new_id, form_id)
            .await?
            .into_iter()
            .map(|f| (f.name, (f.kind, f.value)))
            .collect();

        let mut names: Vec<&String> = old_fields.keys().chain(new_fields.keys()).collect();
        names.sort_unstable();
        names.dedup();

        let mut changes = Vec::new();
        for name in names {
            let old_pair = old_fields.get(name);
            let new_pair = new_fields.get(name);
            if old_pair == new_pair {
                continue;
            }
            let kind = new_pair
                .or(old_pair)
                .map(|(k, _)| k.clone())
                .unwrap_or_else(|| "str".into());
            changes.push(FieldChange {
                name: name.clone(),
                kind,
                old: old_pair.map(|(_, v)| v.clone()),
                new: new_pair.map(|(_, v)| v.clone()),
            });
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldRow, RecordRow};

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("diff.db")).await.unwrap();
        (dir, store)
    }

    fn weap(form_id: u32, hash: &str) -> RecordRow {
        RecordRow {
            form_id,
            record_type: "WEAP".into(),
            editor_id: Some(format!("Weap{:X}", form_id)),
            full_name: None,
            data_hash: hash.into(),
            flags: 0,
            data_size: 0,
        }
    }

    fn damage(form_id: u32, value: &str) -> FieldRow {
        FieldRow {
            form_id,
            name: "damage".into(),
            value: value.into(),
            kind: "float".into(),
        }
    }

    async fn snapshot(store: &Store, label: &str, esm_hash: &str, records: &[RecordRow], fields: &[FieldRow]) -> i64 {
        let id = store.begin_snapshot(label, esm_hash, 0).await.unwrap();
        store.insert_records(id, records).await.unwrap();
        store.insert_fields(id, fields).await.unwrap();
        store
            .commit_snapshot(id, records.len() as u64, 0)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_diff_of_snapshot_with_itself_is_empty() {
        let (_dir, store) = temp_store().await;
        let id = snapshot(&store, "a", "esm1", &[weap(1, "h")], &[damage(1, "50")]).await;

        let report = DiffEngine::new(&store)
            .compare(id, id, None, &CancelToken::new())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(report.identical_sources);
    }

    #[tokio::test]
    async fn test_equal_esm_hash_short_circuits() {
        let (_dir, store) = temp_store().await;
        // Different row contents but identical source hash: the short-circuit
        // wins before rows are ever compared.
        let a = snapshot(&store, "a", "same", &[weap(1, "h1")], &[]).await;
        let b = snapshot(&store, "b", "same", &[weap(2, "h2")], &[]).await;

        let report = DiffEngine::new(&store)
            .compare(a, b, None, &CancelToken::new())
            .await
            .unwrap();
        assert!(report.identical_sources);
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_added_and_removed_buckets() {
        let (_dir, store) = temp_store().await;
        let a = snapshot(&store, "a", "esm1", &[weap(1, "h1"), weap(2, "h2")], &[]).await;
        let b = snapshot(&store, "b", "esm2", &[weap(2, "h2"), weap(3, "h3")], &[]).await;

        let report = DiffEngine::new(&store)
            .compare(a, b, None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].form_id, 3);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].form_id, 1);
        assert!(report.modified.is_empty());
    }

    #[tokio::test]
    async fn test_modified_record_field_delta() {
        let (_dir, store) = temp_store().await;
        let a = snapshot(&store, "a", "esm1", &[weap(1, "h1")], &[damage(1, "50")]).await;
        let b = snapshot(&store, "b", "esm2", &[weap(1, "h2")], &[damage(1, "65")]).await;

        let report = DiffEngine::new(&store)
            .compare(a, b, None, &CancelToken::new())
            .await
            .unwrap();
        assert!(report.added.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.modified.len(), 1);

        let modified = &report.modified[0];
        assert_eq!(modified.form_id, 1);
        assert_eq!(modified.fields.len(), 1);
        let change = &modified.fields[0];
        assert_eq!(change.name, "damage");
        assert_eq!(change.old.as_deref(), Some("50"));
        assert_eq!(change.new.as_deref(), Some("65"));
    }

    #[tokio::test]
    async fn test_identical_hash_skips_field_loads() {
        let (_dir, store) = temp_store().await;
        let a = snapshot(&store, "a", "esm1", &[weap(1, "same")], &[damage(1, "50")]).await;
        let b = snapshot(&store, "b", "esm2", &[weap(1, "same")], &[damage(1, "50")]).await;

        let report = DiffEngine::new(&store)
            .compare(a, b, None, &CancelToken::new())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(!report.identical_sources);
    }

    #[tokio::test]
    async fn test_one_sided_fields_are_added_or_removed() {
        let (_dir, store) = temp_store().await;
        let a = snapshot(&store, "a", "esm1", &[weap(1, "h1")], &[damage(1, "50")]).await;
        let b = snapshot(
            &store,
            "b",
            "esm2",
            &[weap(1, "h2")],
            &[
                damage(1, "50"),
                FieldRow {
                    form_id: 1,
                    name: "speed".into(),
                    value: "1".into(),
                    kind: "float".into(),
                },
            ],
        )
        .await;

        let report = DiffEngine::new(&store)
            .compare(a, b, None, &CancelToken::new())
            .await
            .unwrap();
        let fields = &report.modified[0].fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "speed");
        assert_eq!(fields[0].old, None);
        assert_eq!(fields[0].new.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_type_filter() {
        let (_dir, store) = temp_store().await;
        let armo = RecordRow {
            record_type: "ARMO".into(),
            ..weap(9, "a1")
        };
        let armo2 = RecordRow {
            record_type: "ARMO".into(),
            ..weap(9, "a2")
        };
        let a = snapshot(&store, "a", "esm1", &[weap(1, "h1"), armo], &[]).await;
        let b = snapshot(&store, "b", "esm2", &[weap(1, "h2"), armo2], &[]).await;

        let report = DiffEngine::new(&store)
            .compare(a, b, Some("ARMO"), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.modified.len(), 1);
        assert_eq!(report.modified[0].form_id, 9);
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let (_dir, store) = temp_store().await;
        let err = DiffEngine::new(&store)
            .compare(41, 42, None, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound(41)));
    }
}
