//! The snapshot pipeline: parse a master file, decode fields, and commit the
//! result as one immutable snapshot.
//!
//! Rows are flushed to the store in batches so the full record set never sits
//! in memory as typed rows. Any failure (including cancellation) deletes the
//! partially written snapshot before the error propagates, so readers only
//! ever see complete snapshots.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::ba2::Ba2File;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::esm::{decode_record, resolve_full_name, EsmReader};
use crate::store::{FieldRow, RecordRow, Store, SubrecordRow};
use crate::strings::StringTable;

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub label: String,
    /// Language token for the localized string tables.
    pub language: String,
    /// Also persist every raw subrecord (full-fidelity mode).
    pub keep_subrecords: bool,
    /// Rows per insert transaction.
    pub batch_size: usize,
    /// Show a progress spinner on the terminal.
    pub progress: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        SnapshotOptions {
            label: "snapshot".into(),
            language: "en".into(),
            keep_subrecords: false,
            batch_size: 4096,
            progress: false,
        }
    }
}

#[derive(Debug)]
pub struct SnapshotOutcome {
    pub snapshot_id: i64,
    pub record_count: u64,
    pub string_count: u64,
    pub esm_sha256: String,
}

/// Load the localized string tables from the companion archive.
///
/// A missing or unreadable archive is not fatal: string ids simply stay
/// unresolved in the decoded fields.
pub fn load_strings(ba2_path: Option<&Path>, language: &str) -> StringTable {
    let mut table = StringTable::new();
    let Some(path) = ba2_path else {
        return table;
    };
    if !path.is_file() {
        warn!(path = %path.display(), "localization archive not found, names will be unresolved");
        return table;
    }
    match Ba2File::open(path) {
        Ok(mut ba2) => {
            if let Err(e) = table.load_from_ba2(&mut ba2, language) {
                warn!(error = %e, "failed to load string tables");
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open localization archive");
        }
    }
    table
}

/// Parse `esm_path` and commit the result as a new snapshot in `store`.
pub async fn take_snapshot(
    store: &Store,
    esm_path: &Path,
    ba2_path: Option<&Path>,
    options: &SnapshotOptions,
    cancel: &CancelToken,
) -> Result<SnapshotOutcome> {
    let reader = EsmReader::open(esm_path)?;
    let strings = load_strings(ba2_path, &options.language);
    info!(
        esm = %esm_path.display(),
        size = reader.file_size(),
        strings = strings.len(),
        "starting snapshot"
    );

    let snapshot_id = store
        .begin_snapshot(&options.label, reader.esm_sha256(), reader.file_size())
        .await?;

    match write_snapshot(store, snapshot_id, &reader, &strings, options, cancel).await {
        Ok(record_count) => {
            let string_entries: Vec<(u32, String)> = strings
                .iter()
                .map(|(id, text)| (id, text.to_string()))
                .collect();
            for chunk in string_entries.chunks(options.batch_size.max(1)) {
                store.insert_strings(snapshot_id, chunk).await?;
            }

            store
                .commit_snapshot(snapshot_id, record_count, strings.len() as u64)
                .await?;
            Ok(SnapshotOutcome {
                snapshot_id,
                record_count,
                string_count: strings.len() as u64,
                esm_sha256: reader.esm_sha256().to_string(),
            })
        }
        Err(e) => {
            // Roll back the partial snapshot; the cascade removes its rows.
            if let Err(cleanup) = store.delete_snapshot(snapshot_id).await {
                warn!(snapshot_id, error = %cleanup, "failed to roll back partial snapshot");
            }
            Err(e)
        }
    }
}

async fn write_snapshot(
    store: &Store,
    snapshot_id: i64,
    reader: &EsmReader,
    strings: &StringTable,
    options: &SnapshotOptions,
    cancel: &CancelToken,
) -> Result<u64> {
    let bar = if options.progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {pos} records {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(bar)
    } else {
        None
    };

    let mut record_batch: Vec<RecordRow> = Vec::with_capacity(options.batch_size);
    let mut field_batch: Vec<FieldRow> = Vec::new();
    let mut subrecord_batch: Vec<SubrecordRow> = Vec::new();
    let mut keyword_batch: Vec<(u32, String)> = Vec::new();
    let mut record_count = 0u64;

    for record in reader.records(cancel.clone()) {
        let record = record?;
        let editor_id = record.editor_id();

        if record.kind == "KYWD" {
            if let Some(edid) = &editor_id {
                keyword_batch.push((record.form_id, edid.clone()));
            }
        }

        for field in decode_record(&record, strings) {
            field_batch.push(FieldRow {
                form_id: record.form_id,
                name: field.name,
                value: field.value.to_string(),
                kind: field.value.kind().to_string(),
            });
        }

        if options.keep_subrecords {
            for (i, sub) in record.subrecords.iter().enumerate() {
                subrecord_batch.push(SubrecordRow {
                    form_id: record.form_id,
                    sub_type: sub.tag.clone(),
                    sub_index: i as u32,
                    data: sub.data.clone(),
                });
            }
        }

        record_batch.push(RecordRow {
            form_id: record.form_id,
            record_type: record.kind.clone(),
            editor_id,
            full_name: resolve_full_name(&record, strings),
            data_hash: record.data_hash(),
            flags: record.flags,
            data_size: record.data.len() as u32,
        });
        record_count += 1;

        if record_batch.len() >= options.batch_size {
            if cancel.is_cancelled() {
                return Err(crate::error::Error::Cancelled);
            }
            flush(
                store,
                snapshot_id,
                &mut record_batch,
                &mut field_batch,
                &mut subrecord_batch,
                &mut keyword_batch,
            )
            .await?;
            if let Some(bar) = &bar {
                bar.set_position(record_count);
            }
        }
    }

    flush(
        store,
        snapshot_id,
        &mut record_batch,
        &mut field_batch,
        &mut subrecord_batch,
        &mut keyword_batch,
    )
    .await?;

    if let Some(bar) = &bar {
        bar.finish_with_message(format!("{} records", record_count));
    }
    Ok(record_count)
}

async fn flush(
    store: &Store,
    snapshot_id: i64,
    records: &mut Vec<RecordRow>,
    fields: &mut Vec<FieldRow>,
    subrecords: &mut Vec<SubrecordRow>,
    keywords: &mut Vec<(u32, String)>,
) -> Result<()> {
    if !records.is_empty() {
        store.insert_records(snapshot_id, records).await?;
        records.clear();
    }
    if !fields.is_empty() {
        store.insert_fields(snapshot_id, fields).await?;
        fields.clear();
    }
    if !subrecords.is_empty() {
        store.insert_subrecords(snapshot_id, subrecords).await?;
        subrecords.clear();
    }
    if !keywords.is_empty() {
        store.insert_keywords(snapshot_id, keywords).await?;
        keywords.clear();
    }
    Ok(())
}
