//! Bulk export of a snapshot's records and decoded fields.

use std::collections::BTreeMap;
use std::io::Write;

use sqlx::Row;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// All decoded fields of a snapshot grouped by FormID, ordered.
async fn load_fields(
    store: &Store,
    snapshot_id: i64,
) -> Result<BTreeMap<u32, Vec<(String, String, String)>>> {
    let rows = sqlx::query(
        "SELECT form_id, field_name, field_value, field_kind
         FROM decoded_fields WHERE snapshot_id = ? ORDER BY form_id, field_name",
    )
    .bind(snapshot_id)
    .fetch_all(store.pool())
    .await?;

    let mut grouped: BTreeMap<u32, Vec<(String, String, String)>> = BTreeMap::new();
    for row in rows {
        let form_id: i64 = row.get("form_id");
        grouped.entry(form_id as u32).or_default().push((
            row.get("field_name"),
            row.get("field_value"),
            row.get("field_kind"),
        ));
    }
    Ok(grouped)
}

/// Write every record (optionally one type) with its fields to `out`.
/// Returns the number of records written.
pub async fn export(
    store: &Store,
    snapshot_id: i64,
    format: ExportFormat,
    type_filter: Option<&str>,
    out: &mut dyn Write,
) -> Result<u64> {
    let summaries = store.record_summaries(snapshot_id, type_filter).await?;
    let mut ordered: Vec<_> = summaries.into_values().collect();
    ordered.sort_unstable_by_key(|s| s.form_id);

    let fields = load_fields(store, snapshot_id).await?;

    match format {
        ExportFormat::Json => {
            let items: Vec<serde_json::Value> = ordered
                .iter()
                .map(|record| {
                    let mut field_map = serde_json::Map::new();
                    if let Some(list) = fields.get(&record.form_id) {
                        for (name, value, kind) in list {
                            field_map.insert(
                                name.clone(),
                                serde_json::json!({ "value": value, "kind": kind }),
                            );
                        }
                    }
                    serde_json::json!({
                        "form_id": format!("0x{:08X}", record.form_id),
                        "type": record.record_type,
                        "editor_id": record.editor_id,
                        "full_name": record.full_name,
                        "data_hash": record.data_hash,
                        "fields": field_map,
                    })
                })
                .collect();
            serde_json::to_writer_pretty(&mut *out, &items)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            out.write_all(b"\n")?;
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            writer
                .write_record([
                    "form_id",
                    "type",
                    "editor_id",
                    "full_name",
                    "field_name",
                    "field_value",
                    "field_kind",
                ])
                .map_err(csv_io_error)?;
            for record in &ordered {
                let form_id = format!("0x{:08X}", record.form_id);
                let editor_id = record.editor_id.as_deref().unwrap_or("");
                let full_name = record.full_name.as_deref().unwrap_or("");
                match fields.get(&record.form_id) {
                    Some(list) => {
                        for (name, value, kind) in list {
                            writer
                                .write_record([
                                    form_id.as_str(),
                                    &record.record_type,
                                    editor_id,
                                    full_name,
                                    name,
                                    value,
                                    kind,
                                ])
                                .map_err(csv_io_error)?;
                        }
                    }
                    None => {
                        writer
                            .write_record([
                                form_id.as_str(),
                                &record.record_type,
                                editor_id,
                                full_name,
                                "",
                                "",
                                "",
                            ])
                            .map_err(csv_io_error)?;
                    }
                }
            }
            writer.flush()?;
        }
    }

    Ok(ordered.len() as u64)
}

fn csv_io_error(e: csv::Error) -> crate::error::Error {
    crate::error::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldRow, RecordRow};

    async fn seeded() -> (tempfile::TempDir, Store, i64) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("export.db")).await.unwrap();
        let id = store.begin_snapshot("s", "h", 0).await.unwrap();
        store
            .insert_records(
                id,
                &[RecordRow {
                    form_id: 0x10,
                    record_type: "WEAP".into(),
                    editor_id: Some("Pipe".into()),
                    full_name: Some("Pipe Gun".into()),
                    data_hash: "abc".into(),
                    flags: 0,
                    data_size: 8,
                }],
            )
            .await
            .unwrap();
        store
            .insert_fields(
                id,
                &[FieldRow {
                    form_id: 0x10,
                    name: "damage".into(),
                    value: "50".into(),
                    kind: "float".into(),
                }],
            )
            .await
            .unwrap();
        store.commit_snapshot(id, 1, 0).await.unwrap();
        (dir, store, id)
    }

    #[tokio::test]
    async fn test_json_export() {
        let (_dir, store, id) = seeded().await;
        let mut buf = Vec::new();
        let count = export(&store, id, ExportFormat::Json, None, &mut buf)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed[0]["form_id"], "0x00000010");
        assert_eq!(parsed[0]["fields"]["damage"]["value"], "50");
        assert_eq!(parsed[0]["fields"]["damage"]["kind"], "float");
    }

    #[tokio::test]
    async fn test_csv_export() {
        let (_dir, store, id) = seeded().await;
        let mut buf = Vec::new();
        export(&store, id, ExportFormat::Csv, None, &mut buf)
            .await
            .unwrap();

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("form_id,type"));
        assert_eq!(
            lines.next().unwrap(),
            "0x00000010,WEAP,Pipe,Pipe Gun,damage,50,float"
        );
    }

    #[tokio::test]
    async fn test_type_filter_excludes_other_types() {
        let (_dir, store, id) = seeded().await;
        let mut buf = Vec::new();
        let count = export(&store, id, ExportFormat::Json, Some("ARMO"), &mut buf)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
