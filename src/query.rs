//! Read-only lookups over a snapshot store.
//!
//! This is the surface consumed by search, record display, export, and the
//! unreleased-content scan. Queries accept case-insensitive substrings, glob
//! patterns (`*`/`?`, translated to SQL LIKE), and FormIDs in `0x`-hex or
//! decimal form.

use sqlx::{QueryBuilder, Row, Sqlite};

use crate::error::Result;
use crate::esm::constants::UNRELEASED_PREFIXES;
use crate::store::{RecordSummary, Store, StoredField};

const RESULT_LIMIT: i64 = 500;

/// A record with its decoded fields.
#[derive(Debug, Clone)]
pub struct RecordDetail {
    pub record: RecordSummary,
    pub fields: Vec<StoredField>,
}

/// Parse a FormID written as `0x`-prefixed hex or plain decimal.
pub fn parse_form_id(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Translate a `*`/`?` glob into a SQL LIKE pattern.
fn glob_to_like(glob: &str) -> String {
    glob.replace('%', "\\%")
        .replace('_', "\\_")
        .replace('*', "%")
        .replace('?', "_")
}

/// Search records by name, editor id, or FormID.
///
/// `query` matches `full_name`/`editor_id` as a substring, or the exact
/// record when it parses as a FormID. `edid_glob` further narrows by editor
/// id. Results are capped at 500 rows, ordered by (type, form_id).
pub async fn find(
    store: &Store,
    snapshot_id: i64,
    query: &str,
    type_filter: Option<&str>,
    edid_glob: Option<&str>,
) -> Result<Vec<RecordSummary>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT form_id, record_type, editor_id, full_name, data_hash FROM records WHERE snapshot_id = ",
    );
    qb.push_bind(snapshot_id);

    if let Some(kind) = type_filter {
        qb.push(" AND record_type = ").push_bind(kind.to_string());
    }
    if let Some(glob) = edid_glob {
        qb.push(" AND editor_id LIKE ")
            .push_bind(glob_to_like(glob))
            .push(" ESCAPE '\\'");
    }
    if !query.is_empty() {
        let like = format!("%{}%", query);
        if let Some(form_id) = parse_form_id(query) {
            qb.push(" AND (form_id = ")
                .push_bind(form_id as i64)
                .push(" OR full_name LIKE ")
                .push_bind(like.clone())
                .push(" OR editor_id LIKE ")
                .push_bind(like)
                .push(")");
        } else {
            qb.push(" AND (full_name LIKE ")
                .push_bind(like.clone())
                .push(" OR editor_id LIKE ")
                .push_bind(like)
                .push(")");
        }
    }
    qb.push(" ORDER BY record_type, form_id LIMIT ").push_bind(RESULT_LIMIT);

    let rows = qb.build().fetch_all(store.pool()).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let form_id: i64 = row.get("form_id");
            RecordSummary {
                form_id: form_id as u32,
                record_type: row.get("record_type"),
                editor_id: row.get("editor_id"),
                full_name: row.get("full_name"),
                data_hash: row.get("data_hash"),
            }
        })
        .collect())
}

/// One record with its decoded fields, or `None` if the FormID is absent.
pub async fn get(store: &Store, snapshot_id: i64, form_id: u32) -> Result<Option<RecordDetail>> {
    let Some(record) = store.get_record(snapshot_id, form_id).await? else {
        return Ok(None);
    };
    let fields = store.decoded_fields(snapshot_id, form_id).await?;
    Ok(Some(RecordDetail { record, fields }))
}

/// All records of one type, ordered by FormID.
pub async fn iter_type(
    store: &Store,
    snapshot_id: i64,
    record_type: &str,
) -> Result<Vec<RecordSummary>> {
    store.records_by_type(snapshot_id, record_type).await
}

/// Substring search over the snapshot's localized strings.
pub async fn strings_search(
    store: &Store,
    snapshot_id: i64,
    query: &str,
) -> Result<Vec<(u32, String)>> {
    store.search_strings(snapshot_id, query, 200).await
}

/// Records whose editor id carries an unreleased-content prefix.
pub async fn unreleased(store: &Store, snapshot_id: i64) -> Result<Vec<RecordSummary>> {
    let mut out = Vec::new();
    for prefix in UNRELEASED_PREFIXES {
        let rows = sqlx::query(
            "SELECT form_id, record_type, editor_id, full_name, data_hash
             FROM records WHERE snapshot_id = ? AND editor_id LIKE ? ESCAPE '\\'
             ORDER BY form_id",
        )
        .bind(snapshot_id)
        .bind(format!("{}%", glob_to_like(prefix)))
        .fetch_all(store.pool())
        .await?;
        for row in rows {
            let form_id: i64 = row.get("form_id");
            out.push(RecordSummary {
                form_id: form_id as u32,
                record_type: row.get("record_type"),
                editor_id: row.get("editor_id"),
                full_name: row.get("full_name"),
                data_hash: row.get("data_hash"),
            });
        }
    }
    // LIKE is case-insensitive in SQLite, so TEST_/test_ overlap; dedup.
    out.sort_unstable_by_key(|r| r.form_id);
    out.dedup_by_key(|r| r.form_id);
    Ok(out)
}
