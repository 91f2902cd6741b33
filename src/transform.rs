//! Manifest transformer.
//!
//! Re-keys the raw content store's definition tables by semantic hash. The
//! raw store keys each row by a storage id that is not guaranteed to match
//! the `hash` inside the row's JSON; lookups are by `hash`, so every row is
//! decoded, its hash extracted, and the definition written to the lookup
//! store under that hash.
//!
//! # Refresh semantics
//!
//! Every run is a full refresh. The configured tables are built into a fresh
//! staging file next to the lookup store, which is renamed over the store
//! only after the transaction commits. Readers keep the previous file until
//! the rename and never wait on the writer; a failed run deletes the staging
//! file and leaves the store untouched. Tables that are no longer configured
//! do not survive a refresh.
//!
//! # Duplicate hashes
//!
//! Rows are read in ascending row id. When two rows decode to the same hash
//! the configured [`DuplicatePolicy`] decides: keep the later row, keep the
//! earlier row, or abort the refresh.

use serde::Serialize;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db;
use crate::error::ManifestError;
use crate::models::{DefinitionTable, DuplicatePolicy, Item, LookupRecord, RawItemRecord};
use crate::progress::{PipelineProgressEvent, PipelineProgressReporter};

/// Rows read from the raw store per round trip.
const BATCH_SIZE: i64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub table: DefinitionTable,
    pub rows_read: u64,
    pub records_written: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformSummary {
    pub duplicate_policy: DuplicatePolicy,
    pub tables: Vec<TableSummary>,
}

impl TransformSummary {
    pub fn records_written(&self) -> u64 {
        self.tables.iter().map(|t| t.records_written).sum()
    }
}

/// Decodes a raw row and re-keys it by the definition's semantic hash.
pub fn rekey(table: DefinitionTable, record: &RawItemRecord) -> Result<LookupRecord, ManifestError> {
    let malformed = |source| ManifestError::MalformedItem {
        table,
        row_id: record.id,
        source,
    };

    let item: Item = serde_json::from_slice(&record.json).map_err(malformed)?;
    let json = serde_json::to_vec(&item).map_err(malformed)?;

    Ok(LookupRecord {
        hash: item.hash.to_string(),
        json,
    })
}

/// Path of the file a refresh of `lookup_path` is built in.
pub fn staging_path(lookup_path: &Path) -> PathBuf {
    let mut name = lookup_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".staging-{}", std::process::id()));
    lookup_path.with_file_name(name)
}

/// Rebuilds the lookup store at `lookup_path` with `tables` from the raw
/// content store at `raw_path`.
///
/// The raw store is opened read-only. The new store replaces the old one in a
/// single rename once every table has been written.
pub async fn transform(
    raw_path: &Path,
    lookup_path: &Path,
    tables: &[DefinitionTable],
    policy: DuplicatePolicy,
    progress: &dyn PipelineProgressReporter,
) -> Result<TransformSummary, ManifestError> {
    let staging = staging_path(lookup_path);
    remove_if_exists(&staging)?;

    let raw = db::connect_read_only(raw_path).await?;
    let lookup = match db::connect_lookup(&staging).await {
        Ok(pool) => pool,
        Err(e) => {
            raw.close().await;
            return Err(e.into());
        }
    };

    let result = refresh(&raw, &lookup, tables, policy, progress).await;

    raw.close().await;
    lookup.close().await;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            remove_if_exists(&staging)?;
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&staging, lookup_path) {
        remove_if_exists(&staging)?;
        return Err(ManifestError::io(lookup_path, e));
    }

    info!(
        lookup = %lookup_path.display(),
        records = summary.records_written(),
        policy = policy.as_str(),
        "lookup store refreshed"
    );
    Ok(summary)
}

fn remove_if_exists(path: &Path) -> Result<(), ManifestError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ManifestError::io(path, e)),
    }
}

async fn refresh(
    raw: &SqlitePool,
    lookup: &SqlitePool,
    tables: &[DefinitionTable],
    policy: DuplicatePolicy,
    progress: &dyn PipelineProgressReporter,
) -> Result<TransformSummary, ManifestError> {
    for &table in tables {
        if !db::table_exists(raw, table.as_str()).await? {
            return Err(ManifestError::MissingSourceTable(table));
        }
    }

    let mut tx = lookup.begin().await?;
    let mut summaries = Vec::with_capacity(tables.len());

    for &table in tables {
        summaries.push(refresh_table(raw, &mut tx, table, policy, progress).await?);
    }

    tx.commit().await?;

    Ok(TransformSummary {
        duplicate_policy: policy,
        tables: summaries,
    })
}

async fn refresh_table(
    raw: &SqlitePool,
    tx: &mut Transaction<'_, Sqlite>,
    table: DefinitionTable,
    policy: DuplicatePolicy,
    progress: &dyn PipelineProgressReporter,
) -> Result<TableSummary, ManifestError> {
    let name = table.as_str();

    sqlx::query(&format!(
        "CREATE TABLE \"{}\" (hash TEXT NOT NULL PRIMARY KEY, json BLOB NOT NULL)",
        name
    ))
    .execute(&mut **tx)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", name))
        .fetch_one(raw)
        .await?;

    let first = format!(
        "SELECT id, CAST(json AS BLOB) AS json FROM \"{}\" ORDER BY id LIMIT ?",
        name
    );
    let next = format!(
        "SELECT id, CAST(json AS BLOB) AS json FROM \"{}\" WHERE id > ? ORDER BY id LIMIT ?",
        name
    );
    let insert = format!(
        "INSERT INTO \"{}\" (hash, json) VALUES (?, ?) ON CONFLICT(hash) DO NOTHING",
        name
    );
    let replace = format!("UPDATE \"{}\" SET json = ? WHERE hash = ?", name);

    let mut summary = TableSummary {
        table,
        rows_read: 0,
        records_written: 0,
        duplicates: 0,
    };
    let mut cursor: Option<i64> = None;

    loop {
        let batch = match cursor {
            None => sqlx::query(&first).bind(BATCH_SIZE),
            Some(last) => sqlx::query(&next).bind(last).bind(BATCH_SIZE),
        };
        let rows = batch.fetch_all(raw).await?;
        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let record = RawItemRecord {
                id: row.try_get("id")?,
                json: row.try_get("json")?,
            };
            cursor = Some(record.id);
            summary.rows_read += 1;

            let lookup_record = rekey(table, &record)?;
            let inserted = sqlx::query(&insert)
                .bind(&lookup_record.hash)
                .bind(&lookup_record.json)
                .execute(&mut **tx)
                .await?
                .rows_affected();

            if inserted > 0 {
                summary.records_written += 1;
                continue;
            }

            summary.duplicates += 1;
            match policy {
                DuplicatePolicy::LastWins => {
                    warn!(table = name, hash = %lookup_record.hash, row_id = record.id, "duplicate hash, keeping later row");
                    sqlx::query(&replace)
                        .bind(&lookup_record.json)
                        .bind(&lookup_record.hash)
                        .execute(&mut **tx)
                        .await?;
                }
                DuplicatePolicy::FirstWins => {
                    warn!(table = name, hash = %lookup_record.hash, row_id = record.id, "duplicate hash, keeping earlier row");
                }
                DuplicatePolicy::Reject => {
                    return Err(ManifestError::DuplicateHash {
                        table,
                        hash: lookup_record.hash,
                    });
                }
            }
        }

        debug!(table = name, n = summary.rows_read, total, "batch transformed");
        progress.report(PipelineProgressEvent::Transforming {
            table: name.to_string(),
            n: summary.rows_read,
            total: total.max(0) as u64,
        });
    }

    info!(
        table = name,
        rows = summary.rows_read,
        records = summary.records_written,
        duplicates = summary.duplicates,
        "definition table re-keyed"
    );
    Ok(summary)
}
