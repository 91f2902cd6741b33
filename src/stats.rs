//! Lookup store statistics.
//!
//! Summarizes what the last refresh produced: file size and record counts per
//! definition table. Used by `projector stats` to confirm a refresh landed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::db;
use crate::models::DefinitionTable;

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub table: DefinitionTable,
    /// `None` when the table has not been populated.
    pub records: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub size_bytes: u64,
    pub tables: Vec<TableStats>,
}

pub async fn collect_stats(lookup_db: &Path) -> Result<StoreStats> {
    let size_bytes = std::fs::metadata(lookup_db)
        .with_context(|| format!("Lookup store not found: {}", lookup_db.display()))?
        .len();

    let pool = db::connect_read_only(lookup_db).await?;
    let mut tables = Vec::with_capacity(DefinitionTable::ALL.len());

    for table in DefinitionTable::ALL {
        let records = if db::table_exists(&pool, table.as_str()).await? {
            let count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table.as_str()))
                    .fetch_one(&pool)
                    .await?;
            Some(count)
        } else {
            None
        };
        tables.push(TableStats { table, records });
    }

    pool.close().await;
    Ok(StoreStats { size_bytes, tables })
}

/// Run the stats command: query the lookup store and print a summary.
pub async fn run_stats(lookup_db: &Path) -> Result<()> {
    let stats = collect_stats(lookup_db).await?;

    println!("Projector: Lookup Store Stats");
    println!("==============================");
    println!();
    println!("  Store:  {}", lookup_db.display());
    println!("  Size:   {}", format_bytes(stats.size_bytes));
    println!();

    for t in &stats.tables {
        match t.records {
            Some(n) => println!("  {:<36} {:>8}", t.table.as_str(), n),
            None => println!("  {:<36} {:>8}", t.table.as_str(), "-"),
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
