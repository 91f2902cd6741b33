//! Definition lookup by semantic hash.
//!
//! Each call opens the lookup store read-only, runs one keyed query, and
//! closes it again, so calls are independent of each other. A refresh never
//! writes to the file a reader has open: it stages a new file and renames it
//! over the store, so a call sees either the previous or the new contents.
//!
//! The identifier is always a bound parameter. Table names come from the
//! closed [`DefinitionTable`] set; a name outside it, or a known table the
//! store does not hold, is a not-found result rather than an error.

use serde::Serialize;
use sqlx::Row;
use std::path::Path;
use tracing::warn;

use crate::db;
use crate::error::LookupError;
use crate::models::{DefinitionTable, Item};

/// Fetches the definition with hash `identifier` from `table`.
///
/// Returns `Ok(None)` when no row matches, the table name is unknown, or the
/// table has not been populated.
///
/// # Errors
///
/// - [`LookupError::Unavailable`] if the store cannot be opened.
/// - [`LookupError::Query`] if the query fails.
/// - [`LookupError::Malformed`] if the stored JSON does not decode.
pub async fn query_definition(
    lookup_db: &Path,
    identifier: &str,
    table: &str,
) -> Result<Option<Item>, LookupError> {
    let table = match table.parse::<DefinitionTable>() {
        Ok(t) => t,
        Err(_) => return Ok(None),
    };

    let pool = db::connect_read_only(lookup_db)
        .await
        .map_err(|source| LookupError::Unavailable {
            path: lookup_db.to_path_buf(),
            source,
        })?;

    let result = fetch(&pool, table, identifier).await;
    pool.close().await;
    result
}

async fn fetch(
    pool: &sqlx::SqlitePool,
    table: DefinitionTable,
    identifier: &str,
) -> Result<Option<Item>, LookupError> {
    if !db::table_exists(pool, table.as_str()).await? {
        return Ok(None);
    }

    let row = sqlx::query(&format!(
        "SELECT hash, json FROM \"{}\" WHERE hash = ? LIMIT 1",
        table.as_str()
    ))
    .bind(identifier)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let json: Vec<u8> = row.try_get("json")?;
    let item = serde_json::from_slice(&json).map_err(|source| LookupError::Malformed {
        hash: identifier.to_string(),
        source,
    })?;

    Ok(Some(item))
}

/// Lookup result as handed to callers that must never fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Found {
        table: String,
        hash: String,
        definition: Item,
    },
    NotFound {
        table: String,
        hash: String,
    },
    Unavailable {
        table: String,
        hash: String,
        message: String,
    },
}

impl QueryOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, QueryOutcome::Found { .. })
    }

    pub fn definition(&self) -> Option<&Item> {
        match self {
            QueryOutcome::Found { definition, .. } => Some(definition),
            _ => None,
        }
    }
}

/// [`query_definition`] folded into a [`QueryOutcome`]; store failures are
/// logged and reported as `unavailable`.
pub async fn query(lookup_db: &Path, identifier: &str, table: &str) -> QueryOutcome {
    let hash = identifier.to_string();
    let table_name = table.to_string();

    match query_definition(lookup_db, identifier, table).await {
        Ok(Some(definition)) => QueryOutcome::Found {
            table: table_name,
            hash,
            definition,
        },
        Ok(None) => QueryOutcome::NotFound {
            table: table_name,
            hash,
        },
        Err(e) => {
            warn!(table, hash = identifier, error = %e, "manifest lookup failed");
            QueryOutcome::Unavailable {
                table: table_name,
                hash,
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ITEMS: &str = "DestinyInventoryItemDefinition";

    async fn lookup_store(dir: &Path) -> PathBuf {
        let path = dir.join("manifest.db");
        let pool = db::connect_lookup(&path).await.unwrap();
        sqlx::query(&format!(
            "CREATE TABLE \"{}\" (hash TEXT NOT NULL PRIMARY KEY, json BLOB NOT NULL)",
            ITEMS
        ))
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(&format!("INSERT INTO \"{}\" (hash, json) VALUES (?, ?)", ITEMS))
            .bind("12345")
            .bind(br#"{"hash":12345,"displayProperties":{"name":"Helm"}}"#.to_vec())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(&format!("INSERT INTO \"{}\" (hash, json) VALUES (?, ?)", ITEMS))
            .bind("666")
            .bind(b"corrupt".to_vec())
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        path
    }

    #[tokio::test]
    async fn test_found() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        let item = query_definition(&store, "12345", ITEMS).await.unwrap().unwrap();
        assert_eq!(item.hash, 12345);
        assert_eq!(item.display_name(), Some("Helm"));
    }

    #[tokio::test]
    async fn test_missing_hash_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        assert!(query_definition(&store, "nonexistent-hash", ITEMS)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_table_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        assert!(query_definition(&store, "12345", "nonexistent-table")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unpopulated_known_table_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        assert!(query_definition(&store, "12345", "DestinySandboxPerkDefinition")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_identifier_is_not_interpolated() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        assert!(query_definition(&store, "' OR '1'='1", ITEMS)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_store_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.db");

        let err = query_definition(&missing, "12345", ITEMS).await.unwrap_err();
        assert!(matches!(err, LookupError::Unavailable { .. }));
        assert!(err.to_string().starts_with("unable to load destiny manifest"));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        let err = query_definition(&store, "666", ITEMS).await.unwrap_err();
        assert!(matches!(err, LookupError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_query_outcome_variants() {
        let tmp = TempDir::new().unwrap();
        let store = lookup_store(tmp.path()).await;

        assert!(query(&store, "12345", ITEMS).await.is_found());
        assert_eq!(
            query(&store, "1", ITEMS).await,
            QueryOutcome::NotFound {
                table: ITEMS.to_string(),
                hash: "1".to_string()
            }
        );
        let outcome = query(&tmp.path().join("nope.db"), "1", ITEMS).await;
        assert!(matches!(outcome, QueryOutcome::Unavailable { .. }));

        let json = serde_json::to_value(query(&store, "12345", ITEMS).await).unwrap();
        assert_eq!(json["status"], "found");
        assert_eq!(json["definition"]["hash"], 12345);
    }
}
