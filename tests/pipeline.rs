//! End-to-end manifest refresh against a local stand-in for the Bungie
//! platform.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use projector::config::ManifestConfig;
use projector::lookup;
use projector::models::DefinitionTable;
use projector::pipeline;
use projector::progress::NoProgress;

const POINTER_PATH: &str = "/Platform/Destiny2/Manifest/";
const CONTENT_PATH: &str = "/common/destiny2_content/sqlite/en/world_sql_content_abc.content";
const ITEMS: &str = "DestinyInventoryItemDefinition";

struct Stub {
    bundle: Mutex<Vec<u8>>,
    error_code: Mutex<i64>,
    fail_content: AtomicBool,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

async fn stub_handler(State(stub): State<Arc<Stub>>, uri: Uri, headers: HeaderMap) -> Response {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.requests
        .lock()
        .unwrap()
        .push((uri.path().to_string(), key));

    match uri.path() {
        POINTER_PATH => {
            let code = *stub.error_code.lock().unwrap();
            let status = if code == 1 { "Success" } else { "SystemDisabled" };
            Json(json!({
                "Response": {
                    "version": "228466.24.01.01",
                    "mobileWorldContentPaths": { "en": CONTENT_PATH }
                },
                "ErrorCode": code,
                "ErrorStatus": status,
                "Message": "Ok"
            }))
            .into_response()
        }
        CONTENT_PATH => {
            if stub.fail_content.load(Ordering::SeqCst) {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            stub.bundle.lock().unwrap().clone().into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_stub(bundle: Vec<u8>) -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub {
        bundle: Mutex::new(bundle),
        error_code: Mutex::new(1),
        fail_content: AtomicBool::new(false),
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .fallback(stub_handler)
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), stub)
}

/// Builds a raw content store holding `items` as `(id, json)` rows and
/// returns it zipped under the content file name.
async fn content_bundle(scratch: &Path, items: &[(i64, String)]) -> Vec<u8> {
    let store = scratch.join(format!("raw-{}.content", items.len()));
    let _ = std::fs::remove_file(&store);
    let pool = projector::db::connect_lookup(&store).await.unwrap();
    sqlx::query(&format!(
        "CREATE TABLE \"{}\" (id INTEGER PRIMARY KEY NOT NULL, json BLOB)",
        ITEMS
    ))
    .execute(&pool)
    .await
    .unwrap();
    for (id, body) in items {
        sqlx::query(&format!("INSERT INTO \"{}\" (id, json) VALUES (?, ?)", ITEMS))
            .bind(id)
            .bind(body)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;

    let bytes = std::fs::read(&store).unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "world_sql_content_abc.content",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
    writer.write_all(&bytes).unwrap();
    writer.finish().unwrap().into_inner()
}

fn item(hash: u64, name: &str) -> String {
    json!({
        "hash": hash,
        "displayProperties": { "name": name },
        "itemTypeDisplayName": "Helmet"
    })
    .to_string()
}

fn manifest_config(tmp: &TempDir, base_url: &str) -> ManifestConfig {
    ManifestConfig {
        base_url: base_url.to_string(),
        api_key: Some("test-key".to_string()),
        work_dir: tmp.path().join("work"),
        lookup_db: tmp.path().join("store").join("manifest.db"),
        timeout_secs: 10,
        ..ManifestConfig::default()
    }
}

fn lookup_db(config: &ManifestConfig) -> PathBuf {
    config.lookup_db.clone()
}

#[tokio::test]
async fn test_generate_manifest_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let bundle = content_bundle(
        tmp.path(),
        &[
            (-1_000_001, item(3093570047, "Helm of Saint-14")),
            (2, item(1, "Hunter Cloak")),
        ],
    )
    .await;
    let (base_url, stub) = start_stub(bundle).await;
    let config = manifest_config(&tmp, &base_url);

    let report = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.version.as_deref(), Some("228466.24.01.01"));
    assert_eq!(report.content_url, format!("{}{}", base_url, CONTENT_PATH));
    assert_eq!(report.records_written(), 2);
    assert_eq!(report.extracted_files, 1);
    assert_eq!(report.bundle_sha256.len(), 64);
    assert!(!report.intermediates_removed);

    let requests = stub.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].0, POINTER_PATH);
    assert_eq!(requests[1].0, CONTENT_PATH);
    assert!(requests
        .iter()
        .all(|(_, key)| key.as_deref() == Some("test-key")));

    let found = lookup::query_definition(&lookup_db(&config), "3093570047", ITEMS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.hash, 3093570047);
    assert_eq!(found.display_name(), Some("Helm of Saint-14"));
    assert_eq!(found.rest["itemTypeDisplayName"], "Helmet");

    // Raw row ids are not lookup keys.
    let by_row_id = lookup::query_definition(&lookup_db(&config), "2", ITEMS)
        .await
        .unwrap();
    assert!(by_row_id.is_none());

    assert!(config.work_dir.join("manifest.zip").exists());
    assert!(config
        .work_dir
        .join("world_sql_content_abc.content")
        .exists());
}

#[tokio::test]
async fn test_second_run_replaces_previous_contents() {
    let tmp = TempDir::new().unwrap();
    let first = content_bundle(tmp.path(), &[(1, item(1, "Old")), (2, item(2, "Kept"))]).await;
    let (base_url, stub) = start_stub(first).await;
    let config = manifest_config(&tmp, &base_url);

    pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap();

    let second = content_bundle(
        tmp.path(),
        &[(2, item(2, "Renamed")), (3, item(3, "New")), (4, item(4, "Newer"))],
    )
    .await;
    *stub.bundle.lock().unwrap() = second;

    let report = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.records_written(), 3);

    let db = lookup_db(&config);
    assert!(lookup::query_definition(&db, "1", ITEMS).await.unwrap().is_none());
    let renamed = lookup::query_definition(&db, "2", ITEMS).await.unwrap().unwrap();
    assert_eq!(renamed.display_name(), Some("Renamed"));
    assert!(lookup::query_definition(&db, "3", ITEMS).await.unwrap().is_some());
}

#[tokio::test]
async fn test_intermediates_removed_when_not_retained() {
    let tmp = TempDir::new().unwrap();
    let bundle = content_bundle(tmp.path(), &[(1, item(1, "Only"))]).await;
    let (base_url, _stub) = start_stub(bundle).await;
    let config = ManifestConfig {
        retain_intermediates: false,
        ..manifest_config(&tmp, &base_url)
    };

    let report = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap();

    assert!(report.intermediates_removed);
    assert!(!config.work_dir.join("manifest.zip").exists());
    assert!(!config
        .work_dir
        .join("world_sql_content_abc.content")
        .exists());
    assert!(lookup::query_definition(&lookup_db(&config), "1", ITEMS)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_failed_download_keeps_previous_store() {
    let tmp = TempDir::new().unwrap();
    let bundle = content_bundle(tmp.path(), &[(1, item(1, "Survivor"))]).await;
    let (base_url, stub) = start_stub(bundle).await;
    let config = manifest_config(&tmp, &base_url);

    pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap();

    stub.fail_content.store(true, Ordering::SeqCst);
    let err = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "upstream");
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("500"));

    let survivor = lookup::query_definition(&lookup_db(&config), "1", ITEMS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.display_name(), Some("Survivor"));
}

#[tokio::test]
async fn test_platform_error_code_stops_before_download() {
    let tmp = TempDir::new().unwrap();
    let bundle = content_bundle(tmp.path(), &[(1, item(1, "Unused"))]).await;
    let (base_url, stub) = start_stub(bundle).await;
    *stub.error_code.lock().unwrap() = 5;
    let config = manifest_config(&tmp, &base_url);

    let err = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "upstream");
    assert_eq!(stub.requests.lock().unwrap().len(), 1);
    assert!(!config.lookup_db.exists());
}

#[tokio::test]
async fn test_unknown_locale() {
    let tmp = TempDir::new().unwrap();
    let bundle = content_bundle(tmp.path(), &[(1, item(1, "Unused"))]).await;
    let (base_url, stub) = start_stub(bundle).await;
    let config = ManifestConfig {
        locale: "xx".to_string(),
        ..manifest_config(&tmp, &base_url)
    };

    let err = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "decode");
    assert!(err.to_string().contains("xx"));
    assert_eq!(stub.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_source_table_is_reported() {
    let tmp = TempDir::new().unwrap();
    let bundle = content_bundle(tmp.path(), &[(1, item(1, "Item"))]).await;
    let (base_url, _stub) = start_stub(bundle).await;
    let config = ManifestConfig {
        tables: vec![
            DefinitionTable::InventoryItem.as_str().to_string(),
            DefinitionTable::SandboxPerk.as_str().to_string(),
        ],
        ..manifest_config(&tmp, &base_url)
    };

    let err = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("DestinySandboxPerkDefinition"));
    assert!(!config.lookup_db.exists());
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let tmp = TempDir::new().unwrap();
    let config = manifest_config(&tmp, "http://127.0.0.1:1");

    let err = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "transport");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_bundle_cannot_overwrite_lookup_store_in_work_dir() {
    let tmp = TempDir::new().unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("manifest.db", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"junk").unwrap();
    let bundle = writer.finish().unwrap().into_inner();
    let (base_url, _stub) = start_stub(bundle).await;

    let work_dir = tmp.path().join("work");
    std::fs::create_dir_all(&work_dir).unwrap();
    let store = work_dir.join("manifest.db");
    std::fs::write(&store, b"LIVE LOOKUP STORE").unwrap();
    let config = ManifestConfig {
        lookup_db: store.clone(),
        ..manifest_config(&tmp, &base_url)
    };

    let err = pipeline::generate_manifest(&config, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "decode");
    assert!(err.to_string().contains("would overwrite"));
    assert_eq!(std::fs::read(&store).unwrap(), b"LIVE LOOKUP STORE");
}
