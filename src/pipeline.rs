//! Manifest refresh pipeline.
//!
//! Runs fetch → extract → transform once, in order, and reports what it did.
//! Any failure ends the run and is returned to the caller; nothing here
//! terminates the process. Intermediate files are removed only after a
//! successful transform, and only when `retain_intermediates` is off.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::archive;
use crate::config::ManifestConfig;
use crate::error::ManifestError;
use crate::fetch::{FetchedBundle, ManifestFetcher};
use crate::progress::{PipelineProgressEvent, PipelineProgressReporter};
use crate::transform::{self, TableSummary};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub version: Option<String>,
    pub locale: String,
    pub content_url: String,
    pub bundle_bytes: u64,
    pub bundle_sha256: String,
    pub extracted_files: usize,
    pub content_store: PathBuf,
    pub lookup_db: PathBuf,
    pub tables: Vec<TableSummary>,
    pub intermediates_removed: bool,
    pub started_at: String,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn records_written(&self) -> u64 {
        self.tables.iter().map(|t| t.records_written).sum()
    }
}

/// Refreshes the lookup store from the upstream manifest.
///
/// # Errors
///
/// Returns the first [`ManifestError`] any stage produces. A failed transform
/// leaves the previous lookup contents in place.
pub async fn generate_manifest(
    config: &ManifestConfig,
    progress: &dyn PipelineProgressReporter,
) -> Result<PipelineReport, ManifestError> {
    let started_at = chrono::Utc::now();
    let clock = Instant::now();

    let tables = config
        .definition_tables()
        .map_err(|e| ManifestError::Config(e.to_string()))?;
    let policy = config
        .duplicate_policy()
        .map_err(|e| ManifestError::Config(e.to_string()))?;

    // Fetch
    let fetcher = ManifestFetcher::new(config)?;
    let FetchedBundle {
        pointer,
        content_url,
        bytes: bundle,
    } = fetcher.fetch_manifest(&config.locale, progress).await?;

    let bundle_bytes = bundle.len() as u64;
    let bundle_sha256 = format!("{:x}", Sha256::digest(&bundle));
    info!(sha256 = %bundle_sha256, bytes = bundle_bytes, "content bundle received");

    // Extract
    progress.report(PipelineProgressEvent::Extracting {
        bytes: bundle_bytes,
    });
    let work_dir = config.work_dir.clone();
    let lookup_db = config.lookup_db.clone();
    let staging = transform::staging_path(&lookup_db);
    let extracted = tokio::task::spawn_blocking(move || {
        archive::extract(&bundle, &work_dir, &[lookup_db.as_path(), staging.as_path()])
    })
    .await??;

    let expected = content_file_name(&content_url);
    let content_store = extracted
        .locate(&expected)
        .ok_or(ManifestError::MissingContentStore { expected })?
        .to_path_buf();

    // Transform
    let summary = transform::transform(
        &content_store,
        &config.lookup_db,
        &tables,
        policy,
        progress,
    )
    .await?;

    let intermediates_removed = if config.retain_intermediates {
        false
    } else {
        let to_remove = extracted.clone();
        tokio::task::spawn_blocking(move || to_remove.remove()).await??;
        info!(work_dir = %config.work_dir.display(), "intermediate files removed");
        true
    };

    let report = PipelineReport {
        version: pointer.version.clone(),
        locale: config.locale.clone(),
        content_url,
        bundle_bytes,
        bundle_sha256,
        extracted_files: extracted.files.len(),
        content_store,
        lookup_db: config.lookup_db.clone(),
        tables: summary.tables,
        intermediates_removed,
        started_at: started_at.to_rfc3339(),
        elapsed_ms: clock.elapsed().as_millis() as u64,
    };

    info!(
        version = report.version.as_deref().unwrap_or("unknown"),
        records = report.records_written(),
        elapsed_ms = report.elapsed_ms,
        "manifest refresh complete"
    );
    Ok(report)
}

/// Last path segment of a content URL, e.g. `world_sql_content_<id>.content`.
fn content_file_name(content_path: &str) -> String {
    content_path
        .rsplit('/')
        .next()
        .unwrap_or(content_path)
        .to_string()
}
