//! Exporter: mirror approved records into the local tree.
//!
//! For each record, in listing order:
//!
//! 1. Validate the id (it becomes a file name) and reject duplicates.
//! 2. Resolve the destination with [`naming::resolve`].
//! 3. If an asset for the id already exists anywhere under `full/`, keep it.
//!    Otherwise download the object and write it atomically.
//! 4. Rewrite `meta/<id>.json` with the record's current display fields.
//!
//! Bytes are fetched at most once per id: the asset on disk is the
//! "already exported" marker. When a record's year or category changes
//! upstream after export, the asset stays where it is and only the sidecar
//! picks up the new values.
//!
//! One bad object never aborts the run. Per-item problems are collected in
//! [`ExportReport::failures`]; the only fatal error is failing to scan the
//! mirror tree before starting.

use crate::naming::{self, ResolvedPath};
use crate::pipeline::CancelToken;
use crate::remote::{RemoteError, RemoteGateway};
use crate::store::{self, AssetIndex, MirrorStore, StoreError};
use crate::types::{ItemFailure, MetaSidecar, SourceRecord};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("mirror error: {0}")]
    Store(#[from] StoreError),
    #[error("download failed: {0}")]
    Download(#[from] RemoteError),
    #[error("unsafe id {0:?}: cannot be used as a file name")]
    UnsafeId(String),
    #[error("duplicate id {0}: an earlier record in this run already claimed it")]
    DuplicateId(String),
}

/// Inputs the exporter needs besides the records themselves.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions<'a> {
    pub aliases: &'a BTreeMap<String, String>,
    /// Year used for records with neither `year` nor a parsable `taken_at`.
    pub fallback_year: i32,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub meta_written: usize,
    /// Records without an object key. Logged, not failures.
    pub no_object: usize,
    pub failures: Vec<ItemFailure>,
    /// The run stopped early on request.
    pub cancelled: bool,
}

enum Transfer {
    Downloaded,
    Skipped,
}

/// Export `records` into `store`.
pub fn export(
    gateway: &dyn RemoteGateway,
    records: &[SourceRecord],
    store: &MirrorStore,
    options: &ExportOptions<'_>,
    cancel: &CancelToken,
) -> Result<ExportReport, ExportError> {
    let index = store.scan_assets()?;
    let mut report = ExportReport::default();
    let mut seen: HashSet<&str> = HashSet::new();

    info!(records = records.len(), existing = index.len(), "exporting");

    for record in records {
        if cancel.is_cancelled() {
            warn!("export cancelled; remaining records left for the next run");
            report.cancelled = true;
            break;
        }
        if !record.is_approved() {
            debug!(id = %record.id, status = ?record.status, "ignoring record that is not approved");
            continue;
        }
        if !naming::is_safe_id(&record.id) {
            warn!(id = ?record.id, "rejecting unsafe id");
            report
                .failures
                .push(ItemFailure::new(&record.id, ExportError::UnsafeId(record.id.clone())));
            continue;
        }
        if !seen.insert(record.id.as_str()) {
            warn!(id = %record.id, "duplicate id in listing");
            report
                .failures
                .push(ItemFailure::new(&record.id, ExportError::DuplicateId(record.id.clone())));
            continue;
        }
        let Some(object_key) = record.object_key() else {
            warn!(id = %record.id, "record has no object path; nothing to download");
            report.no_object += 1;
            continue;
        };

        // An exported asset pins the fallback year to its directory.
        let fallback_year = index
            .get(&record.id)
            .map_or(options.fallback_year, |asset| asset.year);
        let resolved = naming::resolve(record, options.aliases, fallback_year);
        let transfer = transfer_one(gateway, store, &index, record, object_key, &resolved);

        let (src, sha256, outcome) = match transfer {
            Ok((src, sha, kind)) => (src, sha, Ok(kind)),
            Err(e) => (resolved.local_path.clone(), None, Err(e)),
        };

        let sidecar = build_sidecar(record, object_key, &resolved, src, sha256);
        match store.write_sidecar(&sidecar) {
            Ok(()) => report.meta_written += 1,
            Err(e) => {
                warn!(id = %record.id, error = %e, "failed to write sidecar");
                report
                    .failures
                    .push(ItemFailure::new(&record.id, ExportError::from(e)));
            }
        }

        match outcome {
            Ok(Transfer::Downloaded) => report.downloaded += 1,
            Ok(Transfer::Skipped) => report.skipped += 1,
            Err(e) => {
                warn!(id = %record.id, key = object_key, error = %e, "export failed");
                report.failures.push(ItemFailure::new(&record.id, e));
            }
        }
    }

    info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        meta_written = report.meta_written,
        failed = report.failures.len(),
        "export finished"
    );
    Ok(report)
}

/// Make sure the asset for `record` is on disk.
///
/// Returns the asset's relative path, its hash when known, and whether bytes
/// were fetched.
fn transfer_one(
    gateway: &dyn RemoteGateway,
    store: &MirrorStore,
    index: &AssetIndex,
    record: &SourceRecord,
    object_key: &str,
    resolved: &ResolvedPath,
) -> Result<(String, Option<String>, Transfer), ExportError> {
    if let Some(existing) = index.get(&record.id) {
        if existing.rel_path != resolved.local_path {
            debug!(
                id = %record.id,
                existing = %existing.rel_path,
                resolved = %resolved.local_path,
                "keeping asset at its original path"
            );
        }
        let sha = known_hash(store, &record.id, &existing.rel_path);
        debug!(id = %record.id, path = %existing.rel_path, "already exported");
        return Ok((existing.rel_path.clone(), sha, Transfer::Skipped));
    }

    store.ensure_parent(&resolved.local_path)?;
    let bytes = gateway.download_object(object_key)?;
    let sha = store.write_asset(&resolved.local_path, &bytes)?;
    info!(id = %record.id, path = %resolved.local_path, bytes = bytes.len(), "downloaded");
    Ok((resolved.local_path.clone(), Some(sha), Transfer::Downloaded))
}

/// Hash of an existing asset: from the previous sidecar when it describes the
/// same file, otherwise read back from disk.
fn known_hash(store: &MirrorStore, id: &str, rel_path: &str) -> Option<String> {
    let prior = store
        .read_sidecar(id)
        .filter(|s| s.src == rel_path)
        .and_then(|s| s.sha256);
    prior.or_else(|| store::hash_file(&store.path_of(rel_path)).ok())
}

fn build_sidecar(
    record: &SourceRecord,
    object_key: &str,
    resolved: &ResolvedPath,
    src: String,
    sha256: Option<String>,
) -> MetaSidecar {
    let category = record
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(resolved.category_slug.as_str())
        .to_string();
    MetaSidecar {
        id: record.id.clone(),
        category,
        uploader_name: record.uploader_name.clone().unwrap_or_default(),
        taken_at: record.taken_at.clone().filter(|t| !t.trim().is_empty()),
        people: record.people.clone().filter(|p| !p.trim().is_empty()),
        year: Some(resolved.year),
        src,
        source_object_path: object_key.to_string(),
        created_at: record.created_at.clone(),
        sha256,
    }
}
