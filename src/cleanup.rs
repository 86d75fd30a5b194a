//! Cleanup Engine: remove exported items from the remote staging area.
//!
//! The local mirror is the durable archive; the bucket and table only stage
//! submissions until they are exported. Cleanup deletes the remote copies of
//! items that are safely on disk, and never touches the mirror itself.
//!
//! ## Safety rules
//!
//! - `mode = none` does nothing at all, not even a listing.
//! - Records are re-listed fresh; an earlier export's list is never reused.
//! - Only records whose asset exists on disk become candidates.
//! - Dry-run (the default) plans and logs, and issues no delete call.
//! - With an `object_prefix`, objects outside it are left alone.
//! - In `both` mode a row is deleted only once its object is gone, so a row is
//!   never removed while the object it points at still exists.
//!
//! Deletes run through [`batch::run_batched`]: one call per chunk, item by
//! item when a chunk fails. "Not found" counts as done.

use crate::batch::{self, BatchOutcome};
use crate::config::{CleanupMode, SyncConfig};
use crate::naming;
use crate::pipeline::CancelToken;
use crate::remote::{RemoteError, RemoteGateway};
use crate::store::{AssetIndex, MirrorStore, StoreError};
use crate::types::{ItemFailure, SourceRecord};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("cannot list approved records: {0}")]
    Listing(#[source] RemoteError),
    #[error("mirror error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions<'a> {
    pub mode: CleanupMode,
    pub dry_run: bool,
    pub storage_batch: usize,
    pub table_batch: usize,
    pub object_prefix: Option<&'a str>,
}

impl<'a> CleanupOptions<'a> {
    pub fn from_config(config: &'a SyncConfig) -> Self {
        Self {
            mode: config.cleanup.mode,
            dry_run: config.cleanup.dry_run,
            storage_batch: config.cleanup.storage_batch,
            table_batch: config.cleanup.table_batch,
            object_prefix: config
                .cleanup
                .object_prefix
                .as_deref()
                .filter(|p| !p.is_empty()),
        }
    }

    fn allows_object(&self, object_path: &str) -> bool {
        self.object_prefix
            .is_none_or(|prefix| object_path.starts_with(prefix))
    }
}

/// An approved record whose asset is already on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupCandidate {
    pub id: String,
    pub object_path: Option<String>,
}

/// A deletion a dry run would have performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    DeleteObject { id: String, object_path: String },
    DeleteRow { id: String },
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub mode: CleanupMode,
    pub dry_run: bool,
    /// Approved records returned by the fresh listing.
    pub listed: usize,
    pub candidates: usize,
    /// Approved records held back because their asset is not on disk.
    pub not_exported: usize,
    /// Filled only in dry-run.
    pub planned: Vec<PlannedAction>,
    pub storage_deleted: usize,
    /// Objects that were already gone.
    pub storage_absent: usize,
    pub table_deleted: usize,
    /// Rows that were already gone.
    pub table_absent: usize,
    /// Ids whose object lies outside the configured prefix.
    pub outside_prefix: Vec<String>,
    /// Rows left in place because their object could not be removed.
    pub rows_kept: usize,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
    /// Deletions not attempted because the run was cancelled.
    pub skipped: usize,
}

/// Delete the remote copies of exported items.
pub fn cleanup(
    gateway: &dyn RemoteGateway,
    store: &MirrorStore,
    options: &CleanupOptions<'_>,
    cancel: &CancelToken,
) -> Result<CleanupReport, CleanupError> {
    let mut report = CleanupReport {
        mode: options.mode,
        dry_run: options.dry_run,
        ..Default::default()
    };
    if options.mode == CleanupMode::None {
        info!("cleanup mode is none; nothing to do");
        return Ok(report);
    }

    let records = gateway.list_approved().map_err(CleanupError::Listing)?;
    let index = store.scan_assets()?;
    let candidates = select_candidates(&records, &index);
    report.listed = records.len();
    report.candidates = candidates.len();
    report.not_exported = records.len() - candidates.len();
    info!(
        mode = %options.mode,
        dry_run = options.dry_run,
        candidates = report.candidates,
        not_exported = report.not_exported,
        "cleanup starting"
    );

    if options.dry_run {
        report.planned = plan(&candidates, options, &mut report.outside_prefix);
        for action in &report.planned {
            match action {
                PlannedAction::DeleteObject { id, object_path } => {
                    info!(id = %id, object = %object_path, "[dry-run] would delete object")
                }
                PlannedAction::DeleteRow { id } => info!(id = %id, "[dry-run] would delete row"),
            }
        }
        return Ok(report);
    }

    let keep_going = || !cancel.is_cancelled();

    // Object keys whose object is known to be gone after this phase.
    let mut objects_gone: BTreeSet<String> = BTreeSet::new();
    if options.mode.deletes_objects() {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for candidate in &candidates {
            let Some(key) = candidate.object_path.as_deref() else {
                continue;
            };
            if !options.allows_object(key) {
                debug!(id = %candidate.id, object = key, "object outside prefix; keeping");
                report.outside_prefix.push(candidate.id.clone());
                continue;
            }
            owners.entry(key.to_string()).or_default().push(candidate.id.clone());
        }
        let keys: Vec<String> = owners.keys().cloned().collect();
        let outcome = batch::run_batched(
            &keys,
            options.storage_batch,
            |chunk| gateway.delete_objects(chunk),
            |key| gateway.delete_object(key),
            RemoteError::is_not_found,
            keep_going,
        );
        report.storage_deleted = outcome.succeeded.len();
        report.storage_absent = outcome.absent.len();
        objects_gone.extend(outcome.satisfied().cloned());
        record_failures(&mut report, &outcome, |key| {
            owners.get(key).cloned().unwrap_or_default()
        });
        info!(
            deleted = report.storage_deleted,
            absent = report.storage_absent,
            failed = outcome.failed.len(),
            fallbacks = outcome.fallbacks,
            "storage cleanup done"
        );
    }

    if options.mode.deletes_rows() {
        let mut ids = Vec::new();
        for candidate in &candidates {
            let object_still_there = options.mode.deletes_objects()
                && candidate
                    .object_path
                    .as_deref()
                    .is_some_and(|key| !objects_gone.contains(key));
            if object_still_there {
                report.rows_kept += 1;
            } else {
                ids.push(candidate.id.clone());
            }
        }
        let outcome = batch::run_batched(
            &ids,
            options.table_batch,
            |chunk| gateway.delete_records(chunk),
            |id| gateway.delete_record(id),
            RemoteError::is_not_found,
            keep_going,
        );
        report.table_deleted = outcome.succeeded.len();
        report.table_absent = outcome.absent.len();
        record_failures(&mut report, &outcome, |id| vec![id.clone()]);
        info!(
            deleted = report.table_deleted,
            absent = report.table_absent,
            kept = report.rows_kept,
            failed = outcome.failed.len(),
            fallbacks = outcome.fallbacks,
            "table cleanup done"
        );
    }

    if cancel.is_cancelled() {
        warn!(
            skipped = report.skipped,
            "cleanup cancelled; remaining deletions left for the next run"
        );
        report.cancelled = true;
    }
    Ok(report)
}

/// Approved records whose asset exists on disk, in listing order.
///
/// The asset index is keyed by id, so an asset stays a valid marker even if
/// the record's category or year changed after export.
pub fn select_candidates(records: &[SourceRecord], index: &AssetIndex) -> Vec<CleanupCandidate> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .filter(|r| r.is_approved() && naming::is_safe_id(&r.id))
        .filter(|r| seen.insert(r.id.clone()))
        .filter(|r| index.get(&r.id).is_some())
        .map(|r| CleanupCandidate {
            id: r.id.clone(),
            object_path: r.object_key().map(str::to_string),
        })
        .collect()
}

/// What a real run would delete, under the same prefix and ordering rules.
pub fn plan(
    candidates: &[CleanupCandidate],
    options: &CleanupOptions<'_>,
    outside_prefix: &mut Vec<String>,
) -> Vec<PlannedAction> {
    let mut actions = Vec::new();
    for candidate in candidates {
        let mut object_remains = false;
        if options.mode.deletes_objects() {
            if let Some(key) = candidate.object_path.as_deref() {
                if options.allows_object(key) {
                    actions.push(PlannedAction::DeleteObject {
                        id: candidate.id.clone(),
                        object_path: key.to_string(),
                    });
                } else {
                    outside_prefix.push(candidate.id.clone());
                    object_remains = true;
                }
            }
        }
        if options.mode.deletes_rows() && !object_remains {
            actions.push(PlannedAction::DeleteRow {
                id: candidate.id.clone(),
            });
        }
    }
    actions
}

fn record_failures<F>(report: &mut CleanupReport, outcome: &BatchOutcome<String, RemoteError>, ids_of: F)
where
    F: Fn(&String) -> Vec<String>,
{
    for (item, error) in &outcome.failed {
        warn!(item = %item, error = %error, "delete failed");
        for id in ids_of(item) {
            report.failures.push(ItemFailure::new(id, error));
        }
    }
    for item in &outcome.skipped {
        debug!(item = %item, "delete skipped");
    }
    report.skipped += outcome.skipped.len();
}
