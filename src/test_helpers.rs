//! Shared test utilities for the gallery-sync test suite.
//!
//! Provides an in-memory [`MockGateway`] standing in for the hosted backend,
//! record builders, and mirror-tree fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let gateway = MockGateway::new()
//!     .with_record(approved("7", "uploads/2024/x.jpg", "比赛实况", 2024), b"jpeg");
//! let tmp = TempDir::new().unwrap();
//! let store = MirrorStore::new(tmp.path());
//!
//! export(&gateway, &gateway.list_approved().unwrap(), &store, &options(), &CancelToken::new()).unwrap();
//! assert_eq!(gateway.download_count(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use crate::remote::{RemoteError, RemoteGateway};
use crate::types::{RecordStatus, SourceRecord};

// =========================================================================
// Record builders
// =========================================================================

/// An approved record with the fields the exporter cares about.
pub fn approved(id: &str, object_path: &str, category: &str, year: i32) -> SourceRecord {
    SourceRecord {
        id: id.to_string(),
        object_path: Some(object_path.to_string()),
        status: RecordStatus::Approved,
        uploader_name: Some(format!("uploader-{id}")),
        category: Some(category.to_string()),
        year: Some(year),
        created_at: Some(format!("{year}-01-01T00:00:00+00:00")),
        ..Default::default()
    }
}

// =========================================================================
// Mirror fixtures
// =========================================================================

/// Create a file (and its parents) under `root`.
pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Relative paths of every file under `root`, sorted.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

// =========================================================================
// Mock gateway
// =========================================================================

/// One call made against a [`MockGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Download(String),
    DeleteObjects(Vec<String>),
    DeleteRecords(Vec<String>),
}

/// In-memory table + bucket that records every call.
///
/// Mirrors the hosted backend closely enough for pipeline tests: listing only
/// returns approved rows, a batch delete silently ignores missing keys, and a
/// single-item delete of a missing key reports [`RemoteError::NotFound`].
#[derive(Default)]
pub struct MockGateway {
    rows: Mutex<Vec<SourceRecord>>,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    fail_listing: Option<RemoteError>,
    fail_batches: bool,
    failing_downloads: BTreeMap<String, RemoteError>,
    failing_deletes: BTreeSet<String>,
    vanishing_rows: BTreeSet<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row and, when the record has an object key, its object bytes.
    pub fn with_record(self, record: SourceRecord, bytes: &[u8]) -> Self {
        if let Some(key) = record.object_key() {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), bytes.to_vec());
        }
        self.rows.lock().unwrap().push(record);
        self
    }

    /// Add a row whose object is not in the bucket.
    pub fn with_row_only(self, record: SourceRecord) -> Self {
        self.rows.lock().unwrap().push(record);
        self
    }

    pub fn failing_listing(self) -> Self {
        self.failing_listing_with(RemoteError::Query("connection refused".into()))
    }

    pub fn failing_listing_with(mut self, error: RemoteError) -> Self {
        self.fail_listing = Some(error);
        self
    }

    /// Every delete call with more than one item fails.
    pub fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    pub fn failing_download(self, key: &str) -> Self {
        let error = RemoteError::Download {
            path: key.to_string(),
            message: "500 Internal Server Error".into(),
        };
        self.failing_download_with(key, error)
    }

    /// Downloads of `key` fail with `error`.
    pub fn failing_download_with(mut self, key: &str, error: RemoteError) -> Self {
        self.failing_downloads.insert(key.to_string(), error);
        self
    }

    /// Any delete call touching this object key or row id fails.
    pub fn failing_delete(mut self, key_or_id: &str) -> Self {
        self.failing_deletes.insert(key_or_id.to_string());
        self
    }

    /// The row is listed once, then removed by someone else before any delete.
    pub fn row_vanishing_after_listing(mut self, id: &str) -> Self {
        self.vanishing_rows.insert(id.to_string());
        self
    }

    /// Edit a row in place, like a moderator would upstream.
    pub fn update_row(&self, id: &str, edit: impl FnOnce(&mut SourceRecord)) {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .unwrap_or_else(|| panic!("row '{id}' not found"));
        edit(row);
    }

    pub fn remove_object(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn download_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Download(_)))
            .count()
    }

    /// Number of delete calls of either kind.
    pub fn delete_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::DeleteObjects(_) | Call::DeleteRecords(_)))
            .count()
    }

    pub fn has_object(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn has_row(&self, id: &str) -> bool {
        self.rows.lock().unwrap().iter().any(|r| r.id == id)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_delete(&self, keys: &[String]) -> Result<(), RemoteError> {
        if self.fail_batches && keys.len() > 1 {
            return Err(RemoteError::Delete("batch rejected".into()));
        }
        if let Some(bad) = keys.iter().find(|k| self.failing_deletes.contains(*k)) {
            return Err(RemoteError::Delete(format!("cannot delete {bad}")));
        }
        Ok(())
    }
}

impl RemoteGateway for MockGateway {
    fn list_approved(&self) -> Result<Vec<SourceRecord>, RemoteError> {
        self.record(Call::List);
        if let Some(error) = &self.fail_listing {
            return Err(error.clone());
        }
        let mut rows: Vec<SourceRecord> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_approved())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.rows
            .lock()
            .unwrap()
            .retain(|r| !self.vanishing_rows.contains(&r.id));
        Ok(rows)
    }

    fn download_object(&self, object_path: &str) -> Result<Vec<u8>, RemoteError> {
        self.record(Call::Download(object_path.to_string()));
        if let Some(error) = self.failing_downloads.get(object_path) {
            return Err(error.clone());
        }
        self.objects
            .lock()
            .unwrap()
            .get(object_path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(object_path.to_string()))
    }

    fn delete_objects(&self, object_paths: &[String]) -> Result<(), RemoteError> {
        self.record(Call::DeleteObjects(object_paths.to_vec()));
        self.check_delete(object_paths)?;
        let mut objects = self.objects.lock().unwrap();
        let removed = object_paths
            .iter()
            .filter(|k| objects.remove(k.as_str()).is_some())
            .count();
        if removed == 0 && object_paths.len() == 1 {
            return Err(RemoteError::NotFound(object_paths[0].clone()));
        }
        Ok(())
    }

    fn delete_records(&self, ids: &[String]) -> Result<(), RemoteError> {
        self.record(Call::DeleteRecords(ids.to_vec()));
        self.check_delete(ids)?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !ids.contains(&r.id));
        if rows.len() == before && ids.len() == 1 {
            return Err(RemoteError::NotFound(ids[0].clone()));
        }
        Ok(())
    }
}
