//! Remote data gateway: the submissions table and the object store.
//!
//! [`RemoteGateway`] is the seam between the pipeline and the hosted backend.
//! The production implementation is [`SupabaseGateway`]; tests substitute an
//! in-memory gateway that records every call.
//!
//! | Operation | Failure policy |
//! |---|---|
//! | [`list_approved`](RemoteGateway::list_approved) | fatal for the run |
//! | [`download_object`](RemoteGateway::download_object) | per item, batch continues |
//! | [`delete_objects`](RemoteGateway::delete_objects) / [`delete_records`](RemoteGateway::delete_records) | per item; [`RemoteError::NotFound`] counts as done |
//!
//! Every request carries the configured timeout, so no call blocks forever.

pub mod supabase;

pub use supabase::SupabaseGateway;

use crate::types::SourceRecord;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("download of {path} failed: {message}")]
    Download { path: String, message: String },
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("HTTP client error: {0}")]
    Http(String),
}

impl RemoteError {
    /// Whether the error means the target is already absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Access to the remote submissions table and object store.
pub trait RemoteGateway {
    /// All rows with `status = approved`, ordered by `created_at` ascending.
    fn list_approved(&self) -> Result<Vec<SourceRecord>, RemoteError>;

    /// Fetch an object's bytes by key.
    fn download_object(&self, object_path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Delete several objects in one call.
    fn delete_objects(&self, object_paths: &[String]) -> Result<(), RemoteError>;

    /// Delete several rows by id in one call.
    fn delete_records(&self, ids: &[String]) -> Result<(), RemoteError>;

    fn delete_object(&self, object_path: &str) -> Result<(), RemoteError> {
        self.delete_objects(std::slice::from_ref(&object_path.to_string()))
    }

    fn delete_record(&self, id: &str) -> Result<(), RemoteError> {
        self.delete_records(std::slice::from_ref(&id.to_string()))
    }
}
