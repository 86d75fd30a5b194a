//! Shared types passed between pipeline stages.
//!
//! [`SourceRecord`] is what the remote table returns, [`MetaSidecar`] is what
//! the exporter writes next to each mirrored image, and [`ManifestEntry`] is the
//! projection the public gallery reads. The JSON shapes of the last two are a
//! compatibility contract with the gallery renderer, so field names stay in
//! `snake_case` exactly as the renderer reads them.

use serde::{Deserialize, Deserializer, Serialize};

/// Moderation status of a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    /// Any status this version does not know about. Never exported.
    #[serde(other)]
    Unknown,
}

/// One row of the submissions table.
///
/// Every display field is optional because rows come from a form with
/// optional inputs and older rows predate some columns. Fallback rules for
/// missing values live in [`crate::naming`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Object key in the storage bucket.
    #[serde(rename = "image_path", default)]
    pub object_path: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub uploader_name: Option<String>,
    /// `yyyy-mm-dd` from the upload form, or a full timestamp.
    #[serde(default)]
    pub taken_at: Option<String>,
    #[serde(default)]
    pub people: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_year")]
    pub year: Option<i32>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl SourceRecord {
    /// The storage key, trimmed. `None` when absent or blank.
    pub fn object_key(&self) -> Option<&str> {
        self.object_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn is_approved(&self) -> bool {
        self.status == RecordStatus::Approved
    }
}

/// Per-item metadata written to `meta/<id>.json`.
///
/// Rewritten on every export run so upstream edits propagate without
/// downloading the image again. Every field defaults on read so a partial or
/// hand-edited sidecar still loads; [`crate::manifest`] fills the gaps from
/// the asset path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaSidecar {
    pub id: String,
    pub category: String,
    pub uploader_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub people: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Asset path relative to the mirror root, e.g. `full/2024/match/7.jpg`.
    pub src: String,
    pub source_object_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Hex SHA-256 of the asset bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// One item of the public manifest.
///
/// Missing text fields are written as empty strings; the renderer treats
/// empty as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub year: i32,
    pub category: String,
    pub uploader_name: String,
    pub taken_at: String,
    pub people: String,
    pub src: String,
}

/// A per-item error recorded in a stage report instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub error: String,
}

impl ItemFailure {
    pub fn new(id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            id: id.into(),
            error: error.to_string(),
        }
    }
}

/// Accept ids stored as JSON strings or integers.
///
/// Integer primary keys render in decimal so `7` and `"7"` name the same item.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    })
}

/// Accept a year column stored as an integer, a numeric string, or null.
///
/// Anything that is not a positive year degrades to `None` rather than
/// failing the whole listing.
fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawYear {
        Number(i64),
        Text(String),
        Other(serde_json::Value),
    }

    let year = match Option::<RawYear>::deserialize(deserializer)? {
        Some(RawYear::Number(n)) => i32::try_from(n).ok(),
        Some(RawYear::Text(s)) => s.trim().parse::<i32>().ok(),
        Some(RawYear::Other(_)) | None => None,
    };
    Ok(year.filter(|y| *y > 0))
}
