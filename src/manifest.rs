//! Manifest Builder: derive the public manifest from the mirror tree.
//!
//! The manifest is a pure function of what is on disk:
//!
//! ```text
//! full/**/<id>.<ext>  ─┐
//! meta/<id>.json      ─┼─→  manifest.json   (ordered array of ManifestEntry)
//! previous manifest   ─┘    (order only)
//! ```
//!
//! No network access, no persistent index. Running it twice on an unchanged
//! tree produces byte-identical output, and an unchanged file is not
//! rewritten at all.
//!
//! ## Field merge
//!
//! | Field | Source |
//! |---|---|
//! | `id` | file stem |
//! | `src` | scanned path (never the sidecar's, which may be stale) |
//! | `year` | sidecar, else the year directory |
//! | `category` | sidecar display name, else the category directory |
//! | `uploader_name`, `taken_at`, `people` | sidecar, else empty |
//!
//! ## Ordering
//!
//! Ids already present in the previous manifest keep their relative order.
//! New ids are appended sorted by year (newest first), then category
//! (case-insensitive), then id (numeric ids numerically, before any
//! non-numeric id).

use crate::store::{self, AssetIndex, MirrorStore, ScannedAsset, StoreError};
use crate::types::{ManifestEntry, MetaSidecar};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("mirror error: {0}")]
    Store(#[from] StoreError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Knobs for [`rebuild`].
#[derive(Debug, Clone, Copy)]
pub struct RebuildOptions<'a> {
    /// Manifest file name relative to the mirror root.
    pub manifest_name: &'a str,
    /// Prepended to every `src`.
    pub src_prefix: &'a str,
}

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub manifest_path: PathBuf,
    pub entries: usize,
    /// Entries that kept their position from the previous manifest.
    pub retained: usize,
    /// Entries new since the previous manifest.
    pub appended: usize,
    /// Ids in the previous manifest that no longer have an asset.
    pub removed: usize,
    /// Assets indexed without a readable sidecar.
    pub without_sidecar: usize,
    /// Ids whose asset vanished between scan and write.
    pub dropped: Vec<String>,
    /// Extra asset files ignored because their id was already taken.
    pub duplicates: Vec<String>,
    /// Whether the file on disk changed.
    pub written: bool,
}

/// A manifest entry together with the asset path it was built from.
#[derive(Debug, Clone)]
pub struct BuiltEntry {
    pub entry: ManifestEntry,
    pub rel_path: String,
}

/// Rescan the mirror and write the manifest.
pub fn rebuild(
    store: &MirrorStore,
    options: &RebuildOptions<'_>,
) -> Result<RebuildReport, ManifestError> {
    let manifest_path = store.root().join(options.manifest_name);
    let index = store.scan_assets()?;
    let prior_ids = load_prior_ids(&manifest_path);

    let mut report = RebuildReport {
        manifest_path: manifest_path.clone(),
        duplicates: index.duplicates.iter().map(|d| d.rel_path.clone()).collect(),
        ..Default::default()
    };

    let built = build_entries(store, &index, options.src_prefix, &mut report);
    let ordered = order_entries(&prior_ids, built);
    let (kept, dropped) = drop_vanished(store, ordered);

    let prior_set: std::collections::HashSet<&str> =
        prior_ids.iter().map(String::as_str).collect();
    report.retained = kept
        .iter()
        .filter(|b| prior_set.contains(b.entry.id.as_str()))
        .count();
    report.appended = kept.len() - report.retained;
    report.removed = prior_ids
        .iter()
        .filter(|id| !kept.iter().any(|b| &b.entry.id == *id))
        .count();
    report.dropped = dropped;
    report.entries = kept.len();

    let entries: Vec<ManifestEntry> = kept.into_iter().map(|b| b.entry).collect();
    let rendered = render(&entries)?;
    let unchanged = std::fs::read(&manifest_path)
        .map(|existing| existing == rendered.as_bytes())
        .unwrap_or(false);
    if unchanged {
        debug!(path = %manifest_path.display(), "manifest unchanged");
    } else {
        store::write_atomic(&manifest_path, rendered.as_bytes())?;
        report.written = true;
    }

    info!(
        entries = report.entries,
        appended = report.appended,
        removed = report.removed,
        written = report.written,
        "manifest rebuilt"
    );
    Ok(report)
}

/// One entry per indexed asset, in id order.
pub fn build_entries(
    store: &MirrorStore,
    index: &AssetIndex,
    src_prefix: &str,
    report: &mut RebuildReport,
) -> Vec<BuiltEntry> {
    index
        .iter()
        .map(|asset| {
            let sidecar = store.read_sidecar(&asset.id).filter(|s| {
                let matches = s.id.is_empty() || s.id == asset.id;
                if !matches {
                    warn!(id = %asset.id, sidecar_id = %s.id, "sidecar belongs to another id; ignoring");
                }
                matches
            });
            if sidecar.is_none() {
                report.without_sidecar += 1;
            }
            BuiltEntry {
                entry: build_entry(asset, sidecar.as_ref(), src_prefix),
                rel_path: asset.rel_path.clone(),
            }
        })
        .collect()
}

/// Merge a scanned asset with its sidecar.
pub fn build_entry(
    asset: &ScannedAsset,
    sidecar: Option<&MetaSidecar>,
    src_prefix: &str,
) -> ManifestEntry {
    let category = sidecar_text(sidecar, |s| Some(s.category.as_str()));
    ManifestEntry {
        id: asset.id.clone(),
        year: sidecar
            .and_then(|s| s.year)
            .filter(|y| *y > 0)
            .unwrap_or(asset.year),
        category: if category.is_empty() {
            asset.category_slug.clone()
        } else {
            category
        },
        uploader_name: sidecar_text(sidecar, |s| Some(s.uploader_name.as_str())),
        taken_at: sidecar_text(sidecar, |s| s.taken_at.as_deref()),
        people: sidecar_text(sidecar, |s| s.people.as_deref()),
        src: format!("{src_prefix}{}", asset.rel_path),
    }
}

fn sidecar_text(
    sidecar: Option<&MetaSidecar>,
    pick: impl Fn(&MetaSidecar) -> Option<&str>,
) -> String {
    sidecar
        .and_then(pick)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// Ids of the previous manifest, in order. Missing or unreadable → empty.
pub fn load_prior_ids(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let items: Vec<serde_json::Value> = match serde_json::from_str(&content) {
        Ok(items) => items,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "previous manifest unreadable; ordering from scratch");
            return Vec::new();
        }
    };
    items
        .iter()
        .filter_map(|item| match item.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Previous order first, then new entries by [`compare_new`].
pub fn order_entries(prior_ids: &[String], entries: Vec<BuiltEntry>) -> Vec<BuiltEntry> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, id) in prior_ids.iter().enumerate() {
        position.entry(id.as_str()).or_insert(i);
    }

    let (mut retained, mut fresh): (Vec<BuiltEntry>, Vec<BuiltEntry>) = entries
        .into_iter()
        .partition(|b| position.contains_key(b.entry.id.as_str()));
    retained.sort_by_key(|b| position[b.entry.id.as_str()]);
    fresh.sort_by(|a, b| compare_new(&a.entry, &b.entry));

    retained.extend(fresh);
    retained
}

/// Sort rule for entries without a previous position.
pub fn compare_new(a: &ManifestEntry, b: &ManifestEntry) -> Ordering {
    b.year
        .cmp(&a.year)
        .then_with(|| a.category.to_lowercase().cmp(&b.category.to_lowercase()))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| compare_ids(&a.id, &b.id))
}

/// Numeric ids numerically, ahead of non-numeric ids; otherwise by string.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Keep entries whose asset still exists; return the ids of the rest.
pub fn drop_vanished(
    store: &MirrorStore,
    entries: Vec<BuiltEntry>,
) -> (Vec<BuiltEntry>, Vec<String>) {
    let mut dropped = Vec::new();
    let kept = entries
        .into_iter()
        .filter(|b| {
            let exists = store.asset_exists(&b.rel_path);
            if !exists {
                warn!(id = %b.entry.id, path = %b.rel_path, "asset vanished during rebuild; dropping entry");
                dropped.push(b.entry.id.clone());
            }
            exists
        })
        .collect();
    (kept, dropped)
}

/// Pretty JSON array with a trailing newline.
pub fn render(entries: &[ManifestEntry]) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string_pretty(entries)?;
    json.push('\n');
    Ok(json)
}
