//! The local mirror: image files, metadata sidecars and the tree scan.
//!
//! ```text
//! assets/                        # mirror root
//! ├── manifest.json              # derived, see crate::manifest
//! ├── full/
//! │   └── 2024/
//! │       └── match/
//! │           └── 7.jpg          # LocalAsset, never rewritten once present
//! ├── meta/
//! │   └── 7.json                 # MetaSidecar, rewritten every export run
//! └── thumbs/
//!     └── 2024/match/7.jpg       # optional, see crate::thumbs
//! ```
//!
//! The tree is the source of truth. There is no separate index on disk: the
//! [`AssetIndex`] built by [`MirrorStore::scan_assets`] lives only for the
//! duration of one pass.
//!
//! All writes go through [`write_atomic`]: bytes land in a hidden temp file in
//! the destination directory and are renamed into place, so a crash never
//! leaves a partial file under a final name. Hidden files are ignored by the
//! scan, which keeps stray temp files out of the manifest.

use crate::naming::{self, FULL_DIR};
use crate::types::MetaSidecar;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory (relative to the mirror root) holding sidecars.
pub const META_DIR: &str = "meta";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to walk mirror tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to move temp file into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// One image found under `full/<year>/<slug>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedAsset {
    pub id: String,
    pub year: i32,
    pub category_slug: String,
    pub extension: String,
    /// Forward-slash path relative to the mirror root.
    pub rel_path: String,
}

/// In-memory view of the assets on disk, keyed by id.
#[derive(Debug, Default)]
pub struct AssetIndex {
    by_id: BTreeMap<String, ScannedAsset>,
    /// Extra files for an id that already has an asset. Reported, never listed.
    pub duplicates: Vec<ScannedAsset>,
}

impl AssetIndex {
    pub fn get(&self, id: &str) -> Option<&ScannedAsset> {
        self.by_id.get(id)
    }

    /// Assets in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ScannedAsset> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Record an asset. When the id is already known the lexicographically
    /// smaller path wins, so the choice does not depend on walk order.
    pub fn insert(&mut self, asset: ScannedAsset) {
        match self.by_id.get_mut(&asset.id) {
            Some(existing) if asset.rel_path < existing.rel_path => {
                let previous = std::mem::replace(existing, asset);
                self.duplicates.push(previous);
            }
            Some(_) => self.duplicates.push(asset),
            None => {
                self.by_id.insert(asset.id.clone(), asset);
            }
        }
    }
}

/// Handle on a mirror root directory.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    root: PathBuf,
}

impl MirrorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn a forward-slash relative path into a filesystem path.
    pub fn path_of(&self, rel_path: &str) -> PathBuf {
        rel_path
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    pub fn asset_exists(&self, rel_path: &str) -> bool {
        self.path_of(rel_path).is_file()
    }

    /// Create the parent directories of a relative path.
    pub fn ensure_parent(&self, rel_path: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path_of(rel_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Write an asset atomically. Returns the hex SHA-256 of the bytes.
    pub fn write_asset(&self, rel_path: &str, bytes: &[u8]) -> Result<String, StoreError> {
        write_atomic(&self.path_of(rel_path), bytes)?;
        Ok(hash_bytes(bytes))
    }

    pub fn sidecar_path(&self, id: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{id}.json"))
    }

    /// Load a sidecar. Missing or unreadable sidecars yield `None`.
    pub fn read_sidecar(&self, id: &str) -> Option<MetaSidecar> {
        let path = self.sidecar_path(id);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable sidecar");
                None
            }
        }
    }

    pub fn write_sidecar(&self, sidecar: &MetaSidecar) -> Result<(), StoreError> {
        let mut json = serde_json::to_string_pretty(sidecar)?;
        json.push('\n');
        write_atomic(&self.sidecar_path(&sidecar.id), json.as_bytes())
    }

    /// Walk `full/` and index every image by id.
    ///
    /// Only files exactly at `full/<year>/<slug>/<id>.<ext>` with a numeric
    /// year and a known image extension count. Everything else is skipped
    /// with a debug log. A missing `full/` directory is an empty mirror.
    pub fn scan_assets(&self) -> Result<AssetIndex, StoreError> {
        let full = self.root.join(FULL_DIR);
        let mut index = AssetIndex::default();
        if !full.is_dir() {
            return Ok(index);
        }

        let walker = WalkDir::new(&full)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            match parse_asset_path(rel) {
                Some(asset) => index.insert(asset),
                None => debug!(path = %rel.display(), "skipping non-asset file"),
            }
        }

        for dup in &index.duplicates {
            warn!(id = %dup.id, path = %dup.rel_path, "more than one asset for id; ignoring this one");
        }
        Ok(index)
    }
}

/// Parse `full/<year>/<slug>/<id>.<ext>` back into its parts.
pub fn parse_asset_path(rel: &Path) -> Option<ScannedAsset> {
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let [top, year, slug, file] = parts.as_slice() else {
        return None;
    };
    if top != FULL_DIR || is_hidden(file.as_ref()) {
        return None;
    }
    let year = year.parse::<i32>().ok().filter(|y| *y > 0)?;
    let (id, ext) = file.rsplit_once('.')?;
    let extension = naming::normalize_extension(ext)?;
    if !naming::is_safe_id(id) {
        return None;
    }
    Some(ScannedAsset {
        id: id.to_string(),
        year,
        category_slug: slug.clone(),
        extension: extension.to_string(),
        rel_path: format!("{FULL_DIR}/{year}/{slug}/{file}"),
    })
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Write bytes to `path` via a temp file in the same directory plus rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// SHA-256 of a byte slice, as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of a file's contents, as lowercase hex.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"img").unwrap();
    }

    #[test]
    fn parse_valid_asset_path() {
        let asset = parse_asset_path(Path::new("full/2024/match/7.jpeg")).unwrap();
        assert_eq!(asset.id, "7");
        assert_eq!(asset.year, 2024);
        assert_eq!(asset.category_slug, "match");
        assert_eq!(asset.extension, "jpg");
        assert_eq!(asset.rel_path, "full/2024/match/7.jpeg");
    }

    #[test]
    fn parse_rejects_other_shapes() {
        assert!(parse_asset_path(Path::new("full/2024/7.jpg")).is_none());
        assert!(parse_asset_path(Path::new("full/unknown/match/7.jpg")).is_none());
        assert!(parse_asset_path(Path::new("full/2024/match/7.txt")).is_none());
        assert!(parse_asset_path(Path::new("full/2024/match/.partial-x.jpg")).is_none());
        assert!(parse_asset_path(Path::new("thumbs/2024/match/7.jpg")).is_none());
    }

    #[test]
    fn scan_indexes_assets_and_skips_noise() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "full/2024/match/7.jpg");
        touch(tmp.path(), "full/2023/other/3.png");
        touch(tmp.path(), "full/2023/other/.partial-abc");
        touch(tmp.path(), "full/2023/other/notes.txt");
        touch(tmp.path(), "full/2023/stray.jpg");
        touch(tmp.path(), "meta/7.json");

        let index = MirrorStore::new(tmp.path()).scan_assets().unwrap();
        let ids: Vec<&str> = index.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "7"]);
        assert_eq!(index.get("7").unwrap().rel_path, "full/2024/match/7.jpg");
        assert!(index.duplicates.is_empty());
    }

    #[test]
    fn scan_of_missing_tree_is_empty() {
        let tmp = TempDir::new().unwrap();
        let index = MirrorStore::new(tmp.path().join("nope")).scan_assets().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn duplicate_ids_resolve_to_smallest_path() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "full/2024/match/7.jpg");
        touch(tmp.path(), "full/2023/other/7.png");

        let index = MirrorStore::new(tmp.path()).scan_assets().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("7").unwrap().rel_path, "full/2023/other/7.png");
        assert_eq!(index.duplicates.len(), 1);
        assert_eq!(index.duplicates[0].rel_path, "full/2024/match/7.jpg");
    }

    #[test]
    fn write_asset_is_atomic_and_hashed() {
        let tmp = TempDir::new().unwrap();
        let store = MirrorStore::new(tmp.path());
        let hash = store.write_asset("full/2024/match/7.jpg", b"hello world").unwrap();

        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(store.asset_exists("full/2024/match/7.jpg"));
        let leftovers: Vec<_> = fs::read_dir(tmp.path().join("full/2024/match"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn sidecar_roundtrip_and_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = MirrorStore::new(tmp.path());
        let sidecar = MetaSidecar {
            id: "7".into(),
            category: "比赛实况".into(),
            src: "full/2024/match/7.jpg".into(),
            year: Some(2024),
            ..Default::default()
        };
        store.write_sidecar(&sidecar).unwrap();
        assert_eq!(store.read_sidecar("7"), Some(sidecar));
        assert!(tmp.path().join("meta/7.json").is_file());

        fs::write(store.sidecar_path("8"), "{not json").unwrap();
        assert_eq!(store.read_sidecar("8"), None);
        assert_eq!(store.read_sidecar("9"), None);
    }

    #[test]
    fn path_of_uses_forward_slash_segments() {
        let store = MirrorStore::new("/srv/assets");
        assert_eq!(
            store.path_of("full/2024/match/7.jpg"),
            Path::new("/srv/assets").join("full").join("2024").join("match").join("7.jpg")
        );
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.bin");
        fs::write(&path, b"version 1").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"version 1"));
    }
}
