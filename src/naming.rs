//! Destination naming for mirrored assets.
//!
//! Every approved record maps to exactly one local path:
//!
//! ```text
//! full/<year>/<category-slug>/<id>.<ext>
//! ```
//!
//! Each part has its own fallback chain, and every function here is pure and
//! total: missing or odd input degrades to a safe default instead of failing.
//!
//! | Part | First available wins |
//! |------|----------------------|
//! | year | `record.year` → year of `taken_at` → caller-supplied fallback (current year) |
//! | category slug | alias table → slugified display name → `other` |
//! | extension | object key suffix (`jpeg` → `jpg`) → `jpg` |
//!
//! The layout is a compatibility contract with the gallery renderer, which
//! also derives thumbnail paths from it by swapping `full/` for `thumbs/`.

use crate::types::SourceRecord;
use chrono::{DateTime, Datelike, NaiveDate};
use std::collections::BTreeMap;

/// Directory (relative to the mirror root) holding full-size assets.
pub const FULL_DIR: &str = "full";

/// Directory (relative to the mirror root) holding generated thumbnails.
pub const THUMBS_DIR: &str = "thumbs";

/// Slug used when a category is missing or slugifies to nothing.
pub const FALLBACK_CATEGORY: &str = "other";

/// Extension used when the object key has none we recognize.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Image extensions the mirror accepts, already normalized.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png", "webp", "gif"];

/// Fully resolved destination of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub year: i32,
    pub category_slug: String,
    pub extension: String,
    /// Forward-slash path relative to the mirror root.
    pub local_path: String,
}

/// Resolve the destination of a record.
///
/// `fallback_year` is only used when neither `year` nor `taken_at` yields one;
/// callers pass [`current_year`] so the function itself stays deterministic.
pub fn resolve(
    record: &SourceRecord,
    aliases: &BTreeMap<String, String>,
    fallback_year: i32,
) -> ResolvedPath {
    let year = resolve_year(record.year, record.taken_at.as_deref(), fallback_year);
    let category_slug = category_slug(record.category.as_deref(), aliases);
    let extension = extension_for(record.object_key()).to_string();
    let local_path = asset_path(year, &category_slug, &record.id, &extension);
    ResolvedPath {
        year,
        category_slug,
        extension,
        local_path,
    }
}

/// Pick the year bucket for a record.
pub fn resolve_year(year: Option<i32>, taken_at: Option<&str>, fallback_year: i32) -> i32 {
    year.filter(|y| *y > 0)
        .or_else(|| taken_at.and_then(year_from_date))
        .unwrap_or(fallback_year)
}

/// Extract the year from a date or timestamp string.
///
/// Accepts RFC 3339 timestamps and anything starting with `yyyy-mm-dd`
/// (plain dates from the upload form, Postgres `timestamp` text).
pub fn year_from_date(value: &str) -> Option<i32> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.year());
    }
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// The current calendar year in local time.
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

/// Directory name for a display category.
///
/// Known categories map through the alias table (exact match on the trimmed
/// name); everything else is slugified. Alias targets are slugified too, so a
/// hand-written alias can never escape the layout.
pub fn category_slug(category: Option<&str>, aliases: &BTreeMap<String, String>) -> String {
    let name = category.map(str::trim).unwrap_or_default();
    let candidate = aliases.get(name).map(String::as_str).unwrap_or(name);
    let slug = slugify(candidate);
    if slug.is_empty() {
        FALLBACK_CATEGORY.to_string()
    } else {
        slug
    }
}

/// Reduce free text to `[a-z0-9_-]`.
///
/// - lower-cases
/// - whitespace and slashes become dashes
/// - every other character outside the allowed set is dropped
/// - runs of dashes collapse, leading and trailing dashes are trimmed
///
/// Returns an empty string when nothing survives.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut prev_dash = false;
    for c in text.to_lowercase().chars() {
        let mapped = if c.is_whitespace() || c == '/' || c == '\\' {
            '-'
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            c
        } else {
            continue;
        };
        if mapped == '-' {
            if !prev_dash {
                slug.push('-');
            }
            prev_dash = true;
        } else {
            slug.push(mapped);
            prev_dash = false;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Normalized image extension for an object key.
pub fn extension_for(object_path: Option<&str>) -> &'static str {
    object_path
        .and_then(|p| p.rsplit('/').next())
        .and_then(|name| name.rsplit_once('.'))
        .and_then(|(_, ext)| normalize_extension(ext))
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Map a raw extension onto [`IMAGE_EXTENSIONS`], if it is one.
pub fn normalize_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.trim().to_ascii_lowercase();
    let ext = if ext == "jpeg" { "jpg" } else { ext.as_str() };
    IMAGE_EXTENSIONS.iter().find(|known| **known == ext).copied()
}

/// Build `full/<year>/<slug>/<id>.<ext>`.
pub fn asset_path(year: i32, category_slug: &str, id: &str, extension: &str) -> String {
    format!("{FULL_DIR}/{year}/{category_slug}/{id}.{extension}")
}

/// Thumbnail path the renderer derives from an asset path.
pub fn thumb_path_for(asset_path: &str) -> String {
    match asset_path.strip_prefix(FULL_DIR) {
        Some(rest) if rest.starts_with('/') => format!("{THUMBS_DIR}{rest}"),
        _ => asset_path.replacen("/full/", "/thumbs/", 1),
    }
}

/// Whether an id can be used verbatim as a file stem.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
        && !id.chars().any(char::is_control)
}

/// The alias table the upload form uses for its fixed category list.
pub fn default_category_aliases() -> BTreeMap<String, String> {
    [
        ("比赛实况", "match"),
        ("训练物料", "training"),
        ("路透花絮", "candid"),
        ("饭制同人", "fanart"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
