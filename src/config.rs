//! Run configuration.
//!
//! Configuration is layered. Each layer only needs the keys it overrides:
//!
//! ```text
//! stock defaults            SyncConfig::default()
//!   ← gallery-sync.toml     optional, sparse, unknown keys rejected
//!   ← environment           SUPABASE_*, CLEANUP_*, REMOTE_TIMEOUT_SECS
//!   ← CLI flags             --root, --mode, --dry-run / --no-dry-run
//! ```
//!
//! The config is built once at startup and passed by reference into every
//! stage. Nothing reads the environment after [`apply_env`] has run.
//!
//! ## Configuration Options
//!
//! ```toml
//! [remote]
//! url = ""                 # SUPABASE_URL
//! service_key = ""         # SUPABASE_SERVICE_ROLE_KEY (prefer the env var)
//! bucket = "photos"        # SUPABASE_BUCKET
//! table = "photos"         # SUPABASE_DB_TABLE
//! timeout_secs = 30        # REMOTE_TIMEOUT_SECS
//!
//! [mirror]
//! root = "assets"
//! manifest = "manifest.json"
//! src_prefix = ""
//!
//! [cleanup]
//! mode = "none"            # CLEANUP_MODE: none | table | storage | both
//! dry_run = true           # CLEANUP_DRY_RUN
//! storage_batch = 100
//! table_batch = 200
//! # object_prefix = "uploads/"
//!
//! [categories]
//! "比赛实况" = "match"
//!
//! [thumbnails]
//! enabled = false
//! max_edge = 480
//! quality = 85
//!
//! [processing]
//! # max_processes = 4
//! ```
//!
//! Credentials are checked lazily by [`RemoteConfig::require_credentials`]:
//! only run modes that talk to the remote need them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "gallery-sync.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Missing SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY")]
    MissingCredentials,
    #[error("Invalid CLEANUP_MODE \"{0}\". Use: none | table | storage | both")]
    InvalidCleanupMode(String),
    #[error("Invalid boolean for {name}: \"{value}\"")]
    InvalidBool { name: String, value: String },
    #[error("Invalid number for {name}: \"{value}\"")]
    InvalidNumber { name: String, value: String },
}

/// Full run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub mirror: MirrorConfig,
    pub cleanup: CleanupConfig,
    /// Display category → directory name.
    pub categories: BTreeMap<String, String>,
    pub thumbnails: ThumbnailsConfig,
    pub processing: ProcessingConfig,
}

impl SyncConfig {
    /// Stock defaults, including the upload form's category aliases.
    pub fn stock() -> Self {
        Self {
            categories: crate::naming::default_category_aliases(),
            ..Self::default()
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be positive".into(),
            ));
        }
        if self.cleanup.storage_batch == 0 || self.cleanup.table_batch == 0 {
            return Err(ConfigError::Validation(
                "cleanup batch sizes must be positive".into(),
            ));
        }
        if self.thumbnails.quality == 0 || self.thumbnails.quality > 100 {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 1-100".into(),
            ));
        }
        if self.thumbnails.max_edge == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.max_edge must be positive".into(),
            ));
        }
        if self.mirror.manifest.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mirror.manifest must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Remote database and object storage endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: String,
    pub service_key: String,
    pub bucket: String,
    pub table: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            bucket: "photos".to_string(),
            table: "photos".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Fail unless both endpoint and key are present.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() || self.service_key.trim().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }
}

// The service key never reaches logs or panic messages.
impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("service_key_len", &self.service_key.len())
            .field("bucket", &self.bucket)
            .field("table", &self.table)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Local mirror layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Mirror root; `full/`, `meta/` and `thumbs/` live below it.
    pub root: PathBuf,
    /// Manifest file name, relative to the root.
    pub manifest: String,
    /// Prepended to every manifest `src` (e.g. `assets/` when the page sits
    /// one level above the mirror root).
    pub src_prefix: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            manifest: "manifest.json".to_string(),
            src_prefix: String::new(),
        }
    }
}

/// Which remote copies the cleanup stage may delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    #[default]
    None,
    #[serde(alias = "db_only")]
    Table,
    Storage,
    #[serde(alias = "db_and_storage")]
    Both,
}

impl CleanupMode {
    pub fn deletes_objects(self) -> bool {
        matches!(self, Self::Storage | Self::Both)
    }

    pub fn deletes_rows(self) -> bool {
        matches!(self, Self::Table | Self::Both)
    }
}

impl FromStr for CleanupMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "table" | "db_only" => Ok(Self::Table),
            "storage" => Ok(Self::Storage),
            "both" | "db_and_storage" => Ok(Self::Both),
            _ => Err(ConfigError::InvalidCleanupMode(s.to_string())),
        }
    }
}

impl fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Table => "table",
            Self::Storage => "storage",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

/// Cleanup stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupConfig {
    pub mode: CleanupMode,
    /// Log intended deletions without performing them. On unless disabled.
    pub dry_run: bool,
    pub storage_batch: usize,
    pub table_batch: usize,
    /// Only delete storage objects under this key prefix.
    pub object_prefix: Option<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            mode: CleanupMode::None,
            dry_run: true,
            storage_batch: 100,
            table_batch: 200,
            object_prefix: None,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Generate thumbnails after export runs.
    pub enabled: bool,
    /// Longer edge of a thumbnail in pixels.
    pub max_edge: u32,
    /// JPEG encoding quality (1-100).
    pub quality: u8,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_edge: 480,
            quality: 85,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel thumbnail workers.
    /// When absent, defaults to the number of CPU cores.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, at least one
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Loading, merging, environment
// =============================================================================

/// Returns the stock config as a `toml::Value::Table`, the base layer for
/// merging user overrides.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SyncConfig::stock())
        .map_err(|e| ConfigError::Validation(format!("stock config does not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<SyncConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SyncConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the file layer.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_FILE`] is used
/// if present and stock defaults otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<SyncConfig, ConfigError> {
    let overlay = match explicit {
        Some(path) => Some(load_raw_config(path)?),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                Some(load_raw_config(default_path)?)
            } else {
                None
            }
        }
    };
    resolve_config(overlay)
}

/// Apply the environment layer.
///
/// `lookup` is `std::env::var(..).ok()` in production and a map in tests.
/// Blank values count as unset.
pub fn apply_env<F>(mut config: SyncConfig, lookup: F) -> Result<SyncConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(url) = get("SUPABASE_URL") {
        config.remote.url = url;
    }
    if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY") {
        config.remote.service_key = key;
    }
    if let Some(bucket) = get("SUPABASE_BUCKET") {
        config.remote.bucket = bucket;
    }
    if let Some(table) = get("SUPABASE_DB_TABLE") {
        config.remote.table = table;
    }
    if let Some(secs) = get("REMOTE_TIMEOUT_SECS") {
        config.remote.timeout_secs = secs.parse().map_err(|_| ConfigError::InvalidNumber {
            name: "REMOTE_TIMEOUT_SECS".into(),
            value: secs.clone(),
        })?;
    }
    if let Some(mode) = get("CLEANUP_MODE") {
        config.cleanup.mode = mode.parse()?;
    }
    if let Some(dry) = lookup("CLEANUP_DRY_RUN") {
        config.cleanup.dry_run = parse_bool("CLEANUP_DRY_RUN", &dry, config.cleanup.dry_run)?;
    }

    config.validate()?;
    Ok(config)
}

/// Parse a boolean flag; blank means `default`.
pub fn parse_bool(name: &str, value: &str, default: bool) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Returns a fully-commented stock config file.
///
/// Used by `--gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# gallery-sync configuration
# ==========================
# All settings are optional. Values shown are the defaults.
# Environment variables (shown in brackets) override this file,
# and CLI flags override both.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Remote database + object storage
# ---------------------------------------------------------------------------
[remote]
# Project URL [SUPABASE_URL]
url = ""
# Service role key [SUPABASE_SERVICE_ROLE_KEY]. Prefer the env var.
service_key = ""
# Storage bucket holding uploads [SUPABASE_BUCKET]
bucket = "photos"
# Table holding submissions [SUPABASE_DB_TABLE]
table = "photos"
# Per-request timeout in seconds [REMOTE_TIMEOUT_SECS]
timeout_secs = 30

# ---------------------------------------------------------------------------
# Local mirror
# ---------------------------------------------------------------------------
[mirror]
# Root of the mirrored tree: full/, meta/, thumbs/ and the manifest.
root = "assets"
# Manifest file name, relative to root.
manifest = "manifest.json"
# Prefix added to every manifest src.
src_prefix = ""

# ---------------------------------------------------------------------------
# Remote cleanup after export
# ---------------------------------------------------------------------------
[cleanup]
# none | table | storage | both [CLEANUP_MODE]
mode = "none"
# Log deletions instead of performing them [CLEANUP_DRY_RUN]
dry_run = true
# Keys per storage delete call
storage_batch = 100
# Ids per table delete call
table_batch = 200
# Only delete storage objects under this prefix.
# object_prefix = "uploads/"

# ---------------------------------------------------------------------------
# Display category -> directory name
# ---------------------------------------------------------------------------
[categories]
"比赛实况" = "match"
"训练物料" = "training"
"路透花絮" = "candid"
"饭制同人" = "fanart"

# ---------------------------------------------------------------------------
# Thumbnails (thumbs/<year>/<category>/<id>.<ext>)
# ---------------------------------------------------------------------------
[thumbnails]
# Generate after each export run
enabled = false
# Longer edge in pixels
max_edge = 480
# JPEG quality (1-100)
quality = 85

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel thumbnail workers.
# Omit to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
