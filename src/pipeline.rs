//! Pipeline Driver: sequence the stages for one invocation.
//!
//! | Mode | Steps |
//! |---|---|
//! | [`RunMode::Export`] | list → export → rebuild → thumbnails (if enabled) |
//! | [`RunMode::ExportAndCleanup`] | as above, then cleanup |
//! | [`RunMode::CleanupOnly`] | rebuild → cleanup |
//! | [`RunMode::RebuildOnly`] | rebuild |
//! | [`RunMode::ThumbsOnly`] | scan → thumbnails |
//!
//! Only configuration and listing problems abort a run. Everything per item
//! ends up in the stage reports inside [`RunSummary`].

use crate::cleanup::{self, CleanupError, CleanupOptions, CleanupReport};
use crate::config::{ConfigError, SyncConfig};
use crate::export::{self, ExportError, ExportOptions, ExportReport};
use crate::manifest::{self, ManifestError, RebuildOptions, RebuildReport};
use crate::naming;
use crate::remote::{RemoteError, RemoteGateway, SupabaseGateway};
use crate::store::{MirrorStore, StoreError};
use crate::thumbs::{self, ThumbReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot list approved records: {0}")]
    Listing(#[source] RemoteError),
    #[error("this run mode needs a remote gateway")]
    MissingGateway,
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Process exit code, sysexits style.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78,
            Self::Listing(_) | Self::Cleanup(CleanupError::Listing(_)) => 69,
            Self::Export(ExportError::Store(_))
            | Self::Manifest(ManifestError::Store(_))
            | Self::Cleanup(CleanupError::Store(_))
            | Self::Store(_) => 74,
            _ => 1,
        }
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Export,
    ExportAndCleanup,
    CleanupOnly,
    RebuildOnly,
    ThumbsOnly,
}

impl RunMode {
    pub fn needs_remote(self) -> bool {
        matches!(
            self,
            Self::Export | Self::ExportAndCleanup | Self::CleanupOnly
        )
    }
}

/// Cooperative cancellation flag, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reports of the stages that ran.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub export: Option<ExportReport>,
    pub manifest: Option<RebuildReport>,
    pub thumbs: Option<ThumbReport>,
    pub cleanup: Option<CleanupReport>,
}

impl RunSummary {
    /// Per-item failures across all stages.
    pub fn failure_count(&self) -> usize {
        self.export.as_ref().map_or(0, |r| r.failures.len())
            + self.thumbs.as_ref().map_or(0, |r| r.failures.len())
            + self.cleanup.as_ref().map_or(0, |r| r.failures.len())
    }

    pub fn cancelled(&self) -> bool {
        self.export.as_ref().is_some_and(|r| r.cancelled)
            || self.cleanup.as_ref().is_some_and(|r| r.cancelled)
    }
}

/// Build the production gateway when the mode needs one.
///
/// Credentials are checked here, before any I/O.
pub fn connect(mode: RunMode, config: &SyncConfig) -> Result<Option<SupabaseGateway>, PipelineError> {
    if !mode.needs_remote() {
        return Ok(None);
    }
    config.remote.require_credentials()?;
    let gateway = SupabaseGateway::new(&config.remote)
        .map_err(|e| ConfigError::Validation(format!("remote.url: {e}")))?;
    Ok(Some(gateway))
}

/// Run the stages of `mode` against `config.mirror.root`.
pub fn run(
    mode: RunMode,
    config: &SyncConfig,
    gateway: Option<&dyn RemoteGateway>,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError> {
    let gateway = match (mode.needs_remote(), gateway) {
        (true, None) => return Err(PipelineError::MissingGateway),
        (_, gateway) => gateway,
    };
    let store = MirrorStore::new(&config.mirror.root);
    let rebuild_options = RebuildOptions {
        manifest_name: &config.mirror.manifest,
        src_prefix: &config.mirror.src_prefix,
    };
    let mut summary = RunSummary::default();
    info!(?mode, root = %store.root().display(), "run starting");

    match (mode, gateway) {
        (RunMode::Export | RunMode::ExportAndCleanup, Some(gateway)) => {
            let records = gateway.list_approved().map_err(PipelineError::Listing)?;
            info!(approved = records.len(), "listed approved records");
            let options = ExportOptions {
                aliases: &config.categories,
                fallback_year: naming::current_year(),
            };
            let report = export::export(gateway, &records, &store, &options, cancel)?;
            let cancelled = report.cancelled;
            summary.export = Some(report);
            summary.manifest = Some(manifest::rebuild(&store, &rebuild_options)?);
            if config.thumbnails.enabled && !cancelled {
                let index = store.scan_assets()?;
                summary.thumbs = Some(thumbs::generate(&store, &index, &config.thumbnails));
            }
            if mode == RunMode::ExportAndCleanup {
                if cancelled {
                    warn!("export was cancelled; skipping cleanup");
                } else {
                    let options = CleanupOptions::from_config(config);
                    summary.cleanup = Some(cleanup::cleanup(gateway, &store, &options, cancel)?);
                }
            }
        }
        (RunMode::CleanupOnly, Some(gateway)) => {
            summary.manifest = Some(manifest::rebuild(&store, &rebuild_options)?);
            let options = CleanupOptions::from_config(config);
            summary.cleanup = Some(cleanup::cleanup(gateway, &store, &options, cancel)?);
        }
        (RunMode::RebuildOnly, _) => {
            summary.manifest = Some(manifest::rebuild(&store, &rebuild_options)?);
        }
        (RunMode::ThumbsOnly, _) => {
            let index = store.scan_assets()?;
            summary.thumbs = Some(thumbs::generate(&store, &index, &config.thumbnails));
        }
        (_, None) => return Err(PipelineError::MissingGateway),
    }

    info!(failures = summary.failure_count(), "run finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanupMode;
    use crate::test_helpers::*;
    use tempfile::TempDir;

    fn config_for(root: &std::path::Path) -> SyncConfig {
        let mut config = SyncConfig::stock();
        config.mirror.root = root.to_path_buf();
        config
    }

    #[test]
    fn export_run_writes_assets_and_manifest() {
        let tmp = TempDir::new().unwrap();
        let gateway = MockGateway::new()
            .with_record(approved("7", "uploads/2024/x.jpg", "比赛实况", 2024), b"x");

        let summary = run(RunMode::Export, &config_for(tmp.path()), Some(&gateway), &CancelToken::new()).unwrap();

        assert_eq!(summary.export.as_ref().unwrap().downloaded, 1);
        assert_eq!(summary.manifest.as_ref().unwrap().entries, 1);
        assert!(summary.cleanup.is_none());
        assert!(summary.thumbs.is_none());
        assert_eq!(
            list_files(tmp.path()),
            vec!["full/2024/match/7.jpg", "manifest.json", "meta/7.json"]
        );
    }

    #[test]
    fn export_and_cleanup_respects_default_dry_run() {
        let tmp = TempDir::new().unwrap();
        let gateway = MockGateway::new()
            .with_record(approved("7", "uploads/2024/x.jpg", "比赛实况", 2024), b"x");
        let mut config = config_for(tmp.path());
        config.cleanup.mode = CleanupMode::Both;

        let summary = run(RunMode::ExportAndCleanup, &config, Some(&gateway), &CancelToken::new()).unwrap();

        let cleanup = summary.cleanup.unwrap();
        assert!(cleanup.dry_run);
        assert_eq!(cleanup.candidates, 1);
        assert_eq!(gateway.delete_call_count(), 0);
    }

    #[test]
    fn cleanup_only_rebuilds_then_cleans() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "full/2024/match/7.jpg", b"x");
        let gateway = MockGateway::new()
            .with_record(approved("7", "uploads/2024/x.jpg", "比赛实况", 2024), b"x");
        let mut config = config_for(tmp.path());
        config.cleanup.mode = CleanupMode::Table;
        config.cleanup.dry_run = false;

        let summary = run(RunMode::CleanupOnly, &config, Some(&gateway), &CancelToken::new()).unwrap();

        assert!(summary.export.is_none());
        assert_eq!(summary.manifest.unwrap().entries, 1);
        assert_eq!(summary.cleanup.unwrap().table_deleted, 1);
        assert_eq!(gateway.download_count(), 0);
        assert!(!gateway.has_row("7"));
    }

    #[test]
    fn rebuild_only_needs_no_gateway() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "full/2024/match/7.jpg", b"x");

        let summary = run(RunMode::RebuildOnly, &config_for(tmp.path()), None, &CancelToken::new()).unwrap();

        assert_eq!(summary.manifest.unwrap().entries, 1);
    }

    #[test]
    fn remote_modes_require_a_gateway() {
        let tmp = TempDir::new().unwrap();
        let err = run(RunMode::CleanupOnly, &config_for(tmp.path()), None, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingGateway));
    }

    #[test]
    fn listing_failure_aborts_with_unavailable_code() {
        let tmp = TempDir::new().unwrap();
        let gateway = MockGateway::new().failing_listing();

        let err = run(RunMode::Export, &config_for(tmp.path()), Some(&gateway), &CancelToken::new()).unwrap_err();

        assert!(matches!(err, PipelineError::Listing(_)));
        assert_eq!(err.exit_code(), 69);
        assert!(list_files(tmp.path()).is_empty());
    }

    #[test]
    fn listing_timeout_aborts_with_unavailable_code() {
        let tmp = TempDir::new().unwrap();
        let gateway = MockGateway::new()
            .with_record(approved("7", "uploads/2024/x.jpg", "match", 2024), b"x")
            .failing_listing_with(RemoteError::Timeout("listing after 30s".into()));

        let err = run(RunMode::Export, &config_for(tmp.path()), Some(&gateway), &CancelToken::new()).unwrap_err();

        assert!(matches!(err, PipelineError::Listing(RemoteError::Timeout(_))));
        assert_eq!(err.exit_code(), 69);
        assert_eq!(gateway.download_count(), 0);
        assert!(list_files(tmp.path()).is_empty());
    }

    #[test]
    fn cancelled_export_skips_cleanup() {
        let tmp = TempDir::new().unwrap();
        let gateway = MockGateway::new()
            .with_record(approved("7", "uploads/2024/x.jpg", "比赛实况", 2024), b"x");
        let mut config = config_for(tmp.path());
        config.cleanup.mode = CleanupMode::Both;
        config.cleanup.dry_run = false;
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = run(RunMode::ExportAndCleanup, &config, Some(&gateway), &cancel).unwrap();

        assert!(summary.cancelled());
        assert!(summary.cleanup.is_none());
        assert!(gateway.has_row("7"));
    }

    #[test]
    fn connect_checks_credentials_first() {
        let config = SyncConfig::stock();
        assert!(connect(RunMode::RebuildOnly, &config).unwrap().is_none());
        let err = connect(RunMode::Export, &config).err().unwrap();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::MissingCredentials)
        ));
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn exit_codes_by_error_kind() {
        let io = || std::io::Error::other("disk full");
        assert_eq!(PipelineError::Store(StoreError::Io(io())).exit_code(), 74);
        assert_eq!(
            PipelineError::Cleanup(CleanupError::Listing(RemoteError::Timeout("t".into()))).exit_code(),
            69
        );
        assert_eq!(PipelineError::MissingGateway.exit_code(), 1);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
