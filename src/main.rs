use clap::{ArgGroup, Parser};
use gallery_sync::config::{self, SyncConfig};
use gallery_sync::output;
use gallery_sync::pipeline::{self, CancelToken, PipelineError, RunMode};
use gallery_sync::remote::RemoteGateway;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "gallery-sync")]
#[command(about = "Mirror approved gallery submissions and rebuild the public manifest")]
#[command(long_about = "\
Mirror approved gallery submissions and rebuild the public manifest

Approved rows are read from the submissions table, their images are
downloaded once into the mirror, and manifest.json is rebuilt from disk.

Mirror layout:

  assets/
  ├── manifest.json                # Rebuilt every run, stable order
  ├── full/<year>/<category>/      # One image per approved id, never rewritten
  │   └── 7.jpg
  ├── meta/7.json                  # Display fields, refreshed every export
  └── thumbs/<year>/<category>/    # Optional, see [thumbnails]

Environment:
  SUPABASE_URL, SUPABASE_SERVICE_ROLE_KEY   required for remote modes
  SUPABASE_BUCKET, SUPABASE_DB_TABLE        default: photos
  CLEANUP_MODE                              none | table | storage | both
  CLEANUP_DRY_RUN                           default: true

Cleanup only deletes remote copies of items already on disk, and only
when CLEANUP_MODE is set. Dry-run stays on until explicitly disabled.

Run 'gallery-sync --gen-config' to print a documented gallery-sync.toml.")]
#[command(version)]
#[command(group(ArgGroup::new("run_mode").multiple(false)))]
struct Cli {
    /// Export, then clean up the remote copies of exported items
    #[arg(long, group = "run_mode")]
    cleanup: bool,

    /// Rebuild the manifest from disk, then clean up (no export)
    #[arg(long, group = "run_mode")]
    cleanup_only: bool,

    /// Only rebuild the manifest from disk (no network)
    #[arg(long, group = "run_mode")]
    rebuild_only: bool,

    /// Only generate missing thumbnails (no network)
    #[arg(long, group = "run_mode")]
    thumbs_only: bool,

    /// Print a stock gallery-sync.toml with all options documented
    #[arg(long, group = "run_mode")]
    gen_config: bool,

    /// Config file (default: ./gallery-sync.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror root directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// Cleanup mode: none | table | storage | both
    #[arg(long)]
    mode: Option<String>,

    /// Only log intended deletions
    #[arg(long, conflicts_with = "no_dry_run")]
    dry_run: bool,

    /// Actually perform deletions
    #[arg(long)]
    no_dry_run: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn run_mode(&self) -> RunMode {
        if self.cleanup {
            RunMode::ExportAndCleanup
        } else if self.cleanup_only {
            RunMode::CleanupOnly
        } else if self.rebuild_only {
            RunMode::RebuildOnly
        } else if self.thumbs_only {
            RunMode::ThumbsOnly
        } else {
            RunMode::Export
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "gallery_sync=debug"
    } else {
        "gallery_sync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<(), PipelineError> {
    let config = resolve_config(cli)?;
    let mode = cli.run_mode();
    init_thread_pool(&config.processing);

    let gateway = pipeline::connect(mode, &config)?;
    let gateway = gateway.as_ref().map(|g| g as &dyn RemoteGateway);
    let summary = pipeline::run(mode, &config, gateway, &CancelToken::new())?;
    output::print_summary(&summary);
    Ok(())
}

/// Stock defaults ← config file ← environment ← CLI flags.
fn resolve_config(cli: &Cli) -> Result<SyncConfig, config::ConfigError> {
    let config = config::load_config(cli.config.as_deref())?;
    let mut config = config::apply_env(config, |name| std::env::var(name).ok())?;

    if let Some(root) = &cli.root {
        config.mirror.root = root.clone();
    }
    if let Some(mode) = &cli.mode {
        config.cleanup.mode = mode.parse()?;
    }
    if cli.dry_run {
        config.cleanup.dry_run = true;
    }
    if cli.no_dry_run {
        config.cleanup.dry_run = false;
    }
    Ok(config)
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
