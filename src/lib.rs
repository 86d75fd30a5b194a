//! # Gallery Sync
//!
//! Export and reconciliation for a moderated photo gallery. Submissions are
//! approved in a hosted database; this crate mirrors the approved ones into a
//! local file tree that a static gallery page serves directly.
//!
//! # Architecture: Stage Pipeline
//!
//! ```text
//! 1. Export    approved rows + objects  →  full/<year>/<slug>/<id>.<ext> + meta/<id>.json
//! 2. Rebuild   full/ + meta/            →  manifest.json
//! 3. Thumbs    full/                    →  thumbs/   (optional)
//! 4. Cleanup   approved rows            →  remote deletes (opt-in, dry-run by default)
//! ```
//!
//! The local tree is the source of truth. The manifest is always rebuilt from
//! disk, never from what an export run happened to download, so any stage can
//! run on its own and every run is safe to repeat.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Records, sidecars and manifest entries shared between stages |
//! | [`naming`] | Pure path resolution: year, category slug, extension |
//! | [`config`] | Layered configuration: defaults, TOML file, environment, CLI |
//! | [`remote`] | The [`remote::RemoteGateway`] seam and its Supabase implementation |
//! | [`store`] | The on-disk mirror: atomic writes, sidecars, tree scan |
//! | [`export`] | Stage 1, download-once mirroring |
//! | [`manifest`] | Stage 2, deterministic manifest rebuild |
//! | [`thumbs`] | Stage 3, parallel thumbnail generation |
//! | [`batch`] | Batch-then-itemized execution used by cleanup |
//! | [`cleanup`] | Stage 4, gated remote deletion |
//! | [`pipeline`] | Stage sequencing per run mode, cancellation |
//! | [`output`] | CLI output formatting of run summaries |
//!
//! # Design Decisions
//!
//! ## Filesystem as Database
//!
//! There is no index file besides the manifest, and the manifest is derived.
//! An asset's path encodes its year, category and id, and the sidecar next to
//! it holds the display fields. Deleting `manifest.json` loses nothing but the
//! order of existing entries.
//!
//! ## Download Once, Describe Always
//!
//! An asset file for an id marks it as exported: bytes are fetched at most
//! once. Sidecars are rewritten on every export so moderator edits upstream
//! reach the gallery without re-downloading anything.
//!
//! ## Destructive Actions Are Opt-In
//!
//! Cleanup defaults to `mode = none` and `dry_run = true`. Even when enabled
//! it only touches records whose asset is on disk, and it never deletes local
//! files.

pub mod batch;
pub mod cleanup;
pub mod config;
pub mod export;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod remote;
pub mod store;
pub mod thumbs;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
