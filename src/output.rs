//! CLI output formatting for run summaries.
//!
//! Every run prints the counts of each stage that ran, then the per-item
//! failures. In dry-run every would-be deletion gets its own line prefixed
//! with `[dry-run]`.
//!
//! # Output Format
//!
//! ```text
//! Export
//!     downloaded 1, skipped 12, sidecars 13
//!     failed 1
//!         9: download failed: download of uploads/9.jpg failed: 500
//! Manifest → assets/manifest.json
//!     13 entries (12 kept, 1 new, 0 removed)
//! Cleanup (mode both, dry-run)
//!     12 candidates, 1 not exported yet
//!     [dry-run] delete object uploads/2024/x.jpg (id 7)
//!     [dry-run] delete row 7
//! ```
//!
//! # Architecture
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for
//! testability; [`print_summary`] writes them to stdout. Format functions are
//! pure: no I/O, no side effects.

use crate::cleanup::{CleanupReport, PlannedAction};
use crate::export::ExportReport;
use crate::manifest::RebuildReport;
use crate::pipeline::RunSummary;
use crate::thumbs::ThumbReport;
use crate::types::ItemFailure;

/// Prefix for every line describing a mutation that was not performed.
pub const DRY_RUN_PREFIX: &str = "[dry-run]";

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn failure_lines(failures: &[ItemFailure]) -> Vec<String> {
    if failures.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("{}failed {}", indent(1), failures.len())];
    lines.extend(
        failures
            .iter()
            .map(|f| format!("{}{}: {}", indent(2), f.id, f.error)),
    );
    lines
}

pub fn format_export(report: &ExportReport) -> Vec<String> {
    let mut lines = vec![
        "Export".to_string(),
        format!(
            "{}downloaded {}, skipped {}, sidecars {}",
            indent(1),
            report.downloaded,
            report.skipped,
            report.meta_written
        ),
    ];
    if report.no_object > 0 {
        lines.push(format!("{}{} without object path", indent(1), report.no_object));
    }
    lines.extend(failure_lines(&report.failures));
    if report.cancelled {
        lines.push(format!("{}cancelled", indent(1)));
    }
    lines
}

pub fn format_manifest(report: &RebuildReport) -> Vec<String> {
    let mut lines = vec![
        format!("Manifest → {}", report.manifest_path.display()),
        format!(
            "{}{} entries ({} kept, {} new, {} removed)",
            indent(1),
            report.entries,
            report.retained,
            report.appended,
            report.removed
        ),
    ];
    if !report.written {
        lines.push(format!("{}unchanged", indent(1)));
    }
    if report.without_sidecar > 0 {
        lines.push(format!("{}{} without sidecar", indent(1), report.without_sidecar));
    }
    for id in &report.dropped {
        lines.push(format!("{}dropped {id}: asset vanished", indent(1)));
    }
    for path in &report.duplicates {
        lines.push(format!("{}ignored duplicate {path}", indent(1)));
    }
    lines
}

pub fn format_thumbs(report: &ThumbReport) -> Vec<String> {
    let mut lines = vec![
        "Thumbnails".to_string(),
        format!(
            "{}generated {}, skipped {}",
            indent(1),
            report.generated,
            report.skipped
        ),
    ];
    lines.extend(failure_lines(&report.failures));
    lines
}

/// One line per planned deletion.
pub fn format_planned(action: &PlannedAction) -> String {
    match action {
        PlannedAction::DeleteObject { id, object_path } => {
            format!("{DRY_RUN_PREFIX} delete object {object_path} (id {id})")
        }
        PlannedAction::DeleteRow { id } => format!("{DRY_RUN_PREFIX} delete row {id}"),
    }
}

pub fn format_cleanup(report: &CleanupReport) -> Vec<String> {
    let header = if report.dry_run {
        format!("Cleanup (mode {}, dry-run)", report.mode)
    } else {
        format!("Cleanup (mode {})", report.mode)
    };
    let mut lines = vec![header];
    if report.listed == 0 && report.candidates == 0 && report.planned.is_empty() {
        lines.push(format!("{}nothing to do", indent(1)));
        return lines;
    }
    lines.push(format!(
        "{}{} candidates, {} not exported yet",
        indent(1),
        report.candidates,
        report.not_exported
    ));

    if report.dry_run {
        lines.extend(
            report
                .planned
                .iter()
                .map(|a| format!("{}{}", indent(1), format_planned(a))),
        );
    } else {
        if report.mode.deletes_objects() {
            lines.push(format!(
                "{}objects deleted {} ({} already gone)",
                indent(1),
                report.storage_deleted,
                report.storage_absent
            ));
        }
        if report.mode.deletes_rows() {
            lines.push(format!(
                "{}rows deleted {} ({} already gone)",
                indent(1),
                report.table_deleted,
                report.table_absent
            ));
        }
        if report.rows_kept > 0 {
            lines.push(format!(
                "{}rows kept {} (object still present)",
                indent(1),
                report.rows_kept
            ));
        }
    }
    if !report.outside_prefix.is_empty() {
        lines.push(format!(
            "{}outside prefix: {}",
            indent(1),
            report.outside_prefix.join(", ")
        ));
    }
    lines.extend(failure_lines(&report.failures));
    if report.cancelled {
        lines.push(format!(
            "{}cancelled, {} deletion(s) left for the next run",
            indent(1),
            report.skipped
        ));
    }
    lines
}

/// All stage sections of a run, in execution order, plus a closing line.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(report) = &summary.export {
        lines.extend(format_export(report));
    }
    if let Some(report) = &summary.manifest {
        lines.extend(format_manifest(report));
    }
    if let Some(report) = &summary.thumbs {
        lines.extend(format_thumbs(report));
    }
    if let Some(report) = &summary.cleanup {
        lines.extend(format_cleanup(report));
    }
    let failures = summary.failure_count();
    if failures == 0 {
        lines.push("Done".to_string());
    } else {
        lines.push(format!("Done with {failures} failed item(s)"));
    }
    lines
}

/// Print a run summary to stdout.
pub fn print_summary(summary: &RunSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanupMode;
    use std::path::PathBuf;

    #[test]
    fn export_section_lists_failures() {
        let report = ExportReport {
            downloaded: 1,
            skipped: 12,
            meta_written: 13,
            failures: vec![ItemFailure::new("9", "download failed")],
            ..Default::default()
        };
        assert_eq!(
            format_export(&report),
            vec![
                "Export",
                "    downloaded 1, skipped 12, sidecars 13",
                "    failed 1",
                "        9: download failed",
            ]
        );
    }

    #[test]
    fn export_section_mentions_missing_objects_and_cancel() {
        let report = ExportReport {
            no_object: 2,
            cancelled: true,
            ..Default::default()
        };
        let lines = format_export(&report);
        assert!(lines.contains(&"    2 without object path".to_string()));
        assert_eq!(lines.last().unwrap(), "    cancelled");
    }

    #[test]
    fn manifest_section() {
        let report = RebuildReport {
            manifest_path: PathBuf::from("assets/manifest.json"),
            entries: 13,
            retained: 12,
            appended: 1,
            written: true,
            ..Default::default()
        };
        assert_eq!(
            format_manifest(&report),
            vec![
                "Manifest → assets/manifest.json",
                "    13 entries (12 kept, 1 new, 0 removed)",
            ]
        );
    }

    #[test]
    fn unchanged_manifest_is_noted() {
        let report = RebuildReport::default();
        assert!(format_manifest(&report).contains(&"    unchanged".to_string()));
    }

    #[test]
    fn dry_run_lines_are_prefixed() {
        let report = CleanupReport {
            mode: CleanupMode::Both,
            dry_run: true,
            listed: 1,
            candidates: 1,
            planned: vec![
                PlannedAction::DeleteObject {
                    id: "7".into(),
                    object_path: "uploads/2024/x.jpg".into(),
                },
                PlannedAction::DeleteRow { id: "7".into() },
            ],
            ..Default::default()
        };
        assert_eq!(
            format_cleanup(&report),
            vec![
                "Cleanup (mode both, dry-run)",
                "    1 candidates, 0 not exported yet",
                "    [dry-run] delete object uploads/2024/x.jpg (id 7)",
                "    [dry-run] delete row 7",
            ]
        );
    }

    #[test]
    fn real_cleanup_shows_counts() {
        let report = CleanupReport {
            mode: CleanupMode::Both,
            listed: 3,
            candidates: 3,
            storage_deleted: 2,
            storage_absent: 1,
            table_deleted: 2,
            rows_kept: 1,
            failures: vec![ItemFailure::new("2", "delete failed")],
            ..Default::default()
        };
        let lines = format_cleanup(&report);
        assert_eq!(lines[0], "Cleanup (mode both)");
        assert!(lines.contains(&"    objects deleted 2 (1 already gone)".to_string()));
        assert!(lines.contains(&"    rows deleted 2 (0 already gone)".to_string()));
        assert!(lines.contains(&"    rows kept 1 (object still present)".to_string()));
        assert!(lines.contains(&"        2: delete failed".to_string()));
        assert!(!lines.iter().any(|l| l.contains(DRY_RUN_PREFIX)));
    }

    #[test]
    fn cancelled_cleanup_reports_what_is_left() {
        let report = CleanupReport {
            mode: CleanupMode::Storage,
            listed: 5,
            candidates: 5,
            storage_deleted: 2,
            cancelled: true,
            skipped: 3,
            ..Default::default()
        };
        assert_eq!(
            format_cleanup(&report).last().unwrap(),
            "    cancelled, 3 deletion(s) left for the next run"
        );
    }

    #[test]
    fn mode_none_cleanup_is_nothing_to_do() {
        let report = CleanupReport::default();
        assert_eq!(
            format_cleanup(&report),
            vec!["Cleanup (mode none)", "    nothing to do"]
        );
    }

    #[test]
    fn summary_closes_with_failure_count() {
        let summary = RunSummary {
            thumbs: Some(ThumbReport {
                generated: 1,
                failures: vec![ItemFailure::new("1", "bad image")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let lines = format_summary(&summary);
        assert_eq!(lines[0], "Thumbnails");
        assert_eq!(lines.last().unwrap(), "Done with 1 failed item(s)");
        assert_eq!(format_summary(&RunSummary::default()), vec!["Done"]);
    }
}
