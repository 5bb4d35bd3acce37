//! Plain-text rendering of conflict analysis.

use std::fmt::Write;

use crate::conflict::{ConflictDetectionResult, ConflictFinding, ConflictKind, ConflictSummary};

/// Render a multi-category summary.
pub fn render_report(summary: &ConflictSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Source conflict report: {} to {}",
        summary.window.start.format("%Y-%m-%d %H:%M"),
        summary.window.end.format("%Y-%m-%d %H:%M")
    );
    let _ = writeln!(
        out,
        "{} categories analyzed, {} findings ({} high severity)",
        summary.results.len(),
        summary.total_findings,
        summary.high_severity_findings.len()
    );

    for result in &summary.results {
        out.push('\n');
        out.push_str(&render_result(result));
    }

    if !summary.errors.is_empty() {
        out.push_str("\nNot analyzed:\n");
        for (category, error) in &summary.errors {
            let _ = writeln!(out, "  {}: {}", category, error);
        }
    }

    out
}

/// Render one category.
pub fn render_result(result: &ConflictDetectionResult) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[{}] {} records from {} sources",
        result.category,
        result.total_records,
        result.sources.len()
    );

    for source in &result.sources {
        let _ = writeln!(
            out,
            "  {:<24} {:>6} records {:>5.1}%{}",
            source.display_name,
            source.record_count,
            source.share_of_total * 100.0,
            if source.is_trusted_platform_source {
                "  (platform)"
            } else {
                ""
            }
        );
    }

    if result.findings.is_empty() {
        out.push_str("  No conflicts\n");
    }
    for finding in &result.findings {
        out.push_str(&render_finding(finding));
    }

    out
}

fn render_finding(finding: &ConflictFinding) -> String {
    let kind = match finding.kind {
        ConflictKind::OverlappingCoverage => "overlapping coverage",
        ConflictKind::DuplicateRecords => "duplicate records",
    };
    let sources: Vec<String> = finding
        .contributing_sources
        .iter()
        .map(ToString::to_string)
        .collect();

    format!(
        "  {} {:.2} {}: {}\n    overlap {:.0}%, inflation {:.0}%\n    -> {}\n",
        finding.severity.label(),
        finding.severity_score,
        kind,
        sources.join(" / "),
        finding.overlap_fraction * 100.0,
        finding.inflation_ratio * 100.0,
        finding.recommendation
    )
}
