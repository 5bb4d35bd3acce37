//! Provenance analysis: detect double-counting across writers.
//!
//! Records for one category and window are grouped by origin. Every pair of
//! origins is compared on the time they cover; heavy overlap means both are
//! tracking the same physical activity and a naive sum double-counts it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use vitalsync_common::{Category, OriginId, Record, Result, TimeWindow};
use vitalsync_storage::RecordStore;

use crate::retry::ResilientExecutor;

/// Weights blending the severity inputs. Each input lies in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub overlap: f64,
    pub inflation: f64,
    pub untrusted: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            overlap: 0.6,
            inflation: 0.3,
            untrusted: 0.1,
        }
    }
}

/// Thresholds and source knowledge used by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Overlap (relative to the smaller coverage) required to flag a pair.
    pub min_overlap_fraction: f64,
    /// Sources with fewer records are not considered independent trackers.
    pub min_records_per_source: usize,
    /// Scores at or above this are HIGH.
    pub high_threshold: f64,
    /// Scores at or above this (and below HIGH) are MEDIUM.
    pub medium_threshold: f64,
    pub weights: SeverityWeights,
    /// Coverage attributed to an instantaneous sample.
    pub instant_span: Duration,
    /// Share of exact time twins above which a pair is reported as duplicates.
    pub duplicate_match_fraction: f64,
    /// Origins written by the platform itself.
    pub trusted_sources: BTreeSet<String>,
    /// Display names by origin.
    pub known_sources: BTreeMap<String, String>,
}

impl ConflictConfig {
    /// Set the minimum overlap fraction.
    pub fn with_min_overlap_fraction(mut self, fraction: f64) -> Self {
        self.min_overlap_fraction = fraction;
        self
    }

    /// Set the severity band cutoffs.
    pub fn with_thresholds(mut self, high: f64, medium: f64) -> Self {
        self.high_threshold = high;
        self.medium_threshold = medium;
        self
    }

    /// Set the severity weights.
    pub fn with_weights(mut self, weights: SeverityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Mark an origin as a trusted platform source.
    pub fn with_trusted_source(mut self, origin: impl Into<String>) -> Self {
        self.trusted_sources.insert(origin.into());
        self
    }

    /// Register a display name for an origin.
    pub fn with_known_source(
        mut self,
        origin: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.known_sources.insert(origin.into(), name.into());
        self
    }

    fn is_trusted(&self, origin: &OriginId) -> bool {
        let key = origin_key(origin.as_str());
        !origin.is_unknown() && self.trusted_sources.iter().any(|s| origin_key(s) == key)
    }

    fn display_name(&self, origin: &OriginId) -> String {
        if origin.is_unknown() {
            return "Unknown source".to_string();
        }
        let key = origin_key(origin.as_str());
        self.known_sources
            .iter()
            .find(|(k, _)| origin_key(k) == key)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| origin.as_str().to_string())
    }
}

/// Origins differing only in case or padding are one identity.
fn origin_key(origin: &str) -> String {
    origin.trim().to_ascii_lowercase()
}

impl Default for ConflictConfig {
    fn default() -> Self {
        let trusted_sources = [
            "android",
            "com.google.android.apps.healthdata",
            "com.google.android.apps.fitness",
            "com.samsung.android.app.health",
            "com.apple.health",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let known_sources = [
            ("android", "Android platform"),
            ("com.google.android.apps.healthdata", "Health Connect"),
            ("com.google.android.apps.fitness", "Google Fit"),
            ("com.samsung.android.app.health", "Samsung Health"),
            ("com.apple.health", "Apple Health"),
            ("com.fitbit.FitbitMobile", "Fitbit"),
            ("com.garmin.android.apps.connectmobile", "Garmin Connect"),
            ("com.ouraring.oura", "Oura"),
            ("com.strava", "Strava"),
            ("com.withings.wiscale2", "Withings"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            min_overlap_fraction: 0.5,
            min_records_per_source: 1,
            high_threshold: 0.7,
            medium_threshold: 0.4,
            weights: SeverityWeights::default(),
            instant_span: Duration::from_secs(60),
            duplicate_match_fraction: 0.9,
            trusted_sources,
            known_sources,
        }
    }
}

/// Severity band of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Band for `score` under the configured cutoffs.
    pub fn from_score(score: f64, config: &ConflictConfig) -> Self {
        if score >= config.high_threshold {
            Severity::High
        } else if score >= config.medium_threshold {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

/// What kind of double-counting was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Two trackers cover largely the same time.
    OverlappingCoverage,
    /// One source mirrors the other record for record.
    DuplicateRecords,
}

/// Per-origin view of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub origin: OriginId,
    pub display_name: String,
    pub is_trusted_platform_source: bool,
    pub record_count: usize,
    /// Share of the category's records in the window, in [0, 1].
    pub share_of_total: f64,
    /// Sum of record values.
    pub total_value: f64,
    /// Seconds of the window covered by this source.
    pub covered_secs: i64,
}

/// One detected conflict between sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictFinding {
    pub category: Category,
    pub kind: ConflictKind,
    /// In [0, 1].
    pub severity_score: f64,
    pub severity: Severity,
    pub contributing_sources: Vec<OriginId>,
    /// Overlap relative to the smaller coverage.
    pub overlap_fraction: f64,
    /// Smaller over larger value sum inside the overlap.
    pub inflation_ratio: f64,
    pub recommendation: String,
}

/// Outcome of analyzing one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetectionResult {
    pub category: Category,
    pub window: TimeWindow,
    pub total_records: usize,
    /// Ordered by record count (desc), then origin.
    pub sources: Vec<SourceProfile>,
    /// Ordered by severity score (desc).
    pub findings: Vec<ConflictFinding>,
}

impl ConflictDetectionResult {
    pub fn has_conflicts(&self) -> bool {
        !self.findings.is_empty()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn high_severity_findings(&self) -> impl Iterator<Item = &ConflictFinding> {
        self.findings.iter().filter(|f| f.severity == Severity::High)
    }
}

/// Findings folded across categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub window: TimeWindow,
    pub results: Vec<ConflictDetectionResult>,
    /// Categories whose read failed.
    pub errors: BTreeMap<Category, String>,
    pub has_high_severity_conflicts: bool,
    pub high_severity_findings: Vec<ConflictFinding>,
    pub total_findings: usize,
}

impl ConflictSummary {
    /// Fold per-category results.
    pub fn from_results(
        window: TimeWindow,
        results: Vec<ConflictDetectionResult>,
        errors: BTreeMap<Category, String>,
    ) -> Self {
        let high_severity_findings: Vec<ConflictFinding> = results
            .iter()
            .flat_map(|r| r.high_severity_findings().cloned())
            .collect();
        let total_findings = results.iter().map(|r| r.findings.len()).sum();

        Self {
            window,
            results,
            errors,
            has_high_severity_conflicts: !high_severity_findings.is_empty(),
            high_severity_findings,
            total_findings,
        }
    }
}

/// Blend severity inputs into a score in [0, 1].
///
/// Non-decreasing in each input for non-negative weights.
pub fn severity_score(
    weights: &SeverityWeights,
    overlap_fraction: f64,
    inflation_ratio: f64,
    untrusted_factor: f64,
) -> f64 {
    let raw = weights.overlap * overlap_fraction.clamp(0.0, 1.0)
        + weights.inflation * inflation_ratio.clamp(0.0, 1.0)
        + weights.untrusted * untrusted_factor.clamp(0.0, 1.0);
    raw.clamp(0.0, 1.0)
}

/// Millisecond interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Span {
    start: i64,
    end: i64,
}

impl Span {
    fn len(&self) -> i64 {
        self.end - self.start
    }
}

struct SourceGroup<'a> {
    origin: OriginId,
    records: Vec<&'a Record>,
    /// Record spans clipped to the window, in record order.
    spans: Vec<Span>,
    /// Union of `spans`, sorted and disjoint.
    coverage: Vec<Span>,
}

impl SourceGroup<'_> {
    fn covered_ms(&self) -> i64 {
        self.coverage.iter().map(Span::len).sum()
    }

    fn total_value(&self) -> f64 {
        self.records.iter().map(|r| r.value).sum()
    }
}

fn record_span(record: &Record, window: &TimeWindow, instant_ms: i64) -> Option<Span> {
    let start = record.start.timestamp_millis();
    let mut end = record.effective_end().timestamp_millis();
    if end <= start {
        end = start + instant_ms;
    }
    let clipped = Span {
        start: start.max(window.start.timestamp_millis()),
        end: end.min(window.end.timestamp_millis()),
    };
    (clipped.end > clipped.start).then_some(clipped)
}

fn merge(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort();
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// Length of the intersection of two sorted, disjoint span lists.
fn intersection_ms(a: &[Span], b: &[Span]) -> i64 {
    let (mut i, mut j, mut total) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if end > start {
            total += end - start;
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    total
}

fn touches(span: &Span, coverage: &[Span]) -> bool {
    coverage
        .iter()
        .any(|c| span.start < c.end && c.start < span.end)
}

/// Sum of values of `group` records that fall inside `other`'s coverage.
fn overlapping_value(group: &SourceGroup<'_>, other: &SourceGroup<'_>) -> f64 {
    group
        .records
        .iter()
        .zip(&group.spans)
        .filter(|(_, span)| touches(span, &other.coverage))
        .map(|(r, _)| r.value)
        .sum()
}

/// Share of the smaller group's records with an exact time twin in the other.
fn twin_fraction(a: &SourceGroup<'_>, b: &SourceGroup<'_>) -> f64 {
    let (small, large) = if a.records.len() <= b.records.len() {
        (a, b)
    } else {
        (b, a)
    };
    if small.records.is_empty() {
        return 0.0;
    }
    let times: BTreeSet<(i64, i64)> = large
        .records
        .iter()
        .map(|r| (r.start.timestamp_millis(), r.effective_end().timestamp_millis()))
        .collect();
    let twins = small
        .records
        .iter()
        .filter(|r| {
            times.contains(&(r.start.timestamp_millis(), r.effective_end().timestamp_millis()))
        })
        .count();
    twins as f64 / small.records.len() as f64
}

/// 1.0 when an origin is unknown, 0.5 when one is merely untrusted, else 0.0.
fn untrusted_factor(config: &ConflictConfig, a: &OriginId, b: &OriginId) -> f64 {
    if a.is_unknown() || b.is_unknown() {
        1.0
    } else if !config.is_trusted(a) || !config.is_trusted(b) {
        0.5
    } else {
        0.0
    }
}

fn recommend(
    config: &ConflictConfig,
    category: &Category,
    kind: ConflictKind,
    severity: Severity,
    a: &OriginId,
    b: &OriginId,
    overlap_fraction: f64,
) -> String {
    let name_a = config.display_name(a);
    let name_b = config.display_name(b);
    let pct = overlap_fraction * 100.0;

    let preferred = match (config.is_trusted(a), config.is_trusted(b)) {
        (true, false) => Some((&name_a, &name_b)),
        (false, true) => Some((&name_b, &name_a)),
        _ => None,
    };

    match (kind, preferred, severity) {
        (ConflictKind::DuplicateRecords, Some((keep, drop)), _) => format!(
            "{} mirrors {} {} records; count only {}",
            drop, keep, category, keep
        ),
        (ConflictKind::DuplicateRecords, None, _) => format!(
            "{} and {} hold the same {} records; count only one of them",
            name_a, name_b, category
        ),
        (_, Some((keep, drop)), Severity::High | Severity::Medium) => format!(
            "Use {} as the primary {} source and exclude {} from totals ({:.0}% overlap)",
            keep, category, drop, pct
        ),
        (_, None, Severity::High) => format!(
            "Choose a single primary {} source; {} and {} overlap {:.0}% and will double-count",
            category, name_a, name_b, pct
        ),
        (_, None, Severity::Medium) => format!(
            "Review {} sources {} and {}; they overlap {:.0}%",
            category, name_a, name_b, pct
        ),
        (_, _, Severity::Low) => format!(
            "Minor {} overlap between {} and {} ({:.0}%); monitor",
            category, name_a, name_b, pct
        ),
    }
}

/// Analyze records already read for `category` within `window`.
///
/// Pure and deterministic: the same input always yields the same result.
pub fn detect_conflicts(
    config: &ConflictConfig,
    category: &Category,
    window: &TimeWindow,
    records: &[Record],
) -> ConflictDetectionResult {
    let instant_ms = config.instant_span.as_millis().max(1) as i64;

    let mut groups: BTreeMap<String, SourceGroup<'_>> = BTreeMap::new();
    for record in records.iter().filter(|r| &r.category == category) {
        let group = groups
            .entry(origin_key(record.origin.as_str()))
            .or_insert_with(|| SourceGroup {
                origin: record.origin.clone(),
                records: Vec::new(),
                spans: Vec::new(),
                coverage: Vec::new(),
            });
        // Smallest raw spelling represents the group regardless of record order
        if record.origin < group.origin {
            group.origin = record.origin.clone();
        }
        if let Some(span) = record_span(record, window, instant_ms) {
            group.records.push(record);
            group.spans.push(span);
        }
    }
    groups.retain(|_, g| !g.records.is_empty());
    for group in groups.values_mut() {
        group.coverage = merge(group.spans.clone());
    }

    let total_records: usize = groups.values().map(|g| g.records.len()).sum();

    let mut sources: Vec<SourceProfile> = groups
        .values()
        .map(|g| SourceProfile {
            origin: g.origin.clone(),
            display_name: config.display_name(&g.origin),
            is_trusted_platform_source: config.is_trusted(&g.origin),
            record_count: g.records.len(),
            share_of_total: if total_records == 0 {
                0.0
            } else {
                g.records.len() as f64 / total_records as f64
            },
            total_value: g.total_value(),
            covered_secs: g.covered_ms() / 1000,
        })
        .collect();
    sources.sort_by(|a, b| {
        b.record_count
            .cmp(&a.record_count)
            .then_with(|| a.origin.cmp(&b.origin))
    });

    let eligible: Vec<&SourceGroup<'_>> = groups
        .values()
        .filter(|g| g.records.len() >= config.min_records_per_source.max(1))
        .collect();

    let mut findings = Vec::new();
    for (i, a) in eligible.iter().enumerate() {
        for b in &eligible[i + 1..] {
            let smaller = a.covered_ms().min(b.covered_ms());
            if smaller <= 0 {
                continue;
            }
            let overlap_fraction =
                (intersection_ms(&a.coverage, &b.coverage) as f64 / smaller as f64).min(1.0);
            if overlap_fraction < config.min_overlap_fraction {
                continue;
            }

            let value_a = overlapping_value(a, b);
            let value_b = overlapping_value(b, a);
            let larger = value_a.max(value_b);
            let inflation_ratio = if larger > 0.0 {
                value_a.min(value_b) / larger
            } else {
                0.0
            };

            let untrusted = untrusted_factor(config, &a.origin, &b.origin);
            let score =
                severity_score(&config.weights, overlap_fraction, inflation_ratio, untrusted);
            let severity = Severity::from_score(score, config);
            let kind = if twin_fraction(a, b) >= config.duplicate_match_fraction {
                ConflictKind::DuplicateRecords
            } else {
                ConflictKind::OverlappingCoverage
            };

            debug!(
                "{}: {} vs {} overlap {:.2} inflation {:.2} score {:.2}",
                category, a.origin, b.origin, overlap_fraction, inflation_ratio, score
            );

            findings.push(ConflictFinding {
                category: category.clone(),
                kind,
                severity_score: score,
                severity,
                contributing_sources: vec![a.origin.clone(), b.origin.clone()],
                overlap_fraction,
                inflation_ratio,
                recommendation: recommend(
                    config,
                    category,
                    kind,
                    severity,
                    &a.origin,
                    &b.origin,
                    overlap_fraction,
                ),
            });
        }
    }

    findings.sort_by(|x, y| {
        y.severity_score
            .total_cmp(&x.severity_score)
            .then_with(|| x.contributing_sources.cmp(&y.contributing_sources))
    });

    ConflictDetectionResult {
        category: category.clone(),
        window: *window,
        total_records,
        sources,
        findings,
    }
}

/// Reads records through the store and grades cross-writer conflicts.
pub struct ConflictDetector<P: RecordStore + ?Sized> {
    store: Arc<P>,
    executor: Arc<ResilientExecutor>,
    config: ConflictConfig,
}

impl<P: RecordStore + ?Sized> ConflictDetector<P> {
    /// Create a new detector.
    pub fn new(store: Arc<P>, executor: Arc<ResilientExecutor>, config: ConflictConfig) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Read `category` within `window` and analyze it.
    pub async fn analyze(
        &self,
        category: &Category,
        window: &TimeWindow,
    ) -> Result<ConflictDetectionResult> {
        let records = self
            .executor
            .execute(|| self.store.read_range(category, window))
            .await?;

        let result = detect_conflicts(&self.config, category, window, &records);
        info!(
            "Analyzed {} {} records from {} sources: {} findings",
            result.total_records,
            category,
            result.sources.len(),
            result.findings.len()
        );
        Ok(result)
    }

    /// Analyze several categories; a failed read is recorded, not fatal.
    pub async fn analyze_many(
        &self,
        categories: &[Category],
        window: &TimeWindow,
    ) -> ConflictSummary {
        let mut results = Vec::with_capacity(categories.len());
        let mut errors = BTreeMap::new();

        for category in categories {
            match self.analyze(category, window).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Conflict analysis for {} failed: {}", category, e);
                    errors.insert(category.clone(), e.to_string());
                }
            }
        }

        ConflictSummary::from_results(*window, results, errors)
    }
}
