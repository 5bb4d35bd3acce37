//! Property tests for batching, quota admission and conflict scoring.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;

use vitalsync_common::{Category, OriginId, Record, TimeWindow};
use vitalsync_sync::{
    detect_conflicts, severity_score, BatchConfig, BatchWriter, ConflictConfig, QuotaConfig,
    QuotaTracker, ResilientExecutor, RetryConfig, SeverityWeights,
};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn origin_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("com.fitbit.FitbitMobile"),
        Just("com.ouraring.oura"),
        Just("com.google.android.apps.fitness"),
        Just(""),
    ]
}

fn record_strategy() -> impl Strategy<Value = Record> {
    (origin_strategy(), 0i64..1440, 0i64..120, 0.0f64..5000.0).prop_map(
        |(origin, start_min, len_min, value)| {
            let start = base() + ChronoDuration::minutes(start_min);
            Record::interval(
                format!("{}-{}", origin, start_min),
                Category::new("steps").unwrap(),
                OriginId::new(origin),
                start,
                start + ChronoDuration::minutes(len_min),
                value,
            )
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chunking_covers_every_record(n in 0usize..400, chunk in 1usize..120) {
        let writer = BatchWriter::new(
            std::sync::Arc::new(ResilientExecutor::new(RetryConfig::new(0))),
            BatchConfig::new(chunk),
        );
        let records: Vec<usize> = (0..n).collect();
        let result = runtime().block_on(writer.write(&records, |_| async { Ok(()) }));

        prop_assert_eq!(result.outcomes.len(), n.div_ceil(chunk));
        let total: usize = result.outcomes.iter().map(|o| o.record_count).sum();
        prop_assert_eq!(total, n);
        prop_assert!(result.outcomes.iter().all(|o| o.record_count <= chunk));

        let mut next = 0;
        for outcome in &result.outcomes {
            prop_assert_eq!(outcome.first_record_index, next);
            next += outcome.record_count;
        }
    }

    #[test]
    fn quota_admission_tracks_usage(limit in 1u32..300, used in 0u32..400, minute in 0i64..60) {
        let quota = QuotaTracker::new(QuotaConfig::new(limit));
        let now = base() + ChronoDuration::minutes(minute);
        for _ in 0..used {
            quota.record_usage_at(now);
        }

        prop_assert_eq!(quota.admit_at(now), used < limit);
        let status = quota.status_at(now);
        prop_assert_eq!(status.remaining, limit.saturating_sub(used));
        prop_assert!(quota.admit_at(status.reset_at));
    }

    #[test]
    fn severity_is_bounded_and_monotonic(
        low in 0.0f64..=1.0,
        delta in 0.0f64..=1.0,
        inflation in 0.0f64..=1.0,
        untrusted in prop_oneof![Just(0.0), Just(0.5), Just(1.0)],
    ) {
        let weights = SeverityWeights::default();
        let high = (low + delta).min(1.0);
        let a = severity_score(&weights, low, inflation, untrusted);
        let b = severity_score(&weights, high, inflation, untrusted);

        prop_assert!((0.0..=1.0).contains(&a));
        prop_assert!((0.0..=1.0).contains(&b));
        prop_assert!(b >= a);
    }

    #[test]
    fn conflict_analysis_is_deterministic(
        records in prop::collection::vec(record_strategy(), 0..40),
    ) {
        let config = ConflictConfig::default();
        let steps = Category::new("steps").unwrap();
        let window =
            TimeWindow::ending_at(base() + ChronoDuration::days(1), ChronoDuration::days(1));

        let first = detect_conflicts(&config, &steps, &window, &records);
        let second = detect_conflicts(&config, &steps, &window, &records);
        prop_assert_eq!(&first, &second);

        let share: f64 = first.sources.iter().map(|s| s.share_of_total).sum();
        if first.total_records > 0 {
            prop_assert!((share - 1.0).abs() < 1e-9);
        }
        for finding in &first.findings {
            prop_assert!((0.0..=1.0).contains(&finding.severity_score));
            prop_assert!(finding.overlap_fraction >= config.min_overlap_fraction);
            prop_assert_ne!(&finding.contributing_sources[0], &finding.contributing_sources[1]);
        }
    }
}
