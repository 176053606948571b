//! Time-windowed aggregate recomputation through the computation cache.
//!
//! Every aggregate computation is recorded as an immutable
//! [`ReanalysisSession`]: an append-only audit log that lets a caller
//! verify a previously reported number was reproducible from the data
//! available at the time. The cache key covers the analysis kind, the
//! range, and the id+version of every trip in range, so any upstream trip
//! change produces a new key by construction.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use tipledger_core::{
    defaults, AggregateReport, ComparisonDelta, DayTotal, EventBus, ReanalysisKind,
    ReanalysisSession, Result, ServerEvent, SessionStore, Trip, TripStore,
    VarianceAccuracy,
};

use crate::cache::ComputationCache;

/// Deterministic cache inputs for one analysis. Trip lists are sorted so
/// identical data always serializes identically.
#[derive(Serialize)]
struct AnalysisInputs {
    kind: &'static str,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    trips: Vec<(Uuid, i64)>,
    /// For comparisons: the preceding window's trips, same encoding.
    prev_trips: Vec<(Uuid, i64)>,
}

/// The reanalysis session manager.
pub struct ReanalysisEngine {
    trips: Arc<dyn TripStore>,
    sessions: Arc<dyn SessionStore>,
    cache: ComputationCache,
    events: EventBus,
    ttl_seconds: i64,
}

impl ReanalysisEngine {
    pub fn new(
        trips: Arc<dyn TripStore>,
        sessions: Arc<dyn SessionStore>,
        cache: ComputationCache,
        events: EventBus,
    ) -> Self {
        Self::with_ttl(trips, sessions, cache, events, defaults::CACHE_TTL_SECS)
    }

    pub fn with_ttl(
        trips: Arc<dyn TripStore>,
        sessions: Arc<dyn SessionStore>,
        cache: ComputationCache,
        events: EventBus,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            trips,
            sessions,
            cache,
            events,
            ttl_seconds,
        }
    }

    /// Compute (or reuse) the aggregate for a time window and record a
    /// session.
    ///
    /// A cache hit still produces a fresh session pointing at the reused
    /// computation, with near-zero execution time.
    pub async fn analyze(
        &self,
        kind: ReanalysisKind,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<ReanalysisSession> {
        let started = Instant::now();

        let window = self.trips.list_in_range(range_start, range_end).await?;
        let prev_window = match kind {
            ReanalysisKind::SingleWindow => Vec::new(),
            ReanalysisKind::Comparison => {
                let len = range_end - range_start;
                self.trips.list_in_range(range_start - len, range_start).await?
            }
        };

        let mut trip_versions: Vec<(Uuid, i64)> =
            window.iter().map(|t| (t.id, t.version)).collect();
        trip_versions.sort();
        let mut prev_versions: Vec<(Uuid, i64)> =
            prev_window.iter().map(|t| (t.id, t.version)).collect();
        prev_versions.sort();

        let inputs = AnalysisInputs {
            kind: kind.as_str(),
            range_start,
            range_end,
            trips: trip_versions.clone(),
            prev_trips: prev_versions,
        };

        // A window that reaches into the present keeps growing as trips
        // arrive; its inputs are captured, but the entry still gets a TTL
        // so long-lived keys do not pin a half-open window forever.
        let ttl = if range_end > Utc::now() {
            Some(self.ttl_seconds)
        } else {
            None
        };

        let (aggregate, cache_hit) = self
            .cache
            .get_or_compute("reanalysis", &inputs, ttl, || async {
                let mut report = compute_aggregate(&window);
                if kind == ReanalysisKind::Comparison {
                    report.comparison = Some(comparison_delta(&report, &prev_window));
                }
                Ok(report)
            })
            .await?;

        let session = ReanalysisSession {
            id: Uuid::now_v7(),
            kind,
            range_start,
            range_end,
            trip_ids: trip_versions.into_iter().map(|(id, _)| id).collect(),
            aggregate,
            cache_hit,
            execution_ms: started.elapsed().as_millis() as i64,
            created_at: Utc::now(),
        };
        self.sessions.insert(&session).await?;

        info!(
            subsystem = "reanalysis",
            op = "analyze",
            session_id = %session.id,
            trip_count = session.trip_ids.len(),
            cache_hit,
            duration_ms = session.execution_ms,
            "analysis session recorded"
        );
        self.events.emit(ServerEvent::AnalysisCompleted {
            session_id: session.id,
            cache_hit,
        });

        Ok(session)
    }

    /// Past sessions in a time range, newest first.
    pub async fn history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReanalysisSession>> {
        self.sessions.list_in_range(start, end).await
    }
}

/// Aggregate metrics over a set of trips. Pure.
pub fn compute_aggregate(trips: &[Trip]) -> AggregateReport {
    let mut report = AggregateReport {
        trip_count: trips.len() as i64,
        ..Default::default()
    };

    let mut variance_count = 0i64;
    let mut day_totals: std::collections::BTreeMap<chrono::NaiveDate, (f64, i64)> =
        std::collections::BTreeMap::new();

    for trip in trips {
        if let Some(est) = trip.estimate_amount {
            report.total_estimate += est;
        }
        if let Some(set) = trip.settlement_amount {
            report.total_settlement += set;
            let day = day_totals
                .entry(trip.created_at.date_naive())
                .or_insert((0.0, 0));
            day.0 += set;
            day.1 += 1;
        }
        if trip.state == tipledger_core::TripState::Complete {
            report.complete_trip_count += 1;
        }
        if let Some(v) = &trip.variance {
            variance_count += 1;
            report.total_variance += v.variance;
            match v.accuracy {
                VarianceAccuracy::Exact => report.exact_count += 1,
                VarianceAccuracy::Over => report.over_count += 1,
                VarianceAccuracy::Under => report.under_count += 1,
            }
        }
    }

    if variance_count > 0 {
        report.mean_variance = report.total_variance / variance_count as f64;
    }
    if report.complete_trip_count > 0 {
        report.earnings_per_trip =
            report.total_settlement / report.complete_trip_count as f64;
    }

    report.best_day = day_totals
        .iter()
        .max_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
        .map(|(date, (total, count))| DayTotal {
            date: *date,
            total_settlement: *total,
            trip_count: *count,
        });
    report.worst_day = day_totals
        .iter()
        .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
        .map(|(date, (total, count))| DayTotal {
            date: *date,
            total_settlement: *total,
            trip_count: *count,
        });

    report
}

fn comparison_delta(current: &AggregateReport, prev_window: &[Trip]) -> ComparisonDelta {
    let prev = compute_aggregate(prev_window);
    ComparisonDelta {
        prev_trip_count: prev.trip_count,
        prev_total_settlement: prev.total_settlement,
        trip_count_delta: current.trip_count - prev.trip_count,
        settlement_delta: current.total_settlement - prev.total_settlement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipledger_core::{TipVariance, TripState};

    fn trip(day: u32, estimate: Option<f64>, settlement: Option<f64>) -> Trip {
        let created = chrono::DateTime::parse_from_rfc3339(&format!(
            "2026-08-{:02}T12:00:00Z",
            day
        ))
        .unwrap()
        .with_timezone(&Utc);
        let mut t = Trip::new(Uuid::now_v7(), created);
        t.estimate_amount = estimate;
        t.settlement_amount = settlement;
        if estimate.is_some() && settlement.is_some() {
            t.state = TripState::Complete;
            t.variance = crate::variance::compute_variance(estimate, settlement, 0.25);
        } else if estimate.is_some() || settlement.is_some() {
            t.state = TripState::Partial;
        }
        t
    }

    #[test]
    fn test_aggregate_totals_and_accuracy_breakdown() {
        let trips = vec![
            trip(1, Some(18.50), Some(22.75)), // over
            trip(1, Some(10.00), Some(10.10)), // exact
            trip(2, Some(30.00), Some(25.00)), // under
            trip(3, Some(12.00), None),        // partial
        ];
        let report = compute_aggregate(&trips);

        assert_eq!(report.trip_count, 4);
        assert_eq!(report.complete_trip_count, 3);
        assert!((report.total_estimate - 70.50).abs() < 1e-9);
        assert!((report.total_settlement - 57.85).abs() < 1e-9);
        assert_eq!(report.over_count, 1);
        assert_eq!(report.exact_count, 1);
        assert_eq!(report.under_count, 1);
        // 4.25 + 0.10 - 5.00
        assert!((report.total_variance - (-0.65)).abs() < 1e-9);
        assert!((report.earnings_per_trip - 57.85 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_best_and_worst_day() {
        let trips = vec![
            trip(1, Some(18.50), Some(22.75)),
            trip(1, Some(10.00), Some(10.10)),
            trip(2, Some(30.00), Some(25.00)),
        ];
        let report = compute_aggregate(&trips);

        let best = report.best_day.unwrap();
        assert_eq!(best.date.to_string(), "2026-08-01");
        assert!((best.total_settlement - 32.85).abs() < 1e-9);
        assert_eq!(best.trip_count, 2);

        let worst = report.worst_day.unwrap();
        assert_eq!(worst.date.to_string(), "2026-08-02");
    }

    #[test]
    fn test_empty_window() {
        let report = compute_aggregate(&[]);
        assert_eq!(report.trip_count, 0);
        assert_eq!(report.mean_variance, 0.0);
        assert!(report.best_day.is_none());
        assert!(report.worst_day.is_none());
    }

    #[test]
    fn test_comparison_delta() {
        let current = compute_aggregate(&[trip(8, Some(18.50), Some(22.75))]);
        let delta = comparison_delta(&current, &[trip(1, Some(10.0), Some(12.0))]);
        assert_eq!(delta.prev_trip_count, 1);
        assert!((delta.settlement_delta - 10.75).abs() < 1e-9);
        assert_eq!(delta.trip_count_delta, 0);
    }
}
