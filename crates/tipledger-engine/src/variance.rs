//! Tip variance and derived trip metrics.
//!
//! Pure functions of trip state. Variance is defined only when both the
//! estimate and the settlement are present and positive; the tolerance is
//! a fixed absolute epsilon, not a percentage, so small trips and large
//! trips are held to the same cents-level estimation bar.

use tipledger_core::{TipVariance, Trip, TripMetrics, VarianceAccuracy};

/// Compute `settlement - estimate` classified against `epsilon`.
///
/// Returns None when either amount is missing or non-positive.
pub fn compute_variance(
    estimate: Option<f64>,
    settlement: Option<f64>,
    epsilon: f64,
) -> Option<TipVariance> {
    let estimate = estimate.filter(|v| *v > 0.0)?;
    let settlement = settlement.filter(|v| *v > 0.0)?;

    let variance = settlement - estimate;
    let accuracy = if variance.abs() <= epsilon {
        VarianceAccuracy::Exact
    } else if variance > epsilon {
        VarianceAccuracy::Over
    } else {
        VarianceAccuracy::Under
    };

    Some(TipVariance { variance, accuracy })
}

/// Derived profit/efficiency metrics for a trip with both amounts known.
///
/// Refuses to run on a trip flagged for manual reconciliation: guessing
/// between conflicting settlement documents would launder bad data into
/// derived numbers.
pub fn compute_metrics(trip: &Trip, miles: Option<f64>) -> Option<TripMetrics> {
    if trip.needs_review {
        return None;
    }
    let estimate = trip.estimate_amount.filter(|v| *v > 0.0)?;
    let settlement = trip.settlement_amount.filter(|v| *v > 0.0)?;

    Some(TripMetrics {
        total_earned: settlement,
        earnings_per_mile: miles.filter(|m| *m > 0.0).map(|m| settlement / m),
        estimate_accuracy_pct: settlement / estimate * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    const EPSILON: f64 = 0.25;

    #[test]
    fn test_variance_over() {
        let v = compute_variance(Some(18.50), Some(22.75), EPSILON).unwrap();
        assert!((v.variance - 4.25).abs() < 1e-9);
        assert_eq!(v.accuracy, VarianceAccuracy::Over);
    }

    #[test]
    fn test_variance_under() {
        let v = compute_variance(Some(20.00), Some(15.00), EPSILON).unwrap();
        assert!((v.variance + 5.00).abs() < 1e-9);
        assert_eq!(v.accuracy, VarianceAccuracy::Under);
    }

    #[test]
    fn test_variance_exact_within_epsilon() {
        let v = compute_variance(Some(20.00), Some(20.20), EPSILON).unwrap();
        assert_eq!(v.accuracy, VarianceAccuracy::Exact);

        // Boundary: exactly epsilon counts as exact.
        let v = compute_variance(Some(20.00), Some(20.25), EPSILON).unwrap();
        assert_eq!(v.accuracy, VarianceAccuracy::Exact);
    }

    #[test]
    fn test_variance_undefined_without_both_amounts() {
        assert!(compute_variance(Some(18.50), None, EPSILON).is_none());
        assert!(compute_variance(None, Some(22.75), EPSILON).is_none());
        assert!(compute_variance(None, None, EPSILON).is_none());
    }

    #[test]
    fn test_variance_undefined_for_non_positive_amounts() {
        assert!(compute_variance(Some(0.0), Some(22.75), EPSILON).is_none());
        assert!(compute_variance(Some(18.50), Some(-1.0), EPSILON).is_none());
    }

    fn complete_trip() -> Trip {
        let mut trip = Trip::new(Uuid::new_v4(), Utc::now());
        trip.estimate_amount = Some(18.50);
        trip.settlement_amount = Some(22.75);
        trip
    }

    #[test]
    fn test_metrics() {
        let m = compute_metrics(&complete_trip(), Some(10.0)).unwrap();
        assert!((m.total_earned - 22.75).abs() < 1e-9);
        assert!((m.earnings_per_mile.unwrap() - 2.275).abs() < 1e-9);
        assert!((m.estimate_accuracy_pct - 122.97297297297297).abs() < 1e-6);
    }

    #[test]
    fn test_metrics_without_miles() {
        let m = compute_metrics(&complete_trip(), None).unwrap();
        assert!(m.earnings_per_mile.is_none());
    }

    #[test]
    fn test_metrics_refuse_flagged_trip() {
        let mut trip = complete_trip();
        trip.needs_review = true;
        assert!(compute_metrics(&trip, Some(10.0)).is_none());
    }
}
