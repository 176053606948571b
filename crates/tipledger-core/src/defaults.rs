//! Centralized default constants for the tipledger system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates should reference these constants instead of defining
//! their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// DUPLICATE GATE
// =============================================================================

/// Relative byte-size tolerance for near-duplicate detection, in percent.
///
/// A similarity-hash collision only counts as a near-duplicate when the
/// byte sizes are within this band. The source system never justified a
/// figure rigorously; this is a tunable with a conservative default
/// (`TIPLEDGER_NEAR_DUP_TOLERANCE_PCT`).
pub const NEAR_DUP_TOLERANCE_PCT: f64 = 2.0;

/// Window within which an identical filename + byte size counts as a
/// rapid resubmit, in seconds (`TIPLEDGER_RESUBMIT_WINDOW_SECS`).
pub const RESUBMIT_WINDOW_SECS: i64 = 300;

/// Number of evenly spaced sample bytes fed into the similarity digest.
pub const SIMILARITY_SAMPLE_BYTES: usize = 64;

/// Length-bucket granularity for the similarity digest, in bytes. Images
/// re-encoded at slightly different quality land in the same bucket.
pub const SIMILARITY_LENGTH_BUCKET: usize = 4096;

/// Hex characters kept from the similarity digest (coarse by design).
pub const SIMILARITY_HASH_LEN: usize = 16;

// =============================================================================
// UPLOAD SAFETY
// =============================================================================

/// Maximum accepted upload size in bytes (screenshots, not scans).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Maximum filename length after sanitization.
pub const MAX_FILENAME_LEN: usize = 255;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Oracle confidence below which a field is treated as absent.
///
/// A missing or weak field must never masquerade as a typed zero.
pub const FIELD_CONFIDENCE_FLOOR: f32 = 0.35;

/// Field names the oracle may use for a pre-trip estimate amount.
pub const ESTIMATE_FIELDS: &[&str] = &["estimated_earnings", "estimated_total", "offer_amount"];

/// Field names the oracle may use for post-trip actual earnings.
pub const SETTLEMENT_FIELDS: &[&str] = &["total_earnings", "final_payout", "actual_earnings"];

/// Field names the oracle may use for odometer/mileage readings.
pub const ODOMETER_FIELDS: &[&str] = &["odometer", "mileage", "distance_mi"];

/// Field names the oracle may use for the tip component.
pub const TIP_FIELDS: &[&str] = &["tip", "tip_amount", "customer_tip"];

// =============================================================================
// VARIANCE
// =============================================================================

/// Absolute tolerance for "exact" estimate accuracy, in dollars.
///
/// Deliberately absolute rather than percentage: small trips and large
/// trips are held to the same cents-level estimation bar
/// (`TIPLEDGER_VARIANCE_EPSILON`).
pub const VARIANCE_EPSILON: f64 = 0.25;

// =============================================================================
// COMPUTATION CACHE
// =============================================================================

/// TTL for time-windowed aggregates whose inputs are not fully capturable
/// in the key, in seconds (`TIPLEDGER_CACHE_TTL_SECS`).
pub const CACHE_TTL_SECS: i64 = 300;

/// Budget for a single cached computation, in seconds. A computation that
/// exceeds it is aborted and its key released so coalesced waiters are not
/// deadlocked behind a hung computation (`TIPLEDGER_COMPUTE_BUDGET_SECS`).
pub const COMPUTE_BUDGET_SECS: u64 = 30;

// =============================================================================
// RECOGNITION ORACLE
// =============================================================================

/// Default recognition service endpoint (`TIPLEDGER_ORACLE_URL`).
pub const ORACLE_URL: &str = "http://localhost:8750/recognize";

/// Timeout for one oracle call, in seconds (`TIPLEDGER_ORACLE_TIMEOUT_SECS`).
/// On timeout the document stays pending; the engine never busy-retries.
pub const ORACLE_TIMEOUT_SECS: u64 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerances_are_sane() {
        assert!(NEAR_DUP_TOLERANCE_PCT > 0.0 && NEAR_DUP_TOLERANCE_PCT < 50.0);
        assert!(RESUBMIT_WINDOW_SECS > 0);
        assert!(VARIANCE_EPSILON > 0.0 && VARIANCE_EPSILON < 1.0);
        assert!(FIELD_CONFIDENCE_FLOOR > 0.0 && FIELD_CONFIDENCE_FLOOR < 1.0);
    }

    #[test]
    fn test_field_name_lists_do_not_overlap() {
        for est in ESTIMATE_FIELDS {
            assert!(!SETTLEMENT_FIELDS.contains(est));
            assert!(!ODOMETER_FIELDS.contains(est));
        }
        for set in SETTLEMENT_FIELDS {
            assert!(!ODOMETER_FIELDS.contains(set));
        }
    }
}
