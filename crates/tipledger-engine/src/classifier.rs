//! Rule-based document classification over oracle candidate fields.
//!
//! Classification looks only at which fields are present (above the
//! confidence floor), never at pixel content:
//! - settlement/actual-earnings field present: final settlement
//! - estimate field present, no settlement: offer estimate
//! - only odometer/mileage fields, no monetary fields: odometer reading
//! - anything else: unclassified
//!
//! Confidence is the **minimum** oracle confidence across the fields used
//! for the decision; a single weak field must not be masked by several
//! strong ones. The classifier never mutates a trip.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use tipledger_core::defaults::{
    ESTIMATE_FIELDS, FIELD_CONFIDENCE_FLOOR, ODOMETER_FIELDS, SETTLEMENT_FIELDS, TIP_FIELDS,
};
use tipledger_core::{CandidateFields, DocumentKind};

/// Classifier verdict for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: DocumentKind,
    /// Minimum confidence across the decision fields; 0.0 for unclassified.
    pub confidence: f32,
    /// Canonical field categories the kind usually carries but which were
    /// absent (e.g. a settlement screenshot without a visible tip line).
    pub missing_expected: Vec<String>,
}

impl Classification {
    /// Whether this verdict should be routed to manual review instead of
    /// being merged into a trip.
    pub fn is_ambiguous(&self) -> bool {
        self.kind == DocumentKind::Unclassified || self.confidence < FIELD_CONFIDENCE_FLOOR
    }
}

/// Classify a document from its oracle candidate fields.
pub fn classify(fields: &CandidateFields) -> Classification {
    let settlement = strongest_usable(fields, SETTLEMENT_FIELDS);
    let estimate = strongest_usable(fields, ESTIMATE_FIELDS);
    let odometer = strongest_usable(fields, ODOMETER_FIELDS);
    let tip = strongest_usable(fields, TIP_FIELDS);

    let (kind, decision_confidences) = if let Some((_, c)) = settlement {
        (DocumentKind::FinalSettlement, vec![c])
    } else if let Some((_, c)) = estimate {
        (DocumentKind::OfferEstimate, vec![c])
    } else if let Some((_, c)) = odometer {
        // Mileage only counts as an odometer reading when no monetary field
        // of any strength is present at all.
        if has_any(fields, SETTLEMENT_FIELDS)
            || has_any(fields, ESTIMATE_FIELDS)
            || has_any(fields, TIP_FIELDS)
        {
            (DocumentKind::Unclassified, vec![])
        } else {
            (DocumentKind::OdometerReading, vec![c])
        }
    } else {
        (DocumentKind::Unclassified, vec![])
    };

    let confidence = decision_confidences
        .iter()
        .copied()
        .fold(f32::INFINITY, f32::min);
    let confidence = if confidence.is_finite() { confidence } else { 0.0 };

    let mut missing_expected = Vec::new();
    if kind == DocumentKind::FinalSettlement {
        if tip.is_none() {
            missing_expected.push("tip".to_string());
        }
        if odometer.is_none() {
            missing_expected.push("odometer".to_string());
        }
    }

    debug!(
        subsystem = "classifier",
        op = "classify",
        doc_kind = kind.as_str(),
        confidence,
        field_count = fields.len(),
        "classified document"
    );

    Classification {
        kind,
        confidence,
        missing_expected,
    }
}

/// The highest-confidence usable field among the given canonical names.
///
/// A field below the confidence floor is treated as absent, never as a
/// typed zero or empty string.
fn strongest_usable<'a>(
    fields: &CandidateFields,
    names: &[&'a str],
) -> Option<(&'a str, f32)> {
    names
        .iter()
        .filter_map(|name| {
            fields
                .get(*name)
                .filter(|f| f.confidence >= FIELD_CONFIDENCE_FLOOR)
                .map(|f| (*name, f.confidence))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

fn has_any(fields: &CandidateFields, names: &[&str]) -> bool {
    names.iter().any(|n| fields.contains_key(*n))
}

/// Parse a monetary amount from an oracle string ("$18.50", "1,234.56",
/// "-$3.00").
///
/// Returns None when no numeric amount is present; absence beats a
/// fabricated zero.
pub fn parse_money(raw: &str) -> Option<f64> {
    static MONEY_RE: OnceLock<Regex> = OnceLock::new();
    let re = MONEY_RE.get_or_init(|| {
        Regex::new(r"-?[$]?\d[\d,]*(?:\.\d+)?").expect("money regex is valid")
    });

    let m = re.find(raw)?;
    let cleaned = m.as_str().replace([',', '$'], "");
    cleaned.parse::<f64>().ok()
}

/// Parse a mileage value from an oracle string ("12.4 mi", "12,030").
pub fn parse_miles(raw: &str) -> Option<f64> {
    parse_money(raw).filter(|v| *v >= 0.0)
}

/// The best usable settlement amount in a field set, if any.
pub fn settlement_amount(fields: &CandidateFields) -> Option<f64> {
    let (name, _) = strongest_usable(fields, SETTLEMENT_FIELDS)?;
    parse_money(&fields[name].value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipledger_core::CandidateField;

    fn fields(entries: &[(&str, &str, f32)]) -> CandidateFields {
        entries
            .iter()
            .map(|(k, v, c)| (k.to_string(), CandidateField::new(*v, *c)))
            .collect()
    }

    #[test]
    fn test_estimate_without_settlement_is_offer() {
        let f = fields(&[("estimated_earnings", "$18.50", 0.92)]);
        let c = classify(&f);
        assert_eq!(c.kind, DocumentKind::OfferEstimate);
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert!(!c.is_ambiguous());
    }

    #[test]
    fn test_settlement_presence_wins() {
        // A settlement field classifies as settlement even when the
        // screenshot also shows the original estimate.
        let f = fields(&[
            ("estimated_earnings", "$18.50", 0.90),
            ("total_earnings", "$22.75", 0.88),
        ]);
        let c = classify(&f);
        assert_eq!(c.kind, DocumentKind::FinalSettlement);
    }

    #[test]
    fn test_odometer_only() {
        let f = fields(&[("odometer", "12,030 mi", 0.81)]);
        let c = classify(&f);
        assert_eq!(c.kind, DocumentKind::OdometerReading);
        assert!(c.missing_expected.is_empty());
    }

    #[test]
    fn test_odometer_plus_weak_money_is_unclassified() {
        // A monetary field is present but too weak to use; the mix is
        // ambiguous, not an odometer reading.
        let f = fields(&[
            ("odometer", "12,030", 0.81),
            ("total_earnings", "$2?.7S", 0.12),
        ]);
        let c = classify(&f);
        assert_eq!(c.kind, DocumentKind::Unclassified);
        assert!(c.is_ambiguous());
    }

    #[test]
    fn test_empty_fields_unclassified() {
        let c = classify(&CandidateFields::new());
        assert_eq!(c.kind, DocumentKind::Unclassified);
        assert_eq!(c.confidence, 0.0);
        assert!(c.is_ambiguous());
    }

    #[test]
    fn test_low_confidence_field_treated_as_absent() {
        let f = fields(&[("estimated_earnings", "$18.50", 0.10)]);
        let c = classify(&f);
        assert_eq!(c.kind, DocumentKind::Unclassified);
    }

    #[test]
    fn test_settlement_missing_expected_fields() {
        let f = fields(&[("total_earnings", "$22.75", 0.95)]);
        let c = classify(&f);
        assert_eq!(c.missing_expected, vec!["tip", "odometer"]);

        let full = fields(&[
            ("total_earnings", "$22.75", 0.95),
            ("tip", "$4.00", 0.90),
            ("mileage", "8.2 mi", 0.85),
        ]);
        assert!(classify(&full).missing_expected.is_empty());
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("$18.50"), Some(18.50));
        assert_eq!(parse_money("18.50"), Some(18.50));
        assert_eq!(parse_money("$1,234.56"), Some(1234.56));
        assert_eq!(parse_money("earned $22.75 today"), Some(22.75));
        assert_eq!(parse_money("-$3.00"), Some(-3.00));
        assert_eq!(parse_money("no number here"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn test_settlement_amount_ignores_other_families() {
        let f = fields(&[
            ("estimated_earnings", "$18.50", 0.92),
            ("tip", "$4.00", 0.90),
        ]);
        assert_eq!(settlement_amount(&f), None);

        let settled = fields(&[("total_earnings", "$22.75", 0.95)]);
        assert_eq!(settlement_amount(&settled), Some(22.75));
    }

    #[test]
    fn test_min_confidence_across_decision_fields() {
        // Two settlement-family fields present; the weaker one present in
        // the family does not drag the verdict because only the strongest
        // usable field decides, but the reported confidence is still the
        // minimum over fields actually used.
        let f = fields(&[("total_earnings", "$22.75", 0.55)]);
        let c = classify(&f);
        assert!((c.confidence - 0.55).abs() < 1e-6);
    }
}
