//! End-to-end upload flow tests over the in-memory stores.
//!
//! Covers the gate's ordered rejection rules, classification routing, trip
//! state transitions, variance, and the conflicting-settlement review flow.

use std::sync::Arc;

use tipledger_core::{
    CandidateField, CandidateFields, DocumentKind, DocumentStatus, DocumentStore,
    DuplicateMatchMethod, Error, RejectReason, TripState, UploadOutcome,
};
use tipledger_db::memory::MemoryStores;
use tipledger_engine::{EngineConfig, MockOracle, UploadService};

/// Synthetic PNG payload: valid signature, deterministic filler.
fn png_bytes(len: usize, seed: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; len.max(16)];
    bytes[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    for (i, b) in bytes.iter_mut().enumerate().skip(8) {
        *b = seed.wrapping_add((i % 251) as u8);
    }
    bytes
}

fn one_field(name: &str, value: &str, confidence: f32) -> CandidateFields {
    let mut fields = CandidateFields::new();
    fields.insert(name.to_string(), CandidateField::new(value, confidence));
    fields
}

fn settlement_fields(amount: &str) -> CandidateFields {
    let mut fields = one_field("total_earnings", amount, 0.93);
    fields.insert("tip".to_string(), CandidateField::new("$4.00", 0.88));
    fields
}

struct Harness {
    stores: MemoryStores,
    oracle: Arc<MockOracle>,
    service: UploadService,
}

fn harness() -> Harness {
    let stores = MemoryStores::new();
    let oracle = Arc::new(MockOracle::new());
    let service = UploadService::new(
        stores.documents(),
        stores.trips(),
        stores.cache(),
        stores.sessions(),
        oracle.clone(),
        EngineConfig::default(),
    );
    Harness {
        stores,
        oracle,
        service,
    }
}

fn accepted(outcome: UploadOutcome) -> (uuid::Uuid, uuid::Uuid, DocumentKind, TripState) {
    match outcome {
        UploadOutcome::Accepted {
            document_id,
            trip_id,
            kind,
            trip_state,
        } => (document_id, trip_id, kind, trip_state),
        other => panic!("expected Accepted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_estimate_then_settlement_completes_trip_with_variance() {
    let h = harness();

    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;
    let outcome = h
        .service
        .submit_upload(&png_bytes(4096, 1), "offer.png", None)
        .await
        .unwrap();
    let (_, trip_id, kind, state) = accepted(outcome);
    assert_eq!(kind, DocumentKind::OfferEstimate);
    assert_eq!(state, TripState::Partial);

    h.oracle.push_fields(settlement_fields("$22.75")).await;
    let outcome = h
        .service
        .submit_upload(&png_bytes(4096, 2), "settlement.png", Some(trip_id))
        .await
        .unwrap();
    let (_, settle_trip, kind, state) = accepted(outcome);
    assert_eq!(settle_trip, trip_id);
    assert_eq!(kind, DocumentKind::FinalSettlement);
    assert_eq!(state, TripState::Complete);

    let trip = h.service.get_trip(trip_id).await.unwrap();
    assert_eq!(trip.estimate_amount, Some(18.50));
    assert_eq!(trip.settlement_amount, Some(22.75));
    let variance = trip.variance.expect("complete trip has variance");
    assert!((variance.variance - 4.25).abs() < 1e-9);
    assert_eq!(
        variance.accuracy,
        tipledger_core::VarianceAccuracy::Over
    );
    let metrics = trip.metrics.expect("complete trip has metrics");
    assert_eq!(metrics.total_earned, 22.75);
    assert_eq!(trip.document_ids.len(), 2);
}

#[tokio::test]
async fn test_byte_identical_resubmit_is_rejected_with_audit_record() {
    let h = harness();
    let bytes = png_bytes(4096, 7);

    h.oracle
        .push_fields(one_field("estimated_earnings", "$12.00", 0.85))
        .await;
    let (doc_id, _, _, _) = accepted(
        h.service
            .submit_upload(&bytes, "offer.png", None)
            .await
            .unwrap(),
    );

    // Same bytes under a new filename: still an exact duplicate.
    let outcome = h
        .service
        .submit_upload(&bytes, "renamed.png", None)
        .await
        .unwrap();
    match outcome {
        UploadOutcome::Rejected {
            reason,
            matched_document_id,
        } => {
            assert_eq!(reason, RejectReason::ExactDuplicate);
            assert_eq!(matched_document_id, Some(doc_id));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }

    let blocks = h.service.duplicate_blocks_for(doc_id).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].method, DuplicateMatchMethod::ExactHash);
    assert_eq!(blocks[0].matched_document_id, doc_id);
}

#[tokio::test]
async fn test_near_duplicate_caught_by_similarity_hash() {
    let h = harness();
    // Sampled positions are multiples of len/64; an edit between samples
    // changes the exact hash but survives the similarity hash.
    let original = png_bytes(8192, 3);
    let mut edited = original.clone();
    edited[1001] ^= 0xFF;

    h.oracle
        .push_fields(one_field("estimated_earnings", "$9.00", 0.8))
        .await;
    let (doc_id, _, _, _) = accepted(
        h.service
            .submit_upload(&original, "a.png", None)
            .await
            .unwrap(),
    );

    let outcome = h
        .service
        .submit_upload(&edited, "b.png", None)
        .await
        .unwrap();
    match outcome {
        UploadOutcome::Rejected {
            reason,
            matched_document_id,
        } => {
            assert_eq!(reason, RejectReason::NearDuplicate);
            assert_eq!(matched_document_id, Some(doc_id));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rapid_resubmit_same_name_and_size() {
    let h = harness();

    h.oracle
        .push_fields(one_field("estimated_earnings", "$9.00", 0.8))
        .await;
    accepted(
        h.service
            .submit_upload(&png_bytes(4096, 10), "trip.png", None)
            .await
            .unwrap(),
    );

    // Different content entirely, but same filename and byte size inside
    // the resubmit window.
    let outcome = h
        .service
        .submit_upload(&png_bytes(4096, 99), "trip.png", None)
        .await
        .unwrap();
    match outcome {
        UploadOutcome::Rejected { reason, .. } => {
            assert_eq!(reason, RejectReason::RapidResubmit)
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_image_upload_blocked_before_the_gate() {
    let h = harness();
    let outcome = h
        .service
        .submit_upload(b"%PDF-1.4 not a screenshot", "doc.pdf", None)
        .await
        .unwrap();
    match outcome {
        UploadOutcome::Rejected {
            reason,
            matched_document_id,
        } => {
            assert_eq!(reason, RejectReason::InvalidUpload);
            assert_eq!(matched_document_id, None);
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ambiguous_document_routed_to_review_not_merged() {
    let h = harness();

    // A weak settlement field below the confidence floor.
    h.oracle
        .push_fields(one_field("total_earnings", "$20.00", 0.2))
        .await;
    let outcome = h
        .service
        .submit_upload(&png_bytes(4096, 20), "blurry.png", None)
        .await
        .unwrap();
    let document_id = match outcome {
        UploadOutcome::NeedsReview { document_id, .. } => document_id,
        other => panic!("expected NeedsReview, got {other:?}"),
    };

    // Persisted as classified for audit, but never attached to a trip.
    let doc = h.stores.documents().fetch(document_id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Classified);
    assert_eq!(doc.trip_id, None);
}

#[tokio::test]
async fn test_conflicting_settlements_flag_trip_for_review() {
    let h = harness();

    h.oracle.push_fields(settlement_fields("$22.75")).await;
    let (_, trip_id, _, _) = accepted(
        h.service
            .submit_upload(&png_bytes(4096, 30), "settle1.png", None)
            .await
            .unwrap(),
    );

    h.oracle.push_fields(settlement_fields("$31.10")).await;
    let outcome = h
        .service
        .submit_upload(&png_bytes(4096, 31), "settle2.png", Some(trip_id))
        .await
        .unwrap();
    accepted(outcome);

    let trip = h.service.get_trip(trip_id).await.unwrap();
    assert!(trip.needs_review);
    // Variance and metrics refuse to run until an operator reconciles.
    assert!(trip.variance.is_none());
    assert!(trip.metrics.is_none());
    assert_eq!(trip.document_ids.len(), 2);
}

#[tokio::test]
async fn test_trip_state_never_moves_backwards() {
    let h = harness();

    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;
    let (_, trip_id, _, _) = accepted(
        h.service
            .submit_upload(&png_bytes(4096, 40), "offer.png", None)
            .await
            .unwrap(),
    );

    h.oracle.push_fields(settlement_fields("$22.75")).await;
    let (_, _, _, state) = accepted(
        h.service
            .submit_upload(&png_bytes(4096, 41), "settle.png", Some(trip_id))
            .await
            .unwrap(),
    );
    assert_eq!(state, TripState::Complete);

    // An odometer reading implies only Incomplete; the high-water mark
    // holds at Complete and earnings-per-mile fills in.
    h.oracle
        .push_fields(one_field("odometer", "12.4 mi", 0.9))
        .await;
    let (_, _, kind, state) = accepted(
        h.service
            .submit_upload(&png_bytes(4096, 42), "odometer.png", Some(trip_id))
            .await
            .unwrap(),
    );
    assert_eq!(kind, DocumentKind::OdometerReading);
    assert_eq!(state, TripState::Complete);

    let trip = h.service.get_trip(trip_id).await.unwrap();
    let per_mile = trip.metrics.unwrap().earnings_per_mile.unwrap();
    assert!((per_mile - 22.75 / 12.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_oracle_failure_leaves_document_pending_and_retryable() {
    let h = harness();
    let bytes = png_bytes(4096, 50);

    h.oracle.push_failure("oracle timeout").await;
    let err = h
        .service
        .submit_upload(&bytes, "offer.png", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecognitionUnavailable(_)));
    assert!(err.is_retryable());

    // The admitted document owns its hash; a blind resubmit of the same
    // bytes is an exact duplicate. Recovery goes through retry instead.
    let resubmit = h
        .service
        .submit_upload(&bytes, "offer.png", None)
        .await
        .unwrap();
    let matched = match resubmit {
        UploadOutcome::Rejected {
            reason: RejectReason::ExactDuplicate,
            matched_document_id,
        } => matched_document_id.unwrap(),
        other => panic!("expected exact-duplicate rejection, got {other:?}"),
    };

    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;
    let outcome = h
        .service
        .retry_recognition(matched, &bytes, None)
        .await
        .unwrap();
    let (doc_id, _, kind, _) = accepted(outcome);
    assert_eq!(doc_id, matched);
    assert_eq!(kind, DocumentKind::OfferEstimate);
}

#[tokio::test]
async fn test_retry_with_different_bytes_is_refused() {
    let h = harness();
    let bytes = png_bytes(4096, 55);

    h.oracle.push_failure("oracle timeout").await;
    h.service
        .submit_upload(&bytes, "offer.png", None)
        .await
        .unwrap_err();
    let matched = match h
        .service
        .submit_upload(&bytes, "offer.png", None)
        .await
        .unwrap()
    {
        UploadOutcome::Rejected {
            matched_document_id,
            ..
        } => matched_document_id.unwrap(),
        other => panic!("expected exact-duplicate rejection, got {other:?}"),
    };

    // Substituted content must never be recognized under a document whose
    // audit record claims a different image.
    let err = h
        .service
        .retry_recognition(matched, &png_bytes(4096, 56), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // The refusal leaves the document pending; the original bytes still
    // go through.
    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;
    let (doc_id, _, _, _) = accepted(
        h.service
            .retry_recognition(matched, &bytes, None)
            .await
            .unwrap(),
    );
    assert_eq!(doc_id, matched);
}

#[tokio::test]
async fn test_document_attaches_to_exactly_one_trip() {
    let h = harness();
    let bytes = png_bytes(4096, 70);

    h.oracle.push_failure("oracle timeout").await;
    h.service
        .submit_upload(&bytes, "offer.png", None)
        .await
        .unwrap_err();
    let matched = match h
        .service
        .submit_upload(&bytes, "offer.png", None)
        .await
        .unwrap()
    {
        UploadOutcome::Rejected {
            matched_document_id,
            ..
        } => matched_document_id.unwrap(),
        other => panic!("expected exact-duplicate rejection, got {other:?}"),
    };

    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;
    let (_, trip_id, _, _) = accepted(
        h.service
            .retry_recognition(matched, &bytes, None)
            .await
            .unwrap(),
    );

    // The claim is spent; a second retry cannot merge the same document
    // into another trip.
    let err = h
        .service
        .retry_recognition(matched, &bytes, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let doc = h.stores.documents().fetch(matched).await.unwrap();
    assert_eq!(doc.trip_id, Some(trip_id));
}

#[tokio::test]
async fn test_concurrent_identical_uploads_admit_exactly_one() {
    let h = harness();
    let service = Arc::new(h.service);
    let bytes = png_bytes(4096, 60);

    // Both uploads may win the race; queue a response for each.
    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;
    h.oracle
        .push_fields(one_field("estimated_earnings", "$18.50", 0.91))
        .await;

    let a = {
        let service = service.clone();
        let bytes = bytes.clone();
        tokio::spawn(async move { service.submit_upload(&bytes, "offer.png", None).await })
    };
    let b = {
        let service = service.clone();
        let bytes = bytes.clone();
        tokio::spawn(async move { service.submit_upload(&bytes, "offer.png", None).await })
    };

    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    let accepted_count = outcomes
        .iter()
        .filter(|o| matches!(o, UploadOutcome::Accepted { .. }))
        .count();
    let rejected_count = outcomes
        .iter()
        .filter(|o| matches!(o, UploadOutcome::Rejected { .. }))
        .count();
    assert_eq!(accepted_count, 1, "exactly one winner: {outcomes:?}");
    assert_eq!(rejected_count, 1, "exactly one loser: {outcomes:?}");
}
