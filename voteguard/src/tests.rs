use super::*;
use uuid::Uuid;

fn engine() -> VoteGuard<MemLedger> {
    let (secret, _) = generate_keypair();
    VoteGuard::new(VoteGuardConfig::default(), secret, [42; 32], MemLedger::new())
}

fn voter(n: usize) -> VerifiedContext {
    let mut demographics = Demographics::new();
    demographics.insert(
        "gender".to_string(),
        if n % 2 == 0 { "f" } else { "m" }.to_string(),
    );
    demographics.insert(
        "age".to_string(),
        ["18-24", "25-34", "35-44", "45-54"][n % 4].to_string(),
    );
    VerifiedContext {
        subject: format!("subject-{}", n),
        demographics,
    }
}

fn cast(
    engine: &VoteGuard<MemLedger>,
    ballot_id: Uuid,
    option_id: &str,
    voter: &VerifiedContext,
) -> Result<VoteReceipt, Error> {
    let bucket = time_bucket(now());
    let (nonce, _) = engine.request_nonce()?;
    let attestation = engine.issue_attestation(ballot_id, option_id, bucket, nonce, voter)?;
    engine.submit_vote(ballot_id, option_id, bucket, &attestation)
}

#[test]
fn end_to_end_ballot() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();

    // First voter: full challenge -> attestation -> vote flow
    let bucket = time_bucket(now());
    let (nonce, ttl) = engine.request_nonce().unwrap();
    assert_eq!(ttl, NONCE_TTL_SECS);

    let attestation = engine
        .issue_attestation(ballot_id, "opt-A", bucket, nonce, &voter(0))
        .unwrap();
    let receipt = engine
        .submit_vote(ballot_id, "opt-A", bucket, &attestation)
        .unwrap();

    // One leaf: the root is the leaf hash itself
    assert_eq!(receipt.leaf_index, 0);
    let root = engine.merkle_root(&ballot_id).unwrap().unwrap();
    assert_eq!(root.leaf_count, 1);
    assert_eq!(root.root, receipt.leaf_hash);

    // The receipt verifies, signature and ledger binding both
    let check = engine.verify_receipt(&receipt).unwrap();
    assert!(check.valid);
    assert!(check.signature_valid);

    // 39 more voters, split 21/19 across the two options
    for n in 1..40 {
        let option_id = if n < 21 { "opt-A" } else { "opt-B" };
        cast(&engine, ballot_id, option_id, &voter(n)).unwrap();
    }

    let root = engine.merkle_root(&ballot_id).unwrap().unwrap();
    assert_eq!(root.leaf_count, 40);

    // Early receipts still verify against the replayed prefix root
    let check = engine.verify_receipt(&receipt).unwrap();
    assert!(check.valid);

    // Inclusion proof for the first leaf under the current root
    let proof = engine
        .inclusion_proof(&ballot_id, &receipt.leaf_hash)
        .unwrap()
        .unwrap();
    assert!(verify_inclusion(&receipt.leaf_hash, &proof, &root.root));

    // Results: total 40 >= k, 21 and 19 both below k, so complementary
    // suppression hides both options
    let view = engine.query_results(&ballot_id, &[]).unwrap();
    assert_eq!(view.total, CellValue::Count(40));
    assert!(view.options.values().all(|c| c.is_suppressed()));

    // Anchor and audit trail
    let sink = MemAnchorSink::new();
    let anchor = engine.anchor_root(&ballot_id, &sink).unwrap();
    assert_eq!(anchor.root, root.root);
    assert_eq!(sink.anchored(), vec![root.root]);

    let report = engine.verify_audit_chain().unwrap();
    assert!(report.ok);
    // 40 accepted votes plus the anchor event
    assert_eq!(engine.audit_rows().unwrap().len(), 41);
}

#[test]
fn double_vote_rejected_and_audited() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();

    cast(&engine, ballot_id, "opt-A", &voter(0)).unwrap();

    // Same subject, fresh nonce and attestation, even a different option:
    // the server-side nullifier is the same
    let err = cast(&engine, ballot_id, "opt-B", &voter(0)).unwrap_err();
    assert!(matches!(err, Error::DuplicateNullifier(b) if b == ballot_id));

    let rows = engine.audit_rows().unwrap();
    assert!(rows
        .iter()
        .any(|r| r.event_type == AuditEventType::DuplicateNullifier));

    // Exactly one leaf landed
    let root = engine.merkle_root(&ballot_id).unwrap().unwrap();
    assert_eq!(root.leaf_count, 1);

    // Same subject on a different ballot is a different nullifier
    cast(&engine, Uuid::new_v4(), "opt-A", &voter(0)).unwrap();
}

#[test]
fn attestation_for_wrong_option_rejected() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();
    let bucket = time_bucket(now());

    let (nonce, _) = engine.request_nonce().unwrap();
    let attestation = engine
        .issue_attestation(ballot_id, "opt-A", bucket, nonce, &voter(0))
        .unwrap();

    // Present the opt-A credential with an opt-B vote
    let err = engine
        .submit_vote(ballot_id, "opt-B", bucket, &attestation)
        .unwrap_err();
    assert!(matches!(err, Error::AttestationInvalid));

    // Tamper evidence reached the chain before the rejection
    let rows = engine.audit_rows().unwrap();
    assert!(rows
        .iter()
        .any(|r| r.event_type == AuditEventType::AttestationTampered));

    // And nothing landed in the ledger
    assert!(engine.merkle_root(&ballot_id).unwrap().is_none());
}

#[test]
fn nonce_replay_rejected() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();
    let bucket = time_bucket(now());

    let (nonce, _) = engine.request_nonce().unwrap();
    engine
        .issue_attestation(ballot_id, "opt-A", bucket, nonce, &voter(0))
        .unwrap();

    let err = engine
        .issue_attestation(ballot_id, "opt-A", bucket, nonce, &voter(1))
        .unwrap_err();
    assert!(matches!(err, Error::NonceInvalid));
}

#[test]
fn overlapping_breakdown_rejected_until_close() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();

    for n in 0..64 {
        let option_id = if n % 2 == 0 { "opt-A" } else { "opt-B" };
        cast(&engine, ballot_id, option_id, &voter(n)).unwrap();
    }

    let gender = vec!["gender".to_string()];
    let gender_age = vec!["gender".to_string(), "age".to_string()];

    engine.query_results(&ballot_id, &gender).unwrap();
    let err = engine.query_results(&ballot_id, &gender_age).unwrap_err();
    assert!(matches!(err, Error::OverlappingQuery(_)));

    // Closing the ballot clears the shape history and records the close
    engine.close_ballot(&ballot_id).unwrap();
    engine.query_results(&ballot_id, &gender_age).unwrap();

    let rows = engine.audit_rows().unwrap();
    assert!(rows
        .iter()
        .any(|r| r.event_type == AuditEventType::BallotClosed));
    assert!(engine.verify_audit_chain().unwrap().ok);
}

#[test]
fn anchor_without_votes_fails() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();
    let sink = MemAnchorSink::new();

    let err = engine.anchor_root(&ballot_id, &sink).unwrap_err();
    assert!(matches!(err, Error::NothingToAnchor(b) if b == ballot_id));
    assert!(sink.anchored().is_empty());
}

#[test]
fn tampered_receipt_fails_verification() {
    let engine = engine();
    let ballot_id = Uuid::new_v4();

    let mut receipt = cast(&engine, ballot_id, "opt-A", &voter(0)).unwrap();
    receipt.leaf_index = 5;

    let check = engine.verify_receipt(&receipt).unwrap();
    assert!(!check.valid);
    assert!(!check.signature_valid);
}

#[test]
fn concurrent_submissions_yield_verifiable_receipts() {
    use std::sync::{Arc, Barrier};
    use std::thread;

    let engine = Arc::new(engine());
    let ballot_id = Uuid::new_v4();
    let bucket = time_bucket(now());

    // Attestations are issued up front; only the submissions race
    let mut attestations = Vec::new();
    for n in 0..8 {
        let (nonce, _) = engine.request_nonce().unwrap();
        let attestation = engine
            .issue_attestation(ballot_id, "opt-A", bucket, nonce, &voter(n))
            .unwrap();
        attestations.push(attestation);
    }

    let barrier = Arc::new(Barrier::new(attestations.len()));
    let handles: Vec<_> = attestations
        .into_iter()
        .map(|attestation| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine
                    .submit_vote(ballot_id, "opt-A", bucket, &attestation)
                    .unwrap()
            })
        })
        .collect();

    // Every accepted vote's receipt verifies, whatever interleaving the
    // submissions landed in: each receipt's root must be reproducible from
    // the leaf prefix up to its index
    for handle in handles {
        let receipt = handle.join().unwrap();
        let check = engine.verify_receipt(&receipt).unwrap();
        assert!(check.signature_valid);
        assert!(check.valid);
    }

    let root = engine.merkle_root(&ballot_id).unwrap().unwrap();
    assert_eq!(root.leaf_count, 8);
}

#[test]
fn field_nullifier_deployment() {
    let (secret, _) = generate_keypair();
    let config = VoteGuardConfig {
        nullifier_scheme: NullifierScheme::Field,
        ..VoteGuardConfig::default()
    };
    let engine = VoteGuard::new(config, secret, [42; 32], MemLedger::new());
    let ballot_id = Uuid::new_v4();

    cast(&engine, ballot_id, "opt-A", &voter(0)).unwrap();
    let err = cast(&engine, ballot_id, "opt-A", &voter(0)).unwrap_err();
    assert!(matches!(err, Error::DuplicateNullifier(_)));
}
