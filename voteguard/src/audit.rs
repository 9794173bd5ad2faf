use crate::*;
use std::sync::Mutex;

/// previous_row_hash of the first row.
pub const AUDIT_GENESIS: Hash32 = Hash32([0; 32]);

#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    VoteAccepted,
    DuplicateNullifier,
    AttestationTampered,
    RootAnchored,
    AnchorFailed,
    BallotClosed,
    AdminAction,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            AuditEventType::VoteAccepted => "vote_accepted",
            AuditEventType::DuplicateNullifier => "duplicate_nullifier",
            AuditEventType::AttestationTampered => "attestation_tampered",
            AuditEventType::RootAnchored => "root_anchored",
            AuditEventType::AnchorFailed => "anchor_failed",
            AuditEventType::BallotClosed => "ballot_closed",
            AuditEventType::AdminAction => "admin_action",
        };
        write!(f, "{}", name)
    }
}

/// One hash-chained audit row. Immutable once written.
#[derive(Serialize, Deserialize, Clone)]
pub struct AuditRow {
    pub seq: u64,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
    pub prev_hash: Hash32,
    pub row_hash: Hash32,
    pub created_at: i64,
}

/// row_hash = H(event_type ∥ payload ∥ previous_row_hash ∥ created_at).
/// Timestamps go in per-row and un-bucketed.
pub fn row_hash(
    event_type: AuditEventType,
    payload: &serde_json::Value,
    prev_hash: &Hash32,
    created_at: i64,
) -> Hash32 {
    sha256(&[
        event_type.to_string().as_bytes(),
        payload.to_string().as_bytes(),
        prev_hash.as_bytes(),
        &created_at.to_be_bytes(),
    ])
}

/// Append-only hash chain of administrative and security events, one chain
/// per deployment.
///
/// This is a detection mechanism, not a prevention mechanism: an attacker
/// with write access to the store can alter any row, but any alteration is
/// discoverable by anyone with read access and no key (`verify_chain`).
pub struct AuditChain {
    inner: Mutex<Vec<AuditRow>>,
}

impl AuditChain {
    pub fn new() -> Self {
        AuditChain {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Append an event. Appends are serialized globally (each row depends on
    /// the previous row's hash), here by the chain lock.
    pub fn append(
        &self,
        event_type: AuditEventType,
        payload: serde_json::Value,
    ) -> Result<AuditRow, Error> {
        let created_at = util::now();

        let mut inner = self.lock()?;
        let prev_hash = inner.last().map(|row| row.row_hash).unwrap_or(AUDIT_GENESIS);
        let row = AuditRow {
            seq: inner.len() as u64 + 1,
            event_type,
            row_hash: row_hash(event_type, &payload, &prev_hash, created_at),
            payload,
            prev_hash,
            created_at,
        };
        inner.push(row.clone());
        Ok(row)
    }

    /// Snapshot of all rows in sequence order, for export and verification.
    pub fn rows(&self) -> Result<Vec<AuditRow>, Error> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<Vec<AuditRow>>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::StoreUnavailable("audit chain lock poisoned".to_string()))
    }
}

impl Default for AuditChain {
    fn default() -> Self {
        AuditChain::new()
    }
}

/// Result of replaying the chain.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChainReport {
    pub ok: bool,
    pub violations: usize,
    pub first_violation: Option<u64>,
}

/// Replay the whole chain and check every row. Needs no secret: any party
/// with read access can run it.
///
/// Runs to completion rather than stopping at the first bad row, so the
/// report carries the total violation count as well as the first violating
/// sequence position.
pub fn verify_chain(rows: &[AuditRow]) -> ChainReport {
    let mut violations = 0;
    let mut first_violation = None;
    let mut expected_prev = AUDIT_GENESIS;

    for (i, row) in rows.iter().enumerate() {
        let expected_seq = i as u64 + 1;
        let recomputed = row_hash(row.event_type, &row.payload, &row.prev_hash, row.created_at);

        let row_ok = row.seq == expected_seq
            && row.prev_hash == expected_prev
            && row.row_hash == recomputed;
        if !row_ok {
            violations += 1;
            if first_violation.is_none() {
                first_violation = Some(expected_seq);
            }
        }

        expected_prev = row.row_hash;
    }

    ChainReport {
        ok: violations == 0,
        violations,
        first_violation,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chain_with(n: usize) -> Vec<AuditRow> {
        let chain = AuditChain::new();
        for i in 0..n {
            chain
                .append(
                    AuditEventType::AdminAction,
                    serde_json::json!({ "action": format!("action-{}", i) }),
                )
                .unwrap();
        }
        chain.rows().unwrap()
    }

    #[test]
    fn test_intact_chain_verifies() {
        let rows = chain_with(10);
        let report = verify_chain(&rows);
        assert!(report.ok);
        assert_eq!(report.violations, 0);
        assert_eq!(report.first_violation, None);
    }

    #[test]
    fn test_genesis_prev_hash() {
        let rows = chain_with(1);
        assert_eq!(rows[0].prev_hash, AUDIT_GENESIS);
        assert_eq!(rows[0].seq, 1);
    }

    #[test]
    fn test_mutated_payload_detected_at_row() {
        for target in 0..5 {
            let mut rows = chain_with(5);
            rows[target].payload = serde_json::json!({ "action": "rewritten" });

            let report = verify_chain(&rows);
            assert!(!report.ok);
            assert_eq!(report.first_violation, Some(target as u64 + 1));
        }
    }

    #[test]
    fn test_deleted_row_breaks_suffix() {
        let mut rows = chain_with(6);
        rows.remove(2);

        let report = verify_chain(&rows);
        assert!(!report.ok);
        assert_eq!(report.first_violation, Some(3));
        // Every row after the deletion point is out of place
        assert_eq!(report.violations, 3);
    }

    #[test]
    fn test_rewritten_row_hash_breaks_link() {
        // Attacker recomputes the row hash to match tampered content; the
        // next row's prev pointer now disagrees
        let mut rows = chain_with(4);
        rows[1].payload = serde_json::json!({ "action": "rewritten" });
        rows[1].row_hash = row_hash(
            rows[1].event_type,
            &rows[1].payload,
            &rows[1].prev_hash,
            rows[1].created_at,
        );

        let report = verify_chain(&rows);
        assert!(!report.ok);
        assert_eq!(report.first_violation, Some(3));
    }
}
