use crate::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

/// Vote leaf hash: H(ballot id ∥ option id ∥ nullifier ∥ time bucket).
/// The nullifier is in the preimage, so a leaf commits to "some eligible
/// identity voted once" without naming the identity.
pub fn leaf_hash(ballot_id: &Uuid, option_id: &str, nullifier: &Nullifier, created_at: i64) -> Hash32 {
    sha256(&[
        ballot_id.as_bytes(),
        option_id.as_bytes(),
        nullifier.as_bytes(),
        &time_bucket(created_at).to_be_bytes(),
    ])
}

/// One accepted vote. Deliberately excludes any voter identifier; the
/// demographics snapshot is already bucketed by enrollment. Written once,
/// never updated, never deleted.
#[derive(Serialize, Deserialize, Clone)]
pub struct VoteRecord {
    pub ballot_id: Uuid,
    pub leaf_hash: Hash32,
    pub option_id: String,
    pub demographics: Demographics,
    pub created_at: i64,
}

/// Position of an accepted vote in its ballot's ordered leaf sequence.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug)]
pub struct LedgerRef {
    pub ballot_id: Uuid,
    pub leaf_index: u64,
}

/// The append-only vote store.
///
/// `insert_vote` is the double-vote gate: it must enforce uniqueness of
/// (ballot id, nullifier) as one atomic insert in the backing store, not as
/// a read-then-write. A constraint violation maps to
/// `Error::DuplicateNullifier` and is never retried.
pub trait VoteLedger: Send + Sync {
    fn insert_vote(&self, nullifier: &Nullifier, record: VoteRecord) -> Result<LedgerRef, Error>;

    /// Leaf hashes for a ballot, ordered by insertion.
    fn leaves(&self, ballot_id: &Uuid) -> Result<Vec<Hash32>, Error>;

    /// Full vote rows for a ballot, ordered by insertion. Read-only; used by
    /// the analytics engine.
    fn votes(&self, ballot_id: &Uuid) -> Result<Vec<VoteRecord>, Error>;
}

#[derive(Default)]
struct MemLedgerInner {
    rows: HashMap<Uuid, Vec<VoteRecord>>,
    seen: HashSet<(Uuid, Nullifier)>,
}

/// A simple in-memory ledger. A durable deployment backs this trait with a
/// relational table carrying a UNIQUE(ballot_id, nullifier) constraint.
#[derive(Default)]
pub struct MemLedger {
    inner: Mutex<MemLedgerInner>,
}

impl MemLedger {
    pub fn new() -> Self {
        MemLedger::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<MemLedgerInner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::StoreUnavailable("vote ledger lock poisoned".to_string()))
    }
}

impl VoteLedger for MemLedger {
    fn insert_vote(&self, nullifier: &Nullifier, record: VoteRecord) -> Result<LedgerRef, Error> {
        let ballot_id = record.ballot_id;

        // Uniqueness check and append happen under one lock, the in-memory
        // equivalent of the store's atomic constraint.
        let mut inner = self.lock()?;
        if !inner.seen.insert((ballot_id, *nullifier)) {
            return Err(Error::DuplicateNullifier(ballot_id));
        }

        let rows = inner.rows.entry(ballot_id).or_insert_with(Vec::new);
        rows.push(record);

        Ok(LedgerRef {
            ballot_id,
            leaf_index: (rows.len() - 1) as u64,
        })
    }

    fn leaves(&self, ballot_id: &Uuid) -> Result<Vec<Hash32>, Error> {
        let inner = self.lock()?;
        Ok(inner
            .rows
            .get(ballot_id)
            .map(|rows| rows.iter().map(|r| r.leaf_hash).collect())
            .unwrap_or_default())
    }

    fn votes(&self, ballot_id: &Uuid) -> Result<Vec<VoteRecord>, Error> {
        let inner = self.lock()?;
        Ok(inner.rows.get(ballot_id).cloned().unwrap_or_default())
    }
}
