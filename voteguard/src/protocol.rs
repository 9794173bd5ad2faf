use crate::*;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Deployment configuration for the engine.
#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct VoteGuardConfig {
    pub nonce_ttl_secs: i64,
    pub attestation_ttl_secs: i64,
    pub nullifier_scheme: NullifierScheme,
    pub kanon: KAnonConfig,
}

impl Default for VoteGuardConfig {
    fn default() -> Self {
        VoteGuardConfig {
            nonce_ttl_secs: NONCE_TTL_SECS,
            attestation_ttl_secs: ATTESTATION_TTL_SECS,
            nullifier_scheme: NullifierScheme::Keyed,
            kanon: KAnonConfig::default(),
        }
    }
}

/// Current Merkle root for a ballot.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug)]
pub struct RootRecord {
    pub root: Hash32,
    pub leaf_count: u64,
}

#[derive(Serialize, Clone)]
struct ReceiptBody {
    ballot_id: Uuid,
    leaf_hash: Hash32,
    leaf_index: u64,
    root: Hash32,
}

impl ReceiptBody {
    fn as_bytes(&self) -> Vec<u8> {
        serde_cbor::to_vec(&self).expect("voteguard: unexpected error packing receipt")
    }
}

/// Signed proof of acceptance handed back to the voter. Binds the vote's
/// leaf hash to its position and the ballot root at acceptance time.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VoteReceipt {
    pub ballot_id: Uuid,
    pub leaf_hash: Hash32,
    pub leaf_index: u64,
    pub root: Hash32,
    pub key_id: String,

    #[serde(with = "EdSignatureHex")]
    pub sig: Signature,
}

impl VoteReceipt {
    fn body(&self) -> ReceiptBody {
        ReceiptBody {
            ballot_id: self.ballot_id,
            leaf_hash: self.leaf_hash,
            leaf_index: self.leaf_index,
            root: self.root,
        }
    }

    pub fn verify_signature(&self, public: &PublicKey) -> bool {
        public
            .verify_strict(&self.body().as_bytes(), &self.sig)
            .is_ok()
    }
}

/// Outcome of checking a receipt against the ledger.
#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct ReceiptCheck {
    pub valid: bool,
    pub signature_valid: bool,
}

/// The vote-integrity engine: challenge issuance, attestation, submission,
/// accumulation, audit, and suppressed analytics behind one facade.
///
/// Stateless between requests apart from the shared stores; submissions for
/// different ballots proceed fully in parallel.
pub struct VoteGuard<L: VoteLedger> {
    issuer: AttestationIssuer,
    verifier: AttestationVerifier,
    nullifier: Box<dyn NullifierFn>,
    nonces: SingleUseTokenStore,
    ledger: L,
    audit: AuditChain,
    kanon: KAnonEngine,
    roots: Mutex<HashMap<Uuid, RootRecord>>,
    anchors: Mutex<Vec<AnchorRecord>>,

    // Ledger insert and root recomputation form one read-modify-write over
    // the ballot's leaf set, so they are serialized per ballot. Ballots never
    // block each other.
    ballot_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<L: VoteLedger> VoteGuard<L> {
    pub fn new(
        config: VoteGuardConfig,
        signing_secret: SecretKey,
        nullifier_secret: [u8; 32],
        ledger: L,
    ) -> Self {
        let issuer = AttestationIssuer::new(signing_secret, config.attestation_ttl_secs);
        let mut verifier = AttestationVerifier::new();
        verifier.add_key(issuer.key_id(), issuer.public_key());

        VoteGuard {
            issuer,
            verifier,
            nullifier: config.nullifier_scheme.build(nullifier_secret),
            nonces: SingleUseTokenStore::new(config.nonce_ttl_secs),
            ledger,
            audit: AuditChain::new(),
            kanon: KAnonEngine::new(config.kanon),
            roots: Mutex::new(HashMap::new()),
            anchors: Mutex::new(Vec::new()),
            ballot_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Trust attestations signed by an earlier deployment key, so rotation
    /// does not invalidate in-flight credentials.
    pub fn trust_key(&mut self, key_id: &str, public: PublicKey) {
        self.verifier.add_key(key_id, public);
    }

    pub fn signing_key_id(&self) -> &str {
        self.issuer.key_id()
    }

    pub fn signing_public_key(&self) -> PublicKey {
        self.issuer.public_key()
    }

    /// `requestNonce`: a fresh single-use challenge and its ttl.
    pub fn request_nonce(&self) -> Result<(NonceToken, i64), Error> {
        self.nonces.issue()
    }

    /// `issueAttestation`: consume the challenge and bind {ballot, option,
    /// payload hash} to the verified subject.
    pub fn issue_attestation(
        &self,
        ballot_id: Uuid,
        option_id: &str,
        timestamp_bucket: i64,
        nonce: NonceToken,
        context: &VerifiedContext,
    ) -> Result<SignedAttestation, Error> {
        self.issuer
            .issue(&self.nonces, ballot_id, option_id, timestamp_bucket, nonce, context)
    }

    /// `submitVote`: the submission state machine.
    ///
    /// Received -> AttestationValid -> NullifierComputed ->
    /// LedgerInsertAttempted -> Accepted | Rejected(DuplicateNullifier).
    /// Strictly sequential; a request failing attestation never reaches
    /// nullifier computation. The nullifier is recomputed here from the
    /// verified subject handle; nothing client-supplied is trusted for it.
    pub fn submit_vote(
        &self,
        ballot_id: Uuid,
        option_id: &str,
        timestamp_bucket: i64,
        attestation: &SignedAttestation,
    ) -> Result<VoteReceipt, Error> {
        let context = match self.verifier.verify_detailed(
            attestation,
            &ballot_id,
            option_id,
            timestamp_bucket,
            util::now(),
        ) {
            Ok(context) => context,
            Err(failure) => {
                log::warn!(
                    "vote rejected for ballot {}: attestation {}",
                    ballot_id,
                    failure.name()
                );
                // Tamper evidence goes on the chain before the caller hears
                // anything
                if failure.is_tamper() {
                    self.audit.append(
                        AuditEventType::AttestationTampered,
                        serde_json::json!({
                            "ballot_id": ballot_id,
                            "reason": failure.name(),
                        }),
                    )?;
                }
                return Err(Error::AttestationInvalid);
            }
        };

        let nullifier = self.nullifier.derive(&ballot_id, &context.subject);

        let created_at = util::now();
        let leaf = leaf_hash(&ballot_id, option_id, &nullifier, created_at);
        let record = VoteRecord {
            ballot_id,
            leaf_hash: leaf,
            option_id: option_id.to_string(),
            demographics: context.demographics,
            created_at,
        };

        // Insert and root refresh stay inside one critical section: a second
        // same-ballot insert between them would leave the receipt signed over
        // a root its leaf prefix cannot reproduce.
        let ballot_lock = self.ballot_lock(&ballot_id)?;
        let (ledger_ref, root_record) = {
            let _guard = ballot_lock
                .lock()
                .map_err(|_| Error::StoreUnavailable("ballot lock poisoned".to_string()))?;

            let ledger_ref = match self.ledger.insert_vote(&nullifier, record) {
                Ok(ledger_ref) => ledger_ref,
                Err(Error::DuplicateNullifier(ballot_id)) => {
                    log::warn!("double-vote attempt on ballot {}", ballot_id);
                    self.audit.append(
                        AuditEventType::DuplicateNullifier,
                        serde_json::json!({
                            "ballot_id": ballot_id,
                            "nullifier": nullifier.to_string(),
                        }),
                    )?;
                    return Err(Error::DuplicateNullifier(ballot_id));
                }
                Err(e) => return Err(e),
            };

            (ledger_ref, self.refresh_root(&ballot_id)?)
        };
        self.audit.append(
            AuditEventType::VoteAccepted,
            serde_json::json!({
                "ballot_id": ballot_id,
                "leaf_hash": leaf.to_string(),
                "leaf_index": ledger_ref.leaf_index,
                "root": root_record.root.to_string(),
            }),
        )?;
        log::debug!(
            "vote accepted on ballot {} at leaf {}",
            ballot_id,
            ledger_ref.leaf_index
        );

        Ok(self.sign_receipt(ballot_id, leaf, ledger_ref.leaf_index, root_record.root))
    }

    /// `getMerkleRoot`
    pub fn merkle_root(&self, ballot_id: &Uuid) -> Result<Option<RootRecord>, Error> {
        let roots = self
            .roots
            .lock()
            .map_err(|_| Error::StoreUnavailable("root store lock poisoned".to_string()))?;
        Ok(roots.get(ballot_id).copied())
    }

    /// Inclusion proof for a leaf under the ballot's current root.
    pub fn inclusion_proof(
        &self,
        ballot_id: &Uuid,
        leaf: &Hash32,
    ) -> Result<Option<MerkleProof>, Error> {
        let leaves = self.ledger.leaves(ballot_id)?;
        let index = match leaves.iter().position(|l| l == leaf) {
            Some(index) => index,
            None => return Ok(None),
        };
        Ok(gen_proof(&leaves, index))
    }

    /// `verifyReceipt`: signature plus replay of the root the receipt claims
    /// was current when the vote landed.
    pub fn verify_receipt(&self, receipt: &VoteReceipt) -> Result<ReceiptCheck, Error> {
        let signature_valid = match self.verifier_key(&receipt.key_id) {
            Some(public) => receipt.verify_signature(&public),
            None => false,
        };

        let leaves = self.ledger.leaves(&receipt.ballot_id)?;
        let index = receipt.leaf_index as usize;
        let bound_to_ledger = index < leaves.len()
            && leaves[index] == receipt.leaf_hash
            && build_root(&leaves[..=index]) == Some(receipt.root);

        Ok(ReceiptCheck {
            valid: signature_valid && bound_to_ledger,
            signature_valid,
        })
    }

    /// `queryResults`, suppressed per the k-anonymity rules.
    pub fn query_results(
        &self,
        ballot_id: &Uuid,
        breakdown_dims: &[String],
    ) -> Result<ResultView, Error> {
        self.kanon.query_results(&self.ledger, ballot_id, breakdown_dims)
    }

    /// Suppressed per-event-type counts over the audit chain.
    pub fn security_event_summary(
        &self,
    ) -> Result<indexmap::IndexMap<String, CellValue>, Error> {
        Ok(self.kanon.security_event_counts(&self.audit.rows()?))
    }

    /// Close a ballot: drop its query-shape history and record the close.
    pub fn close_ballot(&self, ballot_id: &Uuid) -> Result<(), Error> {
        self.kanon.clear_ballot(ballot_id)?;
        self.audit.append(
            AuditEventType::BallotClosed,
            serde_json::json!({ "ballot_id": ballot_id }),
        )?;
        Ok(())
    }

    /// Publish the ballot's current root to an external immutable record and
    /// keep the returned reference. A failure is recorded and surfaced to the
    /// caller's scheduler; the engine itself never retries.
    pub fn anchor_root(
        &self,
        ballot_id: &Uuid,
        sink: &dyn AnchorSink,
    ) -> Result<AnchorRecord, Error> {
        let root_record = self
            .merkle_root(ballot_id)?
            .ok_or(Error::NothingToAnchor(*ballot_id))?;

        let external_ref = match sink.anchor(&root_record.root) {
            Ok(external_ref) => external_ref,
            Err(e) => {
                self.audit.append(
                    AuditEventType::AnchorFailed,
                    serde_json::json!({
                        "ballot_id": ballot_id,
                        "root": root_record.root.to_string(),
                        "error": e.to_string(),
                    }),
                )?;
                return Err(e);
            }
        };

        let record = AnchorRecord {
            ballot_id: *ballot_id,
            root: root_record.root,
            external_ref,
            anchored_at: util::now(),
        };

        self.audit.append(
            AuditEventType::RootAnchored,
            serde_json::json!({
                "ballot_id": ballot_id,
                "root": record.root.to_string(),
                "external_ref": record.external_ref,
            }),
        )?;

        let mut anchors = self
            .anchors
            .lock()
            .map_err(|_| Error::StoreUnavailable("anchor store lock poisoned".to_string()))?;
        anchors.push(record.clone());

        Ok(record)
    }

    pub fn anchors(&self) -> Result<Vec<AnchorRecord>, Error> {
        self.anchors
            .lock()
            .map(|anchors| anchors.clone())
            .map_err(|_| Error::StoreUnavailable("anchor store lock poisoned".to_string()))
    }

    /// `verifyAuditChain`
    pub fn verify_audit_chain(&self) -> Result<ChainReport, Error> {
        Ok(verify_chain(&self.audit.rows()?))
    }

    /// Export the audit rows for external verification.
    pub fn audit_rows(&self) -> Result<Vec<AuditRow>, Error> {
        self.audit.rows()
    }

    /// Record an administrative action on the chain.
    pub fn record_admin_action(&self, payload: serde_json::Value) -> Result<AuditRow, Error> {
        self.audit.append(AuditEventType::AdminAction, payload)
    }

    /// Reclaim expired nonce records.
    pub fn purge_expired_nonces(&self) -> Result<usize, Error> {
        self.nonces.purge_expired()
    }

    fn verifier_key(&self, key_id: &str) -> Option<PublicKey> {
        self.verifier.key(key_id).copied()
    }

    fn ballot_lock(&self, ballot_id: &Uuid) -> Result<Arc<Mutex<()>>, Error> {
        let mut locks = self
            .ballot_locks
            .lock()
            .map_err(|_| Error::StoreUnavailable("ballot lock table poisoned".to_string()))?;
        Ok(locks
            .entry(*ballot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Recompute and persist the ballot root from the ledger's ordered
    /// leaves. Caller holds the ballot lock.
    fn refresh_root(&self, ballot_id: &Uuid) -> Result<RootRecord, Error> {
        let leaves = self.ledger.leaves(ballot_id)?;
        let root = build_root(&leaves)
            .ok_or_else(|| Error::StoreUnavailable("ledger has no leaves for ballot".to_string()))?;
        let record = RootRecord {
            root,
            leaf_count: leaves.len() as u64,
        };

        let mut roots = self
            .roots
            .lock()
            .map_err(|_| Error::StoreUnavailable("root store lock poisoned".to_string()))?;
        roots.insert(*ballot_id, record);
        Ok(record)
    }

    fn sign_receipt(
        &self,
        ballot_id: Uuid,
        leaf_hash: Hash32,
        leaf_index: u64,
        root: Hash32,
    ) -> VoteReceipt {
        let body = ReceiptBody {
            ballot_id,
            leaf_hash,
            leaf_index,
            root,
        };
        let sig = self.issuer.sign(&body.as_bytes());

        VoteReceipt {
            ballot_id,
            leaf_hash,
            leaf_index,
            root,
            key_id: self.issuer.key_id().to_string(),
            sig,
        }
    }
}
