use crate::*;
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use std::collections::BTreeMap;
use std::collections::HashMap;
use uuid::Uuid;

/// Default attestation lifetime.
pub const ATTESTATION_TTL_SECS: i64 = 300;

/// Bucketed demographic attributes supplied by the enrollment subsystem
/// (e.g. "age" -> "35-44"). Never raw values.
pub type Demographics = BTreeMap<String, String>;

/// The verified-identity context handed to us after enrollment has done its
/// biometric / liveness checks. We trust it, we do not compute it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VerifiedContext {
    pub subject: String,
    pub demographics: Demographics,
}

/// Hash binding a vote request to its parameters:
/// H(ballot id ∥ option id ∥ timestamp bucket).
pub fn payload_hash(ballot_id: &Uuid, option_id: &str, timestamp_bucket: i64) -> Hash32 {
    sha256(&[
        ballot_id.as_bytes(),
        option_id.as_bytes(),
        &timestamp_bucket.to_be_bytes(),
    ])
}

/// A short-lived bearer credential binding {ballot, option, payload hash,
/// nonce} to a verified subject. Never persisted; presented once at vote
/// submission.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Attestation {
    pub subject: String,
    pub ballot_id: Uuid,
    pub option_id: String,
    pub payload_hash: Hash32,
    pub nonce: NonceToken,
    pub issued_at: i64,
    pub ttl: i64,
    pub key_id: String,
    pub demographics: Demographics,
}

impl Attestation {
    /// Canonical bytes for signing
    pub fn as_bytes(&self) -> Vec<u8> {
        serde_cbor::to_vec(&self).expect("voteguard: unexpected error packing attestation")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SignedAttestation {
    pub attestation: Attestation,

    #[serde(with = "EdSignatureHex")]
    pub sig: Signature,
}

impl std::ops::Deref for SignedAttestation {
    type Target = Attestation;

    fn deref(&self) -> &Self::Target {
        &self.attestation
    }
}

/// Why verification failed. Internal only: callers see a uniform
/// `Error::AttestationInvalid` so the response is not a state oracle, but the
/// engine needs the reason to decide what to put on the audit chain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum AttestationFailure {
    UnknownKey,
    BadSignature,
    Expired,
    BallotMismatch,
    PayloadMismatch,
}

impl AttestationFailure {
    /// Tamper evidence, as opposed to staleness.
    pub(crate) fn is_tamper(self) -> bool {
        match self {
            AttestationFailure::BadSignature | AttestationFailure::PayloadMismatch => true,
            _ => false,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            AttestationFailure::UnknownKey => "unknown_key",
            AttestationFailure::BadSignature => "bad_signature",
            AttestationFailure::Expired => "expired",
            AttestationFailure::BallotMismatch => "ballot_mismatch",
            AttestationFailure::PayloadMismatch => "payload_mismatch",
        }
    }
}

/// Issues signed attestations with the deployment's current signing key.
pub struct AttestationIssuer {
    key_id: String,
    secret: SecretKey,
    public: PublicKey,
    ttl_secs: i64,
}

impl AttestationIssuer {
    pub fn new(secret: SecretKey, ttl_secs: i64) -> Self {
        let public: PublicKey = (&secret).into();
        let key_id = hex::encode(&public.as_bytes()[0..4]);
        AttestationIssuer {
            key_id,
            secret,
            public,
            ttl_secs,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Issue an attestation for a vote request.
    ///
    /// Consumes the challenge nonce first: a request that cannot present a
    /// live unused nonce gets nothing else checked.
    pub fn issue(
        &self,
        nonces: &SingleUseTokenStore,
        ballot_id: Uuid,
        option_id: &str,
        timestamp_bucket: i64,
        nonce: NonceToken,
        context: &VerifiedContext,
    ) -> Result<SignedAttestation, Error> {
        if !nonces.consume(&nonce)? {
            return Err(Error::NonceInvalid);
        }

        let attestation = Attestation {
            subject: context.subject.clone(),
            ballot_id,
            option_id: option_id.to_string(),
            payload_hash: payload_hash(&ballot_id, option_id, timestamp_bucket),
            nonce,
            issued_at: util::now(),
            ttl: self.ttl_secs,
            key_id: self.key_id.clone(),
            demographics: context.demographics.clone(),
        };

        let sig = self.sign(&attestation.as_bytes());
        Ok(SignedAttestation { attestation, sig })
    }

    /// Sign arbitrary engine-issued bytes (attestations, receipts) with the
    /// current deployment key.
    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        let expanded: ExpandedSecretKey = (&self.secret).into();
        expanded.sign(message, &self.public)
    }
}

/// Verifies attestations against the deployment's signing keys, keyed by
/// key id so rotated-out keys keep verifying until their attestations age
/// out.
pub struct AttestationVerifier {
    keys: HashMap<String, PublicKey>,
}

impl AttestationVerifier {
    pub fn new() -> Self {
        AttestationVerifier {
            keys: HashMap::new(),
        }
    }

    pub fn add_key(&mut self, key_id: &str, public: PublicKey) {
        self.keys.insert(key_id.to_string(), public);
    }

    pub fn key(&self, key_id: &str) -> Option<&PublicKey> {
        self.keys.get(key_id)
    }

    /// Verify an attestation against the vote request presenting it.
    ///
    /// Any mismatch between the embedded payload hash and the hash recomputed
    /// from the supplied parameters is tamper evidence and is rejected, never
    /// repaired.
    pub fn verify(
        &self,
        signed: &SignedAttestation,
        ballot_id: &Uuid,
        option_id: &str,
        timestamp_bucket: i64,
    ) -> Result<VerifiedContext, Error> {
        self.verify_detailed(signed, ballot_id, option_id, timestamp_bucket, util::now())
            .map_err(|failure| {
                log::warn!(
                    "attestation rejected for ballot {}: {}",
                    ballot_id,
                    failure.name()
                );
                Error::AttestationInvalid
            })
    }

    pub(crate) fn verify_detailed(
        &self,
        signed: &SignedAttestation,
        ballot_id: &Uuid,
        option_id: &str,
        timestamp_bucket: i64,
        now: i64,
    ) -> Result<VerifiedContext, AttestationFailure> {
        let attestation = &signed.attestation;

        let public = self
            .keys
            .get(&attestation.key_id)
            .ok_or(AttestationFailure::UnknownKey)?;

        let serialized = attestation.as_bytes();
        public
            .verify_strict(&serialized, &signed.sig)
            .map_err(|_| AttestationFailure::BadSignature)?;

        if attestation.issued_at + attestation.ttl < now {
            return Err(AttestationFailure::Expired);
        }

        if attestation.ballot_id != *ballot_id {
            return Err(AttestationFailure::BallotMismatch);
        }

        let expected = payload_hash(ballot_id, option_id, timestamp_bucket);
        if attestation.payload_hash != expected {
            return Err(AttestationFailure::PayloadMismatch);
        }

        Ok(VerifiedContext {
            subject: attestation.subject.clone(),
            demographics: attestation.demographics.clone(),
        })
    }
}
