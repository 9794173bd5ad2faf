use crate::*;
use hmac::{Hmac, Mac, NewMac};
use sha2::{Sha256, Sha512};
use uuid::Uuid;

/// Deterministic, secret-keyed derivation of a double-vote prevention token.
///
/// Always computed server-side from the verified subject handle; nothing a
/// client supplies ever feeds into it. The two implementations are
/// interchangeable and selected by deployment configuration.
pub trait NullifierFn: Send + Sync {
    fn derive(&self, ballot_id: &Uuid, subject: &str) -> Nullifier;
}

/// Which nullifier derivation a deployment runs.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum NullifierScheme {
    /// HMAC-SHA256 keyed PRF.
    Keyed,
    /// Hash-to-scalar over the Ristretto prime field. Output lives in the
    /// same field a Poseidon-based zero-knowledge circuit would use, so a
    /// proof-carrying variant can replace it without a ledger migration.
    Field,
}

impl NullifierScheme {
    pub fn build(self, secret: [u8; 32]) -> Box<dyn NullifierFn> {
        match self {
            NullifierScheme::Keyed => Box::new(KeyedNullifier::new(secret)),
            NullifierScheme::Field => Box::new(FieldNullifier::new(secret)),
        }
    }
}

pub struct KeyedNullifier {
    secret: [u8; 32],
}

impl KeyedNullifier {
    pub fn new(secret: [u8; 32]) -> Self {
        KeyedNullifier { secret }
    }
}

impl NullifierFn for KeyedNullifier {
    fn derive(&self, ballot_id: &Uuid, subject: &str) -> Nullifier {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .expect("voteguard: HMAC accepts any key length");
        mac.update(ballot_id.as_bytes());
        mac.update(subject.as_bytes());
        let digest: [u8; 32] = mac.finalize().into_bytes().into();
        Nullifier(digest)
    }
}

pub struct FieldNullifier {
    secret: [u8; 32],
}

impl FieldNullifier {
    pub fn new(secret: [u8; 32]) -> Self {
        FieldNullifier { secret }
    }
}

impl NullifierFn for FieldNullifier {
    fn derive(&self, ballot_id: &Uuid, subject: &str) -> Nullifier {
        use curve25519_dalek::scalar::Scalar;

        let mut input = Vec::with_capacity(32 + 16 + subject.len());
        input.extend_from_slice(&self.secret);
        input.extend_from_slice(ballot_id.as_bytes());
        input.extend_from_slice(subject.as_bytes());

        let scalar = Scalar::hash_from_bytes::<Sha512>(&input);
        Nullifier(scalar.to_bytes())
    }
}
