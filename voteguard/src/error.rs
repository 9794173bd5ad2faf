use thiserror::Error;

/// Error types
///
/// Every variant is terminal for the request that raised it; nothing here is
/// retried inside the engine.
#[derive(Debug, Error)]
pub enum Error {
    // Missing, already used, and expired are deliberately collapsed into one
    // variant so the response is not an oracle for token state.
    #[error("voteguard: nonce invalid")]
    NonceInvalid,

    #[error("voteguard: attestation invalid")]
    AttestationInvalid,

    #[error("voteguard: duplicate nullifier for ballot {0}")]
    DuplicateNullifier(uuid::Uuid),

    #[error("voteguard: overlapping breakdown query: {0}")]
    OverlappingQuery(String),

    #[error("voteguard: store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("voteguard: ballot {0} has no votes to anchor")]
    NothingToAnchor(uuid::Uuid),

    #[error("voteguard: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),

    #[error("voteguard: CBOR serialization error: {0}")]
    CBORSerialization(#[from] serde_cbor::Error),

    #[error("voteguard: JSON serialization error: {0}")]
    JSONSerialization(#[from] serde_json::Error),

    #[error("voteguard: invalid hash - invalid hexadecimal")]
    HashBadHex,

    #[error("voteguard: invalid hash - wrong length")]
    HashBadLen,
}
