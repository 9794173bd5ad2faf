use crate::*;
use digest::Digest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Width of the timestamp bucket applied before hashing vote leaves and
/// attestation payloads. Coarse on purpose: a fine-grained timestamp inside a
/// leaf hash is a correlation channel.
pub const TIME_BUCKET_SECS: i64 = 3600;

/// Round a unix timestamp down to its bucket boundary.
pub fn time_bucket(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(TIME_BUCKET_SECS)
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = sha2::Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest: [u8; 32] = hasher.finalize().into();
    Hash32(digest)
}

/// Implements the hex string representation (Display, FromStr, serde) for a
/// 32-byte newtype.
macro_rules! impl_hex32 {
    ($name:ident) => {
        impl $name {
            pub fn to_bytes(&self) -> [u8; 32] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", hex::encode(&self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0))
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s).map_err(|_| Error::HashBadHex)?;
                if bytes.len() != 32 {
                    return Err(Error::HashBadLen);
                }
                let mut array = [0; 32];
                array.copy_from_slice(&bytes);
                Ok($name(array))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                FromStr::from_str(&s).map_err(de::Error::custom)
            }
        }
    };
}

/// A 32-byte digest (leaf hashes, roots, row hashes).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash32(pub [u8; 32]);

impl_hex32!(Hash32);

/// A single-use challenge token, 256 bits from the OS RNG.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct NonceToken(pub [u8; 32]);

impl_hex32!(NonceToken);

impl NonceToken {
    pub fn random() -> Self {
        use rand::RngCore;
        let mut csprng = rand::rngs::OsRng {};
        let mut bytes = [0; 32];
        csprng.fill_bytes(&mut bytes);
        NonceToken(bytes)
    }
}

/// An opaque double-vote prevention token. Deterministic per
/// (secret, ballot, identity handle) but carries no reversible link back to
/// the identity handle.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nullifier(pub [u8; 32]);

impl_hex32!(Nullifier);
