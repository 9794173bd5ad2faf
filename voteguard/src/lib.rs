#[macro_use]
extern crate serde;

mod anchor;
mod attestation;
mod audit;
mod error;
mod hash;
mod kanon;
mod ledger;
mod merkle;
mod nonce;
mod nullifier;
mod protocol;
mod serde_hex;
mod util;

pub use anchor::*;
pub use attestation::*;
pub use audit::*;
pub use error::*;
pub use hash::*;
pub use kanon::*;
pub use ledger::*;
pub use merkle::*;
pub use nonce::*;
pub use nullifier::*;
pub use protocol::*;
pub use serde_hex::*;
pub use util::*;

#[cfg(test)]
mod tests;
