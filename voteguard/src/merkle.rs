use crate::*;

// The accumulator is a set of pure functions with no hidden state. The root
// is re-derivable at any time from the ledger's ordered leaves, which stay
// the single source of truth.

/// Hash a sibling pair in sorted order, H(min(a,b) ∥ max(a,b)), so proofs
/// carry no left/right position bits.
fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    if a <= b {
        sha256(&[a.as_bytes(), b.as_bytes()])
    } else {
        sha256(&[b.as_bytes(), a.as_bytes()])
    }
}

/// If a level has odd length, duplicate its last node. Applied at every
/// level, not just the base.
fn pad_level(level: &mut Vec<Hash32>) {
    if level.len() % 2 == 1 {
        let last = level[level.len() - 1];
        level.push(last);
    }
}

/// Build the Merkle root over an ordered leaf sequence.
///
/// The root over a single leaf is the leaf hash itself. Returns None for an
/// empty sequence (a ballot with no votes has no root).
pub fn build_root(leaves: &[Hash32]) -> Option<Hash32> {
    if leaves.is_empty() {
        return None;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        pad_level(&mut level);
        level = level.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
    }
    Some(level[0])
}

/// An inclusion proof: the sibling path from a leaf up to the root. Sorted
/// pair hashing makes positions unnecessary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub siblings: Vec<Hash32>,
}

/// Generate the inclusion proof for the leaf at `index`.
pub fn gen_proof(leaves: &[Hash32], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut siblings = Vec::new();
    let mut level = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        pad_level(&mut level);
        let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
        siblings.push(level[sibling_idx]);
        level = level.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
        idx /= 2;
    }

    Some(MerkleProof { siblings })
}

/// Recompute the root from a leaf and its proof and compare to the claimed
/// root.
pub fn verify_inclusion(leaf: &Hash32, proof: &MerkleProof, root: &Hash32) -> bool {
    let mut acc = *leaf;
    for sibling in &proof.siblings {
        acc = hash_pair(&acc, sibling);
    }
    acc == *root
}
