//! Stateless inclusion-proof verification.
//!
//! The running hash starts at the leaf and absorbs one proof node per level.
//! Bit `i` of the leaf index decides which side the running hash sits on at
//! level `i`: `0` means it is the left child, `1` means the proof node is.

use crate::proof::bundle::{FetchOutcome, ProofBundle, VerificationOutcome};
use crate::proof::hash::{hash_pair, Node};

/// Maps a fetch result to a verification verdict. Never panics, never does I/O.
pub fn verify(outcome: &FetchOutcome) -> VerificationOutcome {
    match outcome {
        FetchOutcome::Err(_) => VerificationOutcome::Unknown,
        FetchOutcome::Ok(bundle) => {
            if recompute_root(bundle) == Some(bundle.root) {
                VerificationOutcome::Valid
            } else {
                VerificationOutcome::Invalid
            }
        }
    }
}

/// Folds the leaf through the proof path. Returns `None` when the leaf index
/// cannot exist in a tree of the proof's depth.
pub fn recompute_root(bundle: &ProofBundle) -> Option<Node> {
    let depth = bundle.proof_nodes.len();
    if depth < 64 && bundle.leaf_index >> depth != 0 {
        return None;
    }

    let root = bundle
        .proof_nodes
        .iter()
        .enumerate()
        .fold(bundle.leaf, |current, (level, node)| {
            if (bundle.leaf_index >> level) & 1 == 0 {
                hash_pair(&current, node)
            } else {
                hash_pair(node, &current)
            }
        });

    Some(root)
}
