//! Asset identifier derivation for compressed assets.
//!
//! Asset ids are Bubblegum program derived addresses over
//! `["asset", tree, leaf_index_le]`. Derivation is a pure computation and is
//! performed once per leaf using the canonical endpoint's convention.

use crate::proof::hash::Address;
use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};

/// `BGUMAp9Gq7iTEuizy4pqaxsTyUCBK68MDfK752saRPUY`
pub const BUBBLEGUM_PROGRAM_ID: Address = Address::new([
    152, 139, 128, 235, 121, 53, 40, 105, 178, 36, 116, 95, 89, 221, 191, 138, 38, 88, 202, 19,
    220, 104, 129, 33, 38, 53, 28, 174, 7, 193, 165, 165,
]);

const ASSET_SEED: &[u8] = b"asset";
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

pub type AssetId = Address;

/// Derives the asset id for the leaf at `leaf_index` in `tree`.
///
/// Returns `None` only if no bump seed yields an off-curve address, which does
/// not happen in practice.
pub fn derive_asset_id(tree: &Address, leaf_index: u64) -> Option<AssetId> {
    let nonce = leaf_index.to_le_bytes();
    find_program_address(
        &[ASSET_SEED, tree.as_bytes(), &nonce],
        &BUBBLEGUM_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Returns the first address (and its bump) for bumps `255..=0` that does not
/// lie on the ed25519 curve.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Address) -> Option<(Address, u8)> {
    (0..=u8::MAX).rev().find_map(|bump| {
        let candidate = create_program_address(seeds, bump, program_id);
        if is_on_curve(&candidate) {
            None
        } else {
            Some((candidate, bump))
        }
    })
}

fn create_program_address(seeds: &[&[u8]], bump: u8, program_id: &Address) -> Address {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    Address::new(hasher.finalize().into())
}

fn is_on_curve(address: &Address) -> bool {
    VerifyingKey::from_bytes(address.as_bytes()).is_ok()
}
