//! Proof data model, base58 hash types, asset-id derivation and the pure
//! verifier.

pub mod asset_id;
pub mod bundle;
pub mod hash;
pub mod verifier;

pub use asset_id::{derive_asset_id, AssetId};
pub use bundle::{EndpointResult, FetchOutcome, ProofBundle, VerificationOutcome};
pub use hash::{hash_pair, Address, DecodeError, Node};
pub use verifier::verify;
