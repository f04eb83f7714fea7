//! Tree metadata: the immutable reference the audit runs against and the
//! on-chain account layout used to resolve it.

pub mod account;

use crate::proof::Address;

/// Identifier and leaf count of the audited tree, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeReference {
    pub tree_id: Address,
    pub num_leaves: u64,
}

impl TreeReference {
    pub fn new(tree_id: Address, num_leaves: u64) -> Self {
        Self {
            tree_id,
            num_leaves,
        }
    }
}

pub use account::{parse_tree_account, TreeAccountError, TreeAccountHeader};
