//! Parser for SPL concurrent Merkle tree accounts.
//!
//! Layout: `[account_type: u8][header_version: u8]` followed by the V1 header
//! (`max_buffer_size: u32`, `max_depth: u32`, `authority: [u8; 32]`,
//! `creation_slot: u64`, 6 padding bytes), then the tree body:
//! `sequence_number`, `active_index`, `buffer_size` (all `u64`),
//! `max_buffer_size` change logs and finally the rightmost path whose `index`
//! is the number of leaves appended so far. All integers are little-endian.

use crate::proof::Address;
use std::fmt;

const ACCOUNT_TYPE_CONCURRENT_MERKLE_TREE: u8 = 1;
const HEADER_VERSION_V1: u8 = 0;
const HEADER_LEN: usize = 2 + 4 + 4 + 32 + 8 + 6;
const TREE_COUNTERS_LEN: usize = 3 * 8;
const NODE_LEN: usize = 32;
const MAX_SUPPORTED_DEPTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeAccountError {
    Truncated { needed: usize, actual: usize },
    UnexpectedAccountType(u8),
    UnsupportedHeaderVersion(u8),
    UnsupportedDepth(u32),
}

impl fmt::Display for TreeAccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeAccountError::Truncated { needed, actual } => write!(
                f,
                "tree account data truncated (needed {needed} bytes, got {actual})"
            ),
            TreeAccountError::UnexpectedAccountType(kind) => {
                write!(f, "account type {kind} is not a concurrent merkle tree")
            }
            TreeAccountError::UnsupportedHeaderVersion(version) => {
                write!(f, "unsupported tree header version {version}")
            }
            TreeAccountError::UnsupportedDepth(depth) => {
                write!(f, "unsupported tree depth {depth}")
            }
        }
    }
}

impl std::error::Error for TreeAccountError {}

/// Fields of the tree account the audit cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeAccountHeader {
    pub max_depth: u32,
    pub max_buffer_size: u32,
    pub authority: Address,
    pub creation_slot: u64,
    pub sequence_number: u64,
    pub num_leaves: u64,
}

pub fn parse_tree_account(data: &[u8]) -> Result<TreeAccountHeader, TreeAccountError> {
    let mut reader = Reader::new(data);

    let account_type = reader.u8()?;
    if account_type != ACCOUNT_TYPE_CONCURRENT_MERKLE_TREE {
        return Err(TreeAccountError::UnexpectedAccountType(account_type));
    }
    let version = reader.u8()?;
    if version != HEADER_VERSION_V1 {
        return Err(TreeAccountError::UnsupportedHeaderVersion(version));
    }

    let max_buffer_size = reader.u32()?;
    let max_depth = reader.u32()?;
    if max_depth == 0 || max_depth > MAX_SUPPORTED_DEPTH {
        return Err(TreeAccountError::UnsupportedDepth(max_depth));
    }
    let authority = Address::new(reader.bytes32()?);
    let creation_slot = reader.u64()?;
    reader.seek(HEADER_LEN)?;

    let sequence_number = reader.u64()?;
    let depth = max_depth as usize;
    let change_log_len = NODE_LEN + NODE_LEN * depth + 8;
    let rightmost_index_offset = HEADER_LEN
        + TREE_COUNTERS_LEN
        + change_log_len * max_buffer_size as usize
        + NODE_LEN * depth
        + NODE_LEN;
    reader.seek(rightmost_index_offset)?;
    let num_leaves = u64::from(reader.u32()?);

    Ok(TreeAccountHeader {
        max_depth,
        max_buffer_size,
        authority,
        creation_slot,
        sequence_number,
        num_leaves,
    })
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn seek(&mut self, offset: usize) -> Result<(), TreeAccountError> {
        if offset > self.data.len() {
            return Err(TreeAccountError::Truncated {
                needed: offset,
                actual: self.data.len(),
            });
        }
        self.offset = offset;
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], TreeAccountError> {
        let end = self.offset.saturating_add(N);
        let slice = self
            .data
            .get(self.offset..end)
            .ok_or(TreeAccountError::Truncated {
                needed: end,
                actual: self.data.len(),
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TreeAccountError> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, TreeAccountError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64, TreeAccountError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn bytes32(&mut self) -> Result<[u8; 32], TreeAccountError> {
        self.take()
    }
}
