//! Fixed-width 32-byte values used throughout the audit: Merkle nodes and
//! on-chain addresses. Both render as base58 so artifacts line up with what DAS
//! endpoints return.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

pub const NODE_LEN: usize = 32;

/// Error returned when a base58 string does not decode to exactly 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    InvalidBase58(String),
    InvalidLength { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidBase58(reason) => write!(f, "invalid base58: {reason}"),
            DecodeError::InvalidLength { expected, actual } => {
                write!(f, "expected {expected} bytes, decoded {actual}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

fn decode_base58_32(value: &str) -> Result<[u8; NODE_LEN], DecodeError> {
    let bytes = bs58::decode(value.trim())
        .into_vec()
        .map_err(|err| DecodeError::InvalidBase58(err.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| DecodeError::InvalidLength {
        expected: NODE_LEN,
        actual,
    })
}

macro_rules! base58_bytes32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; NODE_LEN]);

        impl $name {
            pub const fn new(bytes: [u8; NODE_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; NODE_LEN] {
                &self.0
            }

            pub fn to_bytes(self) -> [u8; NODE_LEN] {
                self.0
            }
        }

        impl From<[u8; NODE_LEN]> for $name {
            fn from(bytes: [u8; NODE_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl FromStr for $name {
            type Err = DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_base58_32(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

base58_bytes32!(
    /// A Merkle tree node: a leaf hash, a sibling in a proof, or a root.
    Node
);

base58_bytes32!(
    /// A 32-byte account address (tree ids, asset ids, program ids).
    Address
);

/// Hashes two children into their parent: `keccak256(left || right)`.
pub fn hash_pair(left: &Node, right: &Node) -> Node {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Node(hasher.finalize().into())
}
