//! Wire shapes returned by DAS endpoints and their conversion into the
//! crate's proof and tree types.

use crate::proof::{Node, ProofBundle};
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::Deserialize;

/// `getAssetProof` result.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetProofResponse {
    pub root: String,
    pub proof: Vec<String>,
    pub node_index: u64,
    pub leaf: String,
    #[serde(default)]
    pub tree_id: Option<String>,
}

impl AssetProofResponse {
    /// Decodes base58 nodes and recovers the leaf index from the node index.
    ///
    /// Node indices count from the root (1) down, so a leaf at depth `d` has
    /// `node_index = 2^d + leaf_index`.
    pub fn into_bundle(self) -> Result<ProofBundle> {
        let depth = self.proof.len();
        if depth >= 64 {
            bail!("proof depth {depth} exceeds 63 levels");
        }
        let first_leaf_node = 1u64 << depth;
        let leaf_index = self
            .node_index
            .checked_sub(first_leaf_node)
            .filter(|index| *index < first_leaf_node)
            .ok_or_else(|| {
                anyhow!(
                    "node_index {} is not a leaf of a depth {depth} tree",
                    self.node_index
                )
            })?;

        let root = decode_node(&self.root, "root")?;
        let leaf = decode_node(&self.leaf, "leaf")?;
        let proof_nodes = self
            .proof
            .iter()
            .enumerate()
            .map(|(level, node)| {
                node.parse::<Node>()
                    .with_context(|| format!("invalid proof node at level {level}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ProofBundle {
            root,
            leaf,
            leaf_index,
            proof_nodes,
        })
    }
}

fn decode_node(value: &str, field: &str) -> Result<Node> {
    value
        .parse::<Node>()
        .with_context(|| format!("invalid {field} hash"))
}

/// `getAccountInfo` result with `encoding = base64`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfoResponse {
    pub value: Option<AccountInfoValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfoValue {
    pub data: (String, String),
    #[serde(default)]
    pub owner: Option<String>,
}

impl AccountInfoResponse {
    pub fn decode_data(self) -> Result<Vec<u8>> {
        let value = self.value.context("account does not exist")?;
        let (payload, encoding) = value.data;
        if encoding != "base64" {
            bail!("unexpected account data encoding {encoding}");
        }
        BASE64_STANDARD
            .decode(payload.trim())
            .context("invalid base64 account data")
    }
}
