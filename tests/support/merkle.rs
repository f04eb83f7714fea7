use std::collections::HashMap;

use proofaudit::{derive_asset_id, hash_pair, Address, AssetId, Node, ProofBundle, TreeReference};
use sha3::{Digest, Keccak256};

/// Fully materialised Keccak tree with deterministic leaves, padded to a power
/// of two with zero nodes.
pub struct MockTree {
    tree_id: Address,
    num_leaves: u64,
    depth: usize,
    levels: Vec<Vec<Node>>,
    assets: HashMap<AssetId, u64>,
}

impl MockTree {
    pub fn new(tree_id: Address, num_leaves: u64) -> Self {
        let mut depth = 1;
        while (1u64 << depth) < num_leaves {
            depth += 1;
        }

        let width = 1usize << depth;
        let mut leaves: Vec<Node> = (0..num_leaves).map(leaf_hash).collect();
        leaves.resize(width, Node::new([0u8; 32]));

        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let current = levels.last().expect("at least one level");
            let next = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }

        let assets = (0..num_leaves)
            .map(|index| {
                let asset = derive_asset_id(&tree_id, index).expect("asset id derivation");
                (asset, index)
            })
            .collect();

        Self {
            tree_id,
            num_leaves,
            depth,
            levels,
            assets,
        }
    }

    pub fn tree_id(&self) -> Address {
        self.tree_id
    }

    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn reference(&self) -> TreeReference {
        TreeReference::new(self.tree_id, self.num_leaves)
    }

    pub fn root(&self) -> Node {
        self.levels[self.depth][0]
    }

    pub fn leaf_index_of(&self, asset_id: &AssetId) -> Option<u64> {
        self.assets.get(asset_id).copied()
    }

    pub fn asset_id(&self, leaf_index: u64) -> AssetId {
        derive_asset_id(&self.tree_id, leaf_index).expect("asset id derivation")
    }

    pub fn proof(&self, leaf_index: u64) -> ProofBundle {
        let mut position = leaf_index as usize;
        let mut proof_nodes = Vec::with_capacity(self.depth);
        for level in &self.levels[..self.depth] {
            proof_nodes.push(level[position ^ 1]);
            position >>= 1;
        }
        ProofBundle {
            root: self.root(),
            leaf: self.levels[0][leaf_index as usize],
            leaf_index,
            proof_nodes,
        }
    }
}

fn leaf_hash(index: u64) -> Node {
    let digest = Keccak256::digest(index.to_le_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Node::new(bytes)
}

/// Flips the lowest bit of the first proof node.
pub fn flip_first_proof_bit(bundle: &mut ProofBundle) {
    if let Some(node) = bundle.proof_nodes.first_mut() {
        let mut bytes = node.to_bytes();
        bytes[0] ^= 0x01;
        *node = Node::new(bytes);
    }
}
