use crate::proof::hash::Node;
use serde::{Deserialize, Serialize};

/// Decoded inclusion proof as served by one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub root: Node,
    pub leaf: Node,
    pub leaf_index: u64,
    pub proof_nodes: Vec<Node>,
}

/// Result of asking one endpoint for a proof. Transport, protocol and decoding
/// failures are all flattened into `Err(message)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchOutcome {
    Ok(ProofBundle),
    Err(String),
}

impl FetchOutcome {
    pub fn err(message: impl Into<String>) -> Self {
        FetchOutcome::Err(message.into())
    }

    pub fn bundle(&self) -> Option<&ProofBundle> {
        match self {
            FetchOutcome::Ok(bundle) => Some(bundle),
            FetchOutcome::Err(_) => None,
        }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, FetchOutcome::Err(_))
    }
}

impl From<anyhow::Result<ProofBundle>> for FetchOutcome {
    fn from(result: anyhow::Result<ProofBundle>) -> Self {
        match result {
            Ok(bundle) => FetchOutcome::Ok(bundle),
            Err(err) => FetchOutcome::Err(format!("{err:#}")),
        }
    }
}

/// `Unknown` means the proof could not be checked at all, which is distinct
/// from a proof that was checked and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Valid,
    Invalid,
    Unknown,
}

impl VerificationOutcome {
    pub fn is_valid(self) -> bool {
        matches!(self, VerificationOutcome::Valid)
    }

    pub fn is_checked(self) -> bool {
        !matches!(self, VerificationOutcome::Unknown)
    }
}

/// Fetch plus verification result for a single endpoint on a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointResult {
    pub fetch_outcome: FetchOutcome,
    pub verification_outcome: VerificationOutcome,
}
