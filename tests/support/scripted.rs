use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use proofaudit::{AssetId, FetchOutcome, ProofFetcher};

use super::merkle::{flip_first_proof_bit, MockTree};

#[derive(Clone, Debug)]
pub enum Fault {
    FlipFirstProofBit,
    Error(String),
    Panic,
    Delay(Duration),
}

/// In-process endpoint serving proofs from a [`MockTree`], with per-leaf faults.
pub struct ScriptedFetcher {
    tree: Arc<MockTree>,
    faults: HashMap<u64, Fault>,
    calls: AtomicUsize,
    fetched: Mutex<Vec<u64>>,
}

impl ScriptedFetcher {
    pub fn new(tree: Arc<MockTree>) -> Self {
        Self {
            tree,
            faults: HashMap::new(),
            calls: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fault(mut self, leaf_index: u64, fault: Fault) -> Self {
        self.faults.insert(leaf_index, fault);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Leaf indices in the order their fetches started.
    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().expect("fetch log poisoned").clone()
    }
}

impl ProofFetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, asset_id: &'a AssetId) -> BoxFuture<'a, FetchOutcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Some(leaf_index) = self.tree.leaf_index_of(asset_id) else {
                return FetchOutcome::err(format!("asset {asset_id} not found"));
            };
            self.fetched
                .lock()
                .expect("fetch log poisoned")
                .push(leaf_index);

            let mut bundle = self.tree.proof(leaf_index);
            match self.faults.get(&leaf_index) {
                None => {}
                Some(Fault::FlipFirstProofBit) => flip_first_proof_bit(&mut bundle),
                Some(Fault::Error(message)) => return FetchOutcome::err(message.clone()),
                Some(Fault::Panic) => panic!("scripted fetcher panic at leaf {leaf_index}"),
                Some(Fault::Delay(delay)) => tokio::time::sleep(*delay).await,
            }
            FetchOutcome::Ok(bundle)
        })
    }
}
