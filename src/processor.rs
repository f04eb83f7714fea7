//! Leaf processing: the dispatch loop, the bounded unit pool it feeds, and
//! mismatch persistence.

pub mod orchestrator;
pub mod recorder;
pub(crate) mod worker_pool;
