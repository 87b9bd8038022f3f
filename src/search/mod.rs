//! Hybrid retrieval subsystem: per-query vector/lexical search fused with
//! weighted Reciprocal Rank Fusion.

mod fusion;
mod hybrid;

pub use fusion::{apply_baseline_boost, fuse, Candidate, QueryHit, RankedList, RRF_K};
pub use hybrid::{HybridRetriever, RetrievalConfig, RetrievalTarget};
