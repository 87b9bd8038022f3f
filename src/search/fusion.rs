//! Reciprocal Rank Fusion over per-query candidate lists.
//!
//! RRF combines ranked result sets without comparing raw scores, which is
//! what makes mixing BM25 and cosine-similarity rankings safe:
//!
//! ```text
//! score(mod) = sum over queries: weight_q / (k + rank_q(mod))
//! ```
//!
//! Mods surfacing in several queries accumulate score, so cross-query
//! agreement ranks above any single strong hit.

use std::collections::HashMap;

use crate::planner::QueryKind;
use crate::store::ModRecord;

/// RRF dampening constant. 60 is the standard choice.
pub const RRF_K: f32 = 60.0;

/// One ranked result list produced by a single search query.
pub struct RankedList {
    pub query_index: usize,
    pub kind: QueryKind,
    pub weight: f32,
    pub records: Vec<ModRecord>,
}

/// A fused candidate with its explainability trace.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: ModRecord,
    pub score: f32,
    pub trace: Vec<QueryHit>,
}

/// Where a candidate ranked within one contributing query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryHit {
    pub query_index: usize,
    pub kind: QueryKind,
    pub rank: usize,
    pub contribution: f32,
}

/// Fuse ranked lists with weighted RRF, deduplicating by `source_id`.
///
/// Ordering is fully deterministic: score descending, then `source_id`
/// ascending, so fusing identical inputs always yields identical output.
pub fn fuse(lists: Vec<RankedList>) -> Vec<Candidate> {
    let mut merged: HashMap<String, Candidate> = HashMap::new();

    for list in lists {
        for (rank, record) in list.records.into_iter().enumerate() {
            let contribution = list.weight / (RRF_K + rank as f32 + 1.0);
            let hit = QueryHit {
                query_index: list.query_index,
                kind: list.kind,
                rank,
                contribution,
            };
            merged
                .entry(record.source_id.clone())
                .and_modify(|c| {
                    c.score += contribution;
                    c.trace.push(hit.clone());
                })
                .or_insert_with(|| Candidate {
                    record,
                    score: contribution,
                    trace: vec![hit],
                });
        }
    }

    let mut candidates: Vec<Candidate> = merged.into_values().collect();
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.source_id.cmp(&b.record.source_id))
    });
    candidates
}

/// Additive boost for baseline mods, scaled by their prevalence among
/// reference packs. Sized like a top-rank RRF contribution so a ubiquitous
/// baseline competes with a #1 hit.
pub fn apply_baseline_boost(candidates: &mut [Candidate], prevalence: &HashMap<String, f32>) {
    if prevalence.is_empty() {
        return;
    }
    let top_contribution = 1.0 / (RRF_K + 1.0);
    for candidate in candidates.iter_mut() {
        if let Some(p) = prevalence.get(&candidate.record.source_id) {
            candidate.score += p * top_contribution;
        }
    }
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.source_id.cmp(&b.record.source_id))
    });
}
