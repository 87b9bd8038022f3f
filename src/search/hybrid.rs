use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::fusion::{apply_baseline_boost, fuse, Candidate, RankedList};
use crate::embedding::Embedder;
use crate::error::AppResult;
use crate::planner::{QueryKind, SearchPlan};
use crate::store::{ModStore, SearchFilters};

/// Users repeatedly reporting a mod as broken push it out of retrieval.
const OUTDATED_REPORT_THRESHOLD: u32 = 3;

/// Tuning for hybrid retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Fetch depth for each semantic query.
    pub semantic_k: usize,
    /// Fetch depth for each keyword query.
    pub keyword_k: usize,
    /// Download floor applied after fusion unless the plan overrides it.
    pub default_min_downloads: u64,
    /// Hard cap on returned candidates.
    pub max_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_k: 40,
            keyword_k: 150,
            default_min_downloads: 5_000,
            max_candidates: 300,
        }
    }
}

/// Loader/version pair the retrieval targets.
#[derive(Debug, Clone)]
pub struct RetrievalTarget {
    pub loader: String,
    pub game_version: String,
}

/// Executes a search plan against the store and fuses the results.
pub struct HybridRetriever {
    store: Arc<dyn ModStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn ModStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Run every query in the plan (bounded by `limiter`), fuse with RRF,
    /// boost baselines, and post-filter.
    pub async fn execute(
        &self,
        plan: &SearchPlan,
        target: &RetrievalTarget,
        exclude: &[String],
        baseline_prevalence: &HashMap<String, f32>,
        limiter: &Semaphore,
    ) -> AppResult<Vec<Candidate>> {
        let compat_filters = SearchFilters {
            loader: Some(target.loader.clone()),
            game_version: Some(target.game_version.clone()),
            min_downloads: None,
            capabilities_any: plan.capabilities_focus.clone(),
        };

        let futures: Vec<_> = plan
            .search_queries
            .iter()
            .enumerate()
            .map(|(index, query)| {
                let filters = compat_filters.clone();
                async move {
                    let _permit = limiter.acquire().await.expect("limiter closed");
                    self.run_query(index, query.kind, &query.text, query.weight, filters)
                        .await
                }
            })
            .collect();

        let mut lists = Vec::new();
        for result in join_all(futures).await {
            lists.push(result?);
        }

        let total_hits: usize = lists.iter().map(|l| l.records.len()).sum();
        let mut candidates = fuse(lists);
        debug!(
            total_hits,
            unique = candidates.len(),
            "fused search results"
        );

        apply_baseline_boost(&mut candidates, baseline_prevalence);

        let min_downloads = plan
            .min_downloads
            .unwrap_or(self.config.default_min_downloads);
        candidates.retain(|c| {
            c.record.supports_loader(&target.loader)
                && c.record.supports_game_version(&target.game_version)
                && c.record.downloads >= min_downloads
                && c.record.outdated_reports < OUTDATED_REPORT_THRESHOLD
                && !exclude.contains(&c.record.source_id)
        });
        candidates.truncate(self.config.max_candidates);

        info!(
            candidates = candidates.len(),
            queries = plan.search_queries.len(),
            min_downloads,
            "hybrid retrieval complete"
        );
        Ok(candidates)
    }

    async fn run_query(
        &self,
        index: usize,
        kind: QueryKind,
        text: &str,
        weight: f32,
        filters: SearchFilters,
    ) -> AppResult<RankedList> {
        match kind {
            QueryKind::Semantic => match self.embedder.embed(text).await {
                Ok(embedding) => {
                    let records = self
                        .store
                        .vector_search(&embedding, &filters, self.config.semantic_k)
                        .await?;
                    Ok(RankedList {
                        query_index: index,
                        kind,
                        weight,
                        records,
                    })
                }
                Err(e) => {
                    // Degrade this query to lexical-only rather than failing
                    // the whole retrieval.
                    warn!(error = %e, query = text, "embedding failed, falling back to keyword search");
                    let keyword_filters = SearchFilters {
                        capabilities_any: Vec::new(),
                        ..filters
                    };
                    let records = self
                        .store
                        .keyword_search(text, &keyword_filters, self.config.keyword_k)
                        .await?;
                    Ok(RankedList {
                        query_index: index,
                        kind: QueryKind::Keyword,
                        weight,
                        records,
                    })
                }
            },
            QueryKind::Keyword => {
                let keyword_filters = SearchFilters {
                    capabilities_any: Vec::new(),
                    ..filters
                };
                let records = self
                    .store
                    .keyword_search(text, &keyword_filters, self.config.keyword_k)
                    .await?;
                Ok(RankedList {
                    query_index: index,
                    kind,
                    weight,
                    records,
                })
            }
        }
    }
}
