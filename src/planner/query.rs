//! Query planner: one LLM call that classifies the request and emits the
//! retrieval plan, followed by deterministic normalization so downstream
//! stages can rely on the plan's contract.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use super::{QueryKind, RequestType, SearchPlan, SearchQuery};
use crate::error::AppResult;
use crate::llm::{call_structured, LlmCall, LlmGateway, LlmOutcome};
use crate::prompts::QUERY_PLANNER_PROMPT;
use crate::store::is_valid_capability;

const MIN_QUERIES: usize = 3;
const MAX_QUERIES: usize = 6;

/// Inputs to planning, straight from the build request.
pub struct PlanningContext<'a> {
    pub prompt: &'a str,
    pub mc_version: &'a str,
    pub mod_loader: &'a str,
    pub current_mods: &'a [String],
    pub max_mods: u32,
    pub fabric_compat_mode: bool,
}

/// Raw model output before normalization.
#[derive(Debug, Deserialize)]
struct PlanDraft {
    request_type: RequestType,
    /// Accepted from the model but recomputed from the request type.
    #[serde(default)]
    #[allow(dead_code)]
    use_architecture_planner: bool,
    #[serde(default)]
    search_queries: Vec<SearchQuery>,
    #[serde(default)]
    capabilities_focus: Vec<String>,
    #[serde(default)]
    baseline_mods: Vec<String>,
    #[serde(default)]
    min_downloads: Option<u64>,
}

pub struct QueryPlanner {
    gateway: Arc<dyn LlmGateway>,
}

impl QueryPlanner {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Classify the request and produce a normalized search plan.
    pub async fn plan(&self, ctx: &PlanningContext<'_>) -> AppResult<LlmOutcome<SearchPlan>> {
        let current = if ctx.current_mods.is_empty() {
            "none".to_string()
        } else {
            ctx.current_mods
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        let user = format!(
            "USER REQUEST: \"{}\"\n\n\
             Minecraft version: {}\n\
             Mod loader: {}\n\
             Fabric compat mode: {}\n\
             Mods already on the board ({}): {}\n\
             Maximum mods to add: {}",
            ctx.prompt,
            ctx.mc_version,
            ctx.mod_loader,
            ctx.fabric_compat_mode,
            ctx.current_mods.len(),
            current,
            ctx.max_mods,
        );

        let call = LlmCall::new("query_planner", QUERY_PLANNER_PROMPT, user)
            .with_temperature(0.1)
            .with_max_tokens(2_000);

        let outcome: LlmOutcome<PlanDraft> = call_structured(self.gateway.as_ref(), call).await?;
        let plan = normalize_plan(outcome.value, ctx.prompt);

        info!(
            request_type = %plan.request_type,
            queries = plan.search_queries.len(),
            architecture = plan.use_architecture_planner,
            "search plan created"
        );

        Ok(LlmOutcome {
            value: plan,
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }
}

/// Enforce the plan contract: 3-6 queries mixing both kinds, architecture
/// flag tied to the request type, only well-formed capability tags.
fn normalize_plan(draft: PlanDraft, prompt: &str) -> SearchPlan {
    let mut queries: Vec<SearchQuery> = draft
        .search_queries
        .into_iter()
        .filter(|q| !q.text.trim().is_empty())
        .map(|mut q| {
            q.weight = q.weight.clamp(0.0, 1.0);
            q
        })
        .collect();

    let has_kind = |qs: &[SearchQuery], kind: QueryKind| qs.iter().any(|q| q.kind == kind);

    if !has_kind(&queries, QueryKind::Semantic) {
        queries.push(SearchQuery {
            kind: QueryKind::Semantic,
            text: prompt.to_string(),
            weight: 0.7,
        });
    }
    if !has_kind(&queries, QueryKind::Keyword) {
        queries.push(SearchQuery {
            kind: QueryKind::Keyword,
            text: prompt.to_string(),
            weight: 0.3,
        });
    }
    while queries.len() < MIN_QUERIES {
        queries.push(SearchQuery {
            kind: QueryKind::Semantic,
            text: prompt.to_string(),
            weight: 0.5,
        });
    }
    if queries.len() > MAX_QUERIES {
        debug!(dropped = queries.len() - MAX_QUERIES, "truncating search plan queries");
        queries.truncate(MAX_QUERIES);
        // Truncation may have dropped a whole kind; restore the mix.
        if !has_kind(&queries, QueryKind::Semantic) {
            queries[MAX_QUERIES - 1] = SearchQuery {
                kind: QueryKind::Semantic,
                text: prompt.to_string(),
                weight: 0.5,
            };
        }
        if !has_kind(&queries, QueryKind::Keyword) {
            queries[MAX_QUERIES - 1] = SearchQuery {
                kind: QueryKind::Keyword,
                text: prompt.to_string(),
                weight: 0.5,
            };
        }
    }

    SearchPlan {
        request_type: draft.request_type,
        use_architecture_planner: draft.request_type == RequestType::ThemedPack,
        search_queries: queries,
        capabilities_focus: draft
            .capabilities_focus
            .into_iter()
            .filter(|c| is_valid_capability(c))
            .collect(),
        baseline_mods: draft.baseline_mods,
        min_downloads: draft.min_downloads,
    }
}
