//! Top-level orchestration: the application context (explicitly
//! constructed capabilities, no ambient globals) and the conditional
//! assembly pipeline.
//!
//! Stages run sequentially within a request; fan-out inside a stage is
//! bounded by the per-request semaphore. Stages communicate by returning
//! values, never through shared mutable state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::board::{self, BoardState, CategoryInput, ModInput};
use crate::categorizer::{Categorizer, StandardCategory};
use crate::config::Config;
use crate::crash::{CrashAnalyzer, CrashPipeline, DedupCache, FixPlanner};
use crate::embedding::Embedder;
use crate::error::{AppError, AppResult};
use crate::llm::LlmGateway;
use crate::planner::query::PlanningContext;
use crate::planner::{ArchitecturePlanner, QueryPlanner, RefinedArchitecture, SearchPlan};
use crate::policy::LoaderBridgePolicy;
use crate::progress::ProgressSender;
use crate::quota::QuotaGate;
use crate::registry::ModRegistry;
use crate::resolver::DependencyResolver;
use crate::search::{HybridRetriever, RetrievalTarget};
use crate::selector::{FinalSelector, SelectedMod};
use crate::store::{BuildRecord, ModRecord, ModStore};
use crate::trace::PipelineTrace;

const KNOWN_LOADERS: [&str; 4] = ["fabric", "forge", "neoforge", "quilt"];

/// Everything a request handler needs, built once at startup.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn ModStore>,
    pub gateway: Arc<dyn LlmGateway>,
    pub embedder: Arc<dyn Embedder>,
    pub registry: Arc<dyn ModRegistry>,
    pub dedup_cache: Arc<DedupCache>,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn ModStore>,
        gateway: Arc<dyn LlmGateway>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<dyn ModRegistry>,
    ) -> Self {
        let dedup_cache = Arc::new(DedupCache::new(Duration::from_secs(
            config.budgets.dedup_ttl_s,
        )));
        Self {
            config,
            store,
            gateway,
            embedder,
            registry,
            dedup_cache,
        }
    }

    pub fn quota_gate(&self) -> QuotaGate {
        QuotaGate::new(Arc::clone(&self.store))
    }

    /// Per-request fan-out limiter.
    pub fn request_limiter(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.config.request.per_request_parallelism))
    }

    pub fn assembly_pipeline(&self) -> AssemblyPipeline {
        AssemblyPipeline {
            store: Arc::clone(&self.store),
            query_planner: QueryPlanner::new(Arc::clone(&self.gateway)),
            architecture: ArchitecturePlanner::new(
                Arc::clone(&self.gateway),
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
            ),
            retriever: HybridRetriever::new(Arc::clone(&self.store), Arc::clone(&self.embedder)),
            selector: FinalSelector::new(Arc::clone(&self.gateway)),
            resolver: DependencyResolver::new(Arc::clone(&self.store)),
            policy: LoaderBridgePolicy::new(Arc::clone(&self.store)),
            categorizer: Categorizer::new(Arc::clone(&self.gateway)),
            limiter: self.request_limiter(),
            use_architecture_default: self.config.budgets.use_architecture_default,
        }
    }

    pub fn crash_pipeline(&self) -> CrashPipeline {
        CrashPipeline::new(
            Arc::clone(&self.store),
            CrashAnalyzer::new(Arc::clone(&self.gateway)),
            FixPlanner::new(Arc::clone(&self.registry)),
            Arc::clone(&self.dedup_cache),
            self.request_limiter(),
        )
    }
}

/// Assembly request body.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildRequest {
    pub prompt: String,
    pub mc_version: String,
    pub mod_loader: String,
    pub max_mods: u32,
    #[serde(default)]
    pub current_mods: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub fabric_compat_mode: bool,
    #[serde(default)]
    pub use_v3_architecture: Option<bool>,
}

impl BuildRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::InvalidRequest {
                message: "prompt is required".to_string(),
            });
        }
        if self.max_mods == 0 {
            return Err(AppError::InvalidRequest {
                message: "max_mods must be positive".to_string(),
            });
        }
        let loader = self.mod_loader.to_lowercase();
        if !KNOWN_LOADERS.contains(&loader.as_str()) {
            return Err(AppError::InvalidRequest {
                message: format!("unknown mod loader: {}", self.mod_loader),
            });
        }
        if self.mc_version.trim().is_empty() {
            return Err(AppError::InvalidRequest {
                message: "mc_version is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Aggregate counters attached to the terminal payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildStats {
    pub request_type: String,
    pub candidates: usize,
    pub selected: usize,
    pub dependencies_added: usize,
    pub bridges_added: usize,
    pub conflicts: usize,
    pub unresolved: usize,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Terminal assembly payload.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub build_id: String,
    pub board_state: BoardState,
    pub summary: String,
    pub explanation: String,
    pub warnings: Vec<String>,
    pub stats: BuildStats,
}

/// The conditional assembly pipeline.
pub struct AssemblyPipeline {
    store: Arc<dyn ModStore>,
    query_planner: QueryPlanner,
    architecture: ArchitecturePlanner,
    retriever: HybridRetriever,
    selector: FinalSelector,
    resolver: DependencyResolver,
    policy: LoaderBridgePolicy,
    categorizer: Categorizer,
    limiter: Arc<Semaphore>,
    use_architecture_default: bool,
}

impl AssemblyPipeline {
    /// Run the pipeline. Stage progress goes to `progress`; the caller owns
    /// the terminal event and the quota commit.
    pub async fn run(
        &self,
        user_id: &str,
        request: &BuildRequest,
        progress: &mut ProgressSender,
        trace: &mut PipelineTrace,
    ) -> AppResult<BuildOutcome> {
        request.validate()?;
        let loader = request.mod_loader.to_lowercase();
        let target = RetrievalTarget {
            loader: loader.clone(),
            game_version: request.mc_version.clone(),
        };

        // Stage 1: classify the request and plan retrieval.
        trace.stage_start("planning");
        progress.stage("planning", 8, None).await?;
        let plan_outcome = self
            .query_planner
            .plan(&PlanningContext {
                prompt: &request.prompt,
                mc_version: &request.mc_version,
                mod_loader: &loader,
                current_mods: &request.current_mods,
                max_mods: request.max_mods,
                fabric_compat_mode: request.fabric_compat_mode,
            })
            .await
            .inspect_err(|_| trace.stage_end(false))?;
        trace.record_llm("query_planner", plan_outcome.usage, plan_outcome.cost_usd);
        let plan = plan_outcome.value;
        trace.stage_end(true);

        // Stage 2 (themed only): reference mining and category planning.
        let use_architecture = plan.use_architecture_planner
            && request
                .use_v3_architecture
                .unwrap_or(self.use_architecture_default);
        let (architecture, baseline_prevalence) = if use_architecture {
            trace.stage_start("architecture");
            progress
                .stage("architecture", 20, Some("mining reference packs".to_string()))
                .await?;
            let references = self
                .architecture
                .find_references(&request.prompt, &loader)
                .await
                .inspect_err(|_| trace.stage_end(false))?;
            let baselines = ArchitecturePlanner::extract_baselines(&references);
            let prevalence: HashMap<String, f32> = baselines
                .iter()
                .map(|b| (b.source_id.clone(), b.prevalence))
                .collect();

            let planned = self
                .architecture
                .plan(&request.prompt, request.max_mods, &references)
                .await
                .inspect_err(|_| trace.stage_end(false))?;
            trace.record_llm("architecture_plan", planned.usage, planned.cost_usd);
            trace.stage_end(true);
            (Some(planned.value), prevalence)
        } else {
            let prevalence = plan
                .baseline_mods
                .iter()
                .map(|id| (id.clone(), 1.0))
                .collect();
            (None, prevalence)
        };

        // Stage 3: hybrid retrieval.
        trace.stage_start("retrieval");
        progress.stage("retrieval", 40, None).await?;
        let candidates = self
            .retriever
            .execute(
                &plan,
                &target,
                &request.current_mods,
                &baseline_prevalence,
                &self.limiter,
            )
            .await
            .inspect_err(|_| trace.stage_end(false))?;
        trace.stage_end(true);

        if candidates.is_empty() {
            // Not fatal: an empty plan with a warning is a valid outcome.
            warn!(prompt = %request.prompt, "retrieval produced no candidates");
            return Ok(self.empty_outcome(request, &plan, trace));
        }

        // Stage 4: final selection.
        trace.stage_start("selection");
        progress
            .stage("selection", 55, Some(format!("{} candidates", candidates.len())))
            .await?;
        let pool = FinalSelector::prefilter(&candidates, architecture.as_ref(), request.max_mods);
        let selection_outcome = self
            .selector
            .select(&request.prompt, &pool, architecture.as_ref(), request.max_mods)
            .await
            .inspect_err(|_| trace.stage_end(false))?;
        trace.record_llm(
            "final_selector",
            selection_outcome.usage,
            selection_outcome.cost_usd,
        );
        let selections = selection_outcome.value;
        let selected_records: Vec<ModRecord> = selections
            .iter()
            .filter_map(|s| {
                pool.iter()
                    .find(|c| c.record.source_id == s.source_id)
                    .map(|c| c.record.clone())
            })
            .collect();
        trace.stage_end(true);

        // Stage 5: dependency closure.
        trace.stage_start("dependencies");
        progress.stage("dependencies", 70, None).await?;
        let resolution = self
            .resolver
            .resolve(&selected_records, &loader, &request.mc_version)
            .await
            .inspect_err(|_| trace.stage_end(false))?;
        let dependency_ids: HashSet<String> = resolution.added_ids().into_iter().collect();
        let mut members = selected_records.clone();
        members.extend(resolution.added_dependencies.clone());
        trace.stage_end(true);

        // Stage 6: loader-bridge policy; bridges re-enter the resolver.
        trace.stage_start("compatibility");
        progress.stage("compatibility", 78, None).await?;
        let policy_outcome = self
            .policy
            .apply(
                &mut members,
                &loader,
                &request.mc_version,
                request.fabric_compat_mode,
            )
            .await
            .inspect_err(|_| trace.stage_end(false))?;
        let mut dependency_ids = dependency_ids;
        let mut bridge_count = 0usize;
        if !policy_outcome.bridges.is_empty() {
            let bridge_resolution = self
                .resolver
                .resolve(&policy_outcome.bridges, &loader, &request.mc_version)
                .await
                .inspect_err(|_| trace.stage_end(false))?;
            bridge_count = policy_outcome.bridges.len();
            for bridge in policy_outcome.bridges {
                dependency_ids.insert(bridge.source_id.clone());
                members.push(bridge);
            }
            for dep in bridge_resolution.added_dependencies {
                if !members.iter().any(|m| m.source_id == dep.source_id) {
                    dependency_ids.insert(dep.source_id.clone());
                    members.push(dep);
                }
            }
        }
        trace.stage_end(true);

        let mut warnings: Vec<String> = Vec::new();
        for removal in &policy_outcome.removed {
            warnings.push(format!("removed {}: {}", removal.slug, removal.reason));
        }
        for unresolved in &resolution.unresolved {
            warnings.push(format!(
                "unresolved dependency {}: {}",
                unresolved.source_id, unresolved.missing_reason
            ));
        }
        for conflict in &resolution.conflicts {
            warnings.push(format!("conflict: {}", conflict.reason));
        }

        // Stage 7: organize into categories.
        trace.stage_start("organize");
        progress.stage("organize", 85, None).await?;
        let categories = if let Some(architecture) = &architecture {
            let refined = self
                .architecture
                .refine(architecture, &members, &dependency_ids)
                .await
                .inspect_err(|_| trace.stage_end(false))?;
            trace.record_llm("architecture_refine", refined.usage, refined.cost_usd);
            refined_to_inputs(&refined.value, &members)
        } else {
            let selection_only: Vec<ModRecord> = members
                .iter()
                .filter(|m| !dependency_ids.contains(&m.source_id))
                .cloned()
                .collect();
            let categorized = self
                .categorizer
                .categorize(&selection_only)
                .await
                .inspect_err(|_| trace.stage_end(false))?;
            trace.record_llm("categorizer", categorized.usage, categorized.cost_usd);
            standard_to_inputs(&categorized.value, &members, &dependency_ids)
        };
        trace.stage_end(true);

        // Stage 8: board assembly.
        trace.stage_start("board");
        progress.stage("board", 95, None).await?;
        let board = board::assemble(categories, request.project_id.clone(), Utc::now());
        trace.stage_end(true);

        let build_id = Uuid::new_v4().to_string();
        let record = BuildRecord {
            id: build_id.clone(),
            user_id: user_id.to_string(),
            prompt: request.prompt.clone(),
            request_type: plan.request_type.to_string(),
            mc_version: request.mc_version.clone(),
            mod_loader: loader.clone(),
            mod_count: board.mods.len(),
            dependency_count: dependency_ids.len(),
            tokens_used: trace.total_tokens(),
            cost_usd: trace.total_cost_usd(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_build(&record).await {
            warn!(error = %e, "failed to record build");
        }

        let stats = BuildStats {
            request_type: plan.request_type.to_string(),
            candidates: candidates.len(),
            selected: selections.len(),
            dependencies_added: dependency_ids.len().saturating_sub(bridge_count),
            bridges_added: bridge_count,
            conflicts: resolution.conflicts.len(),
            unresolved: resolution.unresolved.len(),
            tokens_used: trace.total_tokens(),
            cost_usd: trace.total_cost_usd(),
        };

        info!(
            build_id = %build_id,
            mods = board.mods.len(),
            categories = board.categories.len(),
            request_type = %plan.request_type,
            "assembly complete"
        );

        Ok(BuildOutcome {
            success: true,
            build_id,
            summary: summarize(&board, request, &stats),
            explanation: explain(&selections),
            board_state: board,
            warnings,
            stats,
        })
    }

    fn empty_outcome(
        &self,
        request: &BuildRequest,
        plan: &SearchPlan,
        trace: &PipelineTrace,
    ) -> BuildOutcome {
        let board = board::assemble(Vec::new(), request.project_id.clone(), Utc::now());
        BuildOutcome {
            success: true,
            build_id: Uuid::new_v4().to_string(),
            summary: "No matching mods were found for this request.".to_string(),
            explanation: String::new(),
            board_state: board,
            warnings: vec!["no_candidates".to_string()],
            stats: BuildStats {
                request_type: plan.request_type.to_string(),
                tokens_used: trace.total_tokens(),
                cost_usd: trace.total_cost_usd(),
                ..Default::default()
            },
        }
    }
}

/// Turn a refined architecture into board assembly input.
fn refined_to_inputs(refined: &RefinedArchitecture, members: &[ModRecord]) -> Vec<CategoryInput> {
    let by_id: HashMap<&str, &ModRecord> =
        members.iter().map(|m| (m.source_id.as_str(), m)).collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut inputs: Vec<CategoryInput> = refined
        .categories
        .iter()
        .map(|category| CategoryInput {
            title: category.name.clone(),
            mods: category
                .mods
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .map(|record| {
                    placed.insert(record.source_id.as_str());
                    mod_input(record)
                })
                .collect(),
        })
        .filter(|c| !c.mods.is_empty())
        .collect();

    // Anything the refinement missed still belongs on the board.
    let leftovers: Vec<ModInput> = members
        .iter()
        .filter(|m| !placed.contains(m.source_id.as_str()))
        .map(mod_input)
        .collect();
    if !leftovers.is_empty() {
        inputs.push(CategoryInput {
            title: "Other".to_string(),
            mods: leftovers,
        });
    }
    inputs
}

/// Turn simple-flow categorization into board assembly input, with
/// dependencies folded into Libraries.
fn standard_to_inputs(
    assignments: &[(String, StandardCategory)],
    members: &[ModRecord],
    dependency_ids: &HashSet<String>,
) -> Vec<CategoryInput> {
    let by_id: HashMap<&str, &ModRecord> =
        members.iter().map(|m| (m.source_id.as_str(), m)).collect();

    let order = [
        StandardCategory::Performance,
        StandardCategory::Graphics,
        StandardCategory::Utility,
        StandardCategory::World,
        StandardCategory::Gameplay,
        StandardCategory::Content,
        StandardCategory::Libraries,
        StandardCategory::Other,
    ];

    let mut groups: HashMap<StandardCategory, Vec<ModInput>> = HashMap::new();
    for (source_id, category) in assignments {
        if let Some(record) = by_id.get(source_id.as_str()).copied() {
            groups.entry(*category).or_default().push(mod_input(record));
        }
    }
    let mut dependency_ids: Vec<&String> = dependency_ids.iter().collect();
    dependency_ids.sort();
    for id in dependency_ids {
        if let Some(record) = by_id.get(id.as_str()).copied() {
            groups
                .entry(StandardCategory::Libraries)
                .or_default()
                .push(mod_input(record));
        }
    }

    order
        .into_iter()
        .filter_map(|category| {
            groups.remove(&category).map(|mods| CategoryInput {
                title: category.label().to_string(),
                mods,
            })
        })
        .collect()
}

fn mod_input(record: &ModRecord) -> ModInput {
    ModInput {
        source_id: record.source_id.clone(),
        slug: record.slug.clone(),
        title: record.name.clone(),
        icon_url: record.icon_url.clone(),
        description: record.summary.clone(),
        required_dependencies: record
            .required_dependency_ids()
            .map(String::from)
            .collect(),
    }
}

fn summarize(board: &BoardState, request: &BuildRequest, stats: &BuildStats) -> String {
    format!(
        "{} mods across {} categories for {} {} ({} picked, {} dependencies).",
        board.mods.len(),
        board.categories.len(),
        request.mod_loader,
        request.mc_version,
        stats.selected,
        stats.dependencies_added,
    )
}

fn explain(selections: &[SelectedMod]) -> String {
    selections
        .iter()
        .filter(|s| !s.reason.is_empty())
        .take(8)
        .map(|s| format!("{}: {}", s.source_id, s.reason))
        .collect::<Vec<_>>()
        .join("\n")
}
