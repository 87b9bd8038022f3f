//! Architecture planner for the themed flow.
//!
//! Two gateway calls: the *plan* call designs a category architecture from
//! reference modpacks, and the *refine* call reworks the layout around the
//! mods that were actually selected. Both are followed by deterministic
//! enforcement of the structural rules (category counts, target sums,
//! splits, merges, library separation), so the output contract holds even
//! when the model drifts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::AppResult;
use crate::llm::{call_structured, LlmCall, LlmGateway, LlmOutcome};
use crate::prompts::{ARCHITECTURE_PLAN_PROMPT, ARCHITECTURE_REFINE_PROMPT};
use crate::store::{ModRecord, ModStore, ModpackRecord, SearchFilters};

/// Reference packs fed to the plan call.
const REFERENCE_COUNT: usize = 10;
/// A mod is a baseline when it appears in at least this share of references.
const BASELINE_PREVALENCE: f32 = 0.7;
/// Category count bounds for a planned architecture.
const MIN_CATEGORIES: usize = 5;
const MAX_CATEGORIES: usize = 15;
/// Target sum tolerance around max_mods.
const TARGET_TOLERANCE: f32 = 0.2;
/// Gameplay categories above this size get split.
const SPLIT_THRESHOLD: usize = 15;
/// Categories below this size get merged into a sibling.
const MERGE_THRESHOLD: usize = 4;
/// Minimum capability Jaccard similarity for a merge.
const MERGE_JACCARD: f32 = 0.4;
/// Library groups of this size or more are split by sub-capability.
const LIBRARY_SPLIT_THRESHOLD: usize = 20;

const PERFORMANCE_PREFIXES: [&str; 2] = ["optimization", "performance"];
const GRAPHICS_PREFIXES: [&str; 3] = ["graphics", "shaders", "render"];
const LIBRARY_PREFIXES: [&str; 3] = ["api", "dependency", "compatibility"];

/// One category in a planned architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub preferred_capabilities: Vec<String>,
    #[serde(default)]
    pub target_mods: u32,
}

/// Category plan for a themed pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedArchitecture {
    pub categories: Vec<PlannedCategory>,
    #[serde(default)]
    pub pack_archetype: String,
    #[serde(default)]
    pub estimated_total_mods: u32,
}

impl PlannedArchitecture {
    pub fn target_sum(&self) -> u32 {
        self.categories.iter().map(|c| c.target_mods).sum()
    }
}

/// A baseline mod extracted from reference packs.
#[derive(Debug, Clone)]
pub struct BaselineMod {
    pub source_id: String,
    pub prevalence: f32,
}

/// Final category layout after refinement.
#[derive(Debug, Clone, Serialize)]
pub struct RefinedArchitecture {
    pub categories: Vec<RefinedCategory>,
}

/// One refined category with its member mods.
#[derive(Debug, Clone, Serialize)]
pub struct RefinedCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: Vec<String>,
    /// Member source ids, in assignment order.
    pub mods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RefineDraft {
    #[serde(default)]
    categories: Vec<RefineDraftCategory>,
    #[serde(default)]
    assignments: Vec<RefineAssignment>,
}

#[derive(Debug, Deserialize)]
struct RefineDraftCategory {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RefineAssignment {
    source_id: String,
    category_index: usize,
}

/// Plans and refines themed-pack architectures.
pub struct ArchitecturePlanner {
    gateway: Arc<dyn LlmGateway>,
    store: Arc<dyn ModStore>,
    embedder: Arc<dyn Embedder>,
}

impl ArchitecturePlanner {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        store: Arc<dyn ModStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            gateway,
            store,
            embedder,
        }
    }

    /// Top-K reference modpacks similar to the prompt.
    pub async fn find_references(
        &self,
        prompt: &str,
        loader: &str,
    ) -> AppResult<Vec<ModpackRecord>> {
        let embedding = self.embedder.embed(prompt).await?;
        let filters = SearchFilters {
            loader: Some(loader.to_string()),
            ..Default::default()
        };
        let references = self
            .store
            .modpack_vector_search(&embedding, &filters, REFERENCE_COUNT)
            .await?;
        info!(references = references.len(), "reference modpacks found");
        Ok(references)
    }

    /// Mods appearing in at least 70% of references, with prevalence.
    pub fn extract_baselines(references: &[ModpackRecord]) -> Vec<BaselineMod> {
        if references.is_empty() {
            return Vec::new();
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        for pack in references {
            let Some(arch) = &pack.architecture else {
                continue;
            };
            let mut seen: HashSet<&str> = HashSet::new();
            for category in &arch.categories {
                for mods in category.providers.values() {
                    for source_id in mods {
                        seen.insert(source_id);
                    }
                }
            }
            for source_id in seen {
                *counts.entry(source_id.to_string()).or_default() += 1;
            }
        }

        let total = references.len() as f32;
        let mut baselines: Vec<BaselineMod> = counts
            .into_iter()
            .map(|(source_id, count)| BaselineMod {
                source_id,
                prevalence: count as f32 / total,
            })
            .filter(|b| b.prevalence >= BASELINE_PREVALENCE)
            .collect();
        baselines.sort_by(|a, b| {
            b.prevalence
                .partial_cmp(&a.prevalence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        baselines
    }

    /// Capability pairs co-occurring inside reference categories, most
    /// frequent first. Feeds the plan prompt.
    pub fn cooccurrence_table(references: &[ModpackRecord]) -> Vec<(String, String, usize)> {
        let mut counts: HashMap<(String, String), usize> = HashMap::new();
        for pack in references {
            let Some(arch) = &pack.architecture else {
                continue;
            };
            for category in &arch.categories {
                let mut caps: Vec<&String> = category
                    .required_capabilities
                    .iter()
                    .chain(category.preferred_capabilities.iter())
                    .collect();
                caps.sort();
                caps.dedup();
                for (i, a) in caps.iter().enumerate() {
                    for b in caps.iter().skip(i + 1) {
                        *counts
                            .entry(((*a).clone(), (*b).clone()))
                            .or_default() += 1;
                    }
                }
            }
        }
        let mut pairs: Vec<(String, String, usize)> = counts
            .into_iter()
            .map(|((a, b), n)| (a, b, n))
            .collect();
        pairs.sort_by(|x, y| y.2.cmp(&x.2).then_with(|| x.0.cmp(&y.0)));
        pairs.truncate(20);
        pairs
    }

    /// Plan call: category architecture for the request.
    pub async fn plan(
        &self,
        prompt: &str,
        max_mods: u32,
        references: &[ModpackRecord],
    ) -> AppResult<LlmOutcome<PlannedArchitecture>> {
        let reference_block = references
            .iter()
            .take(REFERENCE_COUNT)
            .map(|p| {
                let categories = p
                    .architecture
                    .as_ref()
                    .map(|a| {
                        a.categories
                            .iter()
                            .map(|c| {
                                format!(
                                    "{} [{}]",
                                    c.name,
                                    c.required_capabilities.join(", ")
                                )
                            })
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .unwrap_or_default();
                format!("- {} ({} downloads): {}", p.title, p.downloads, categories)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let cooccurrence = Self::cooccurrence_table(references)
            .into_iter()
            .map(|(a, b, n)| format!("{a} + {b} ({n}x)"))
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "USER REQUEST: \"{prompt}\"\n\
             Pack size: {max_mods} mods\n\n\
             REFERENCE MODPACKS:\n{reference_block}\n\n\
             CAPABILITY CO-OCCURRENCE:\n{cooccurrence}",
        );

        let call = LlmCall::new("architecture_plan", ARCHITECTURE_PLAN_PROMPT, user)
            .with_temperature(0.2)
            .with_max_tokens(3_000);

        let outcome: LlmOutcome<PlannedArchitecture> =
            call_structured(self.gateway.as_ref(), call).await?;
        let plan = validate_plan(outcome.value, max_mods);

        info!(
            categories = plan.categories.len(),
            target_sum = plan.target_sum(),
            archetype = %plan.pack_archetype,
            "architecture planned"
        );

        Ok(LlmOutcome {
            value: plan,
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }

    /// Refine call plus deterministic enforcement.
    ///
    /// Members are first split along the classification ladder:
    /// performance and graphics mods get dedicated categories, libraries
    /// (including mods pulled in by dependency resolution, marked via
    /// `dependency_ids`) are grouped separately, and only the remaining
    /// gameplay mods go through the model's category layout.
    pub async fn refine(
        &self,
        plan: &PlannedArchitecture,
        mods: &[ModRecord],
        dependency_ids: &HashSet<String>,
    ) -> AppResult<LlmOutcome<RefinedArchitecture>> {
        let buckets = partition_members(mods, dependency_ids, plan);

        let planned_block = plan
            .categories
            .iter()
            .map(|c| format!("- {} [{}]", c.name, c.required_capabilities.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let mods_block = buckets
            .gameplay
            .iter()
            .map(|m| {
                format!(
                    "- {} ({}): [{}]",
                    m.source_id,
                    m.name,
                    m.capabilities.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "PLANNED CATEGORIES:\n{planned_block}\n\n\
             SELECTED GAMEPLAY MODS ({count}):\n{mods_block}",
            count = buckets.gameplay.len(),
        );

        let call = LlmCall::new("architecture_refine", ARCHITECTURE_REFINE_PROMPT, user)
            .with_temperature(0.4)
            .with_max_tokens(4_000);

        let outcome: LlmOutcome<RefineDraft> = call_structured(self.gateway.as_ref(), call).await?;
        let mut refined = enforce_refinement(outcome.value, &buckets.gameplay, plan);
        refined.categories.extend(dedicated_categories(&buckets));

        info!(
            categories = refined.categories.len(),
            performance = buckets.performance.len(),
            graphics = buckets.graphics.len(),
            libraries = buckets.libraries.len(),
            "architecture refined"
        );

        Ok(LlmOutcome {
            value: refined,
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }
}

/// Clamp a planned architecture to its structural contract.
fn validate_plan(mut plan: PlannedArchitecture, max_mods: u32) -> PlannedArchitecture {
    plan.categories.retain(|c| {
        let ok = !c.required_capabilities.is_empty();
        if !ok {
            warn!(category = %c.name, "dropping planned category without required capabilities");
        }
        ok
    });
    plan.categories.truncate(MAX_CATEGORIES);
    if plan.categories.len() < MIN_CATEGORIES {
        debug!(
            categories = plan.categories.len(),
            "planned architecture below minimum category count"
        );
    }

    // Rescale targets proportionally when the sum drifts outside +-20%.
    let sum = plan.target_sum();
    if sum > 0 {
        let low = (max_mods as f32 * (1.0 - TARGET_TOLERANCE)).floor() as u32;
        let high = (max_mods as f32 * (1.0 + TARGET_TOLERANCE)).ceil() as u32;
        if sum < low || sum > high {
            let scale = max_mods as f32 / sum as f32;
            for category in &mut plan.categories {
                category.target_mods = ((category.target_mods as f32 * scale).round() as u32).max(1);
            }
        }
    } else if !plan.categories.is_empty() {
        let even = (max_mods / plan.categories.len() as u32).max(1);
        for category in &mut plan.categories {
            category.target_mods = even;
        }
    }

    plan.estimated_total_mods = plan.target_sum();
    plan
}

/// Macro classification with the fixed priority ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroClass {
    Performance,
    Graphics,
    Library,
    Gameplay,
}

fn has_prefix(caps: &[String], prefixes: &[&str]) -> bool {
    caps.iter().any(|c| {
        prefixes
            .iter()
            .any(|p| c == p || c.starts_with(&format!("{p}.")))
    })
}

/// Classify a mod that may fit several macro groups.
///
/// Priorities: performance 90, graphics 90, library 80 (90 when the mod has
/// no performance/graphics signal), gameplay 75. A performance/graphics tie
/// is broken by the side with more remaining target fill.
pub fn macro_class(record: &ModRecord, perf_fill_left: i32, gfx_fill_left: i32) -> MacroClass {
    let perf = has_prefix(&record.capabilities, &PERFORMANCE_PREFIXES);
    let gfx = has_prefix(&record.capabilities, &GRAPHICS_PREFIXES);
    let lib = has_prefix(&record.capabilities, &LIBRARY_PREFIXES);

    let perf_score = if perf { 90 } else { 0 };
    let gfx_score = if gfx { 90 } else { 0 };
    let lib_score = if lib {
        if perf || gfx {
            80
        } else {
            90
        }
    } else {
        0
    };
    let gameplay_score = 75;

    let best = perf_score.max(gfx_score).max(lib_score).max(gameplay_score);
    if best == perf_score && best == gfx_score && perf && gfx {
        if gfx_fill_left > perf_fill_left {
            return MacroClass::Graphics;
        }
        return MacroClass::Performance;
    }
    if best == perf_score && perf {
        return MacroClass::Performance;
    }
    if best == gfx_score && gfx {
        return MacroClass::Graphics;
    }
    if best == lib_score && lib {
        return MacroClass::Library;
    }
    MacroClass::Gameplay
}

/// Members grouped along the classification ladder.
#[derive(Debug, Default)]
struct MemberBuckets<'a> {
    performance: Vec<&'a ModRecord>,
    graphics: Vec<&'a ModRecord>,
    libraries: Vec<&'a ModRecord>,
    gameplay: Vec<&'a ModRecord>,
}

/// Final bucket for one member. Performance and graphics signals beat
/// library signals; a dependency carrying gameplay capabilities stays
/// with the gameplay mods, a bare dependency is a library.
fn member_bucket(
    record: &ModRecord,
    is_dependency: bool,
    perf_fill_left: i32,
    gfx_fill_left: i32,
) -> MacroClass {
    match macro_class(record, perf_fill_left, gfx_fill_left) {
        MacroClass::Gameplay if record.is_library() => MacroClass::Library,
        MacroClass::Gameplay if is_dependency && record.capabilities.is_empty() => {
            MacroClass::Library
        }
        class => class,
    }
}

/// Sum of planned targets for categories carrying the given capability
/// prefixes; feeds the performance/graphics tie-break.
fn plan_target_for(plan: &PlannedArchitecture, prefixes: &[&str]) -> u32 {
    plan.categories
        .iter()
        .filter(|c| {
            has_prefix(&c.required_capabilities, prefixes)
                || has_prefix(&c.preferred_capabilities, prefixes)
        })
        .map(|c| c.target_mods)
        .sum()
}

/// Split members into performance/graphics/library/gameplay buckets using
/// the priority ladder, breaking performance-vs-graphics ties by the
/// bucket with more remaining target fill.
fn partition_members<'a>(
    mods: &'a [ModRecord],
    dependency_ids: &HashSet<String>,
    plan: &PlannedArchitecture,
) -> MemberBuckets<'a> {
    let perf_target = plan_target_for(plan, &PERFORMANCE_PREFIXES) as i32;
    let gfx_target = plan_target_for(plan, &GRAPHICS_PREFIXES) as i32;

    let mut buckets = MemberBuckets::default();
    for record in mods {
        let is_dependency = dependency_ids.contains(&record.source_id);
        let perf_fill_left = perf_target - buckets.performance.len() as i32;
        let gfx_fill_left = gfx_target - buckets.graphics.len() as i32;
        match member_bucket(record, is_dependency, perf_fill_left, gfx_fill_left) {
            MacroClass::Performance => buckets.performance.push(record),
            MacroClass::Graphics => buckets.graphics.push(record),
            MacroClass::Library => buckets.libraries.push(record),
            MacroClass::Gameplay => buckets.gameplay.push(record),
        }
    }
    buckets
}

/// Dedicated categories for the non-gameplay buckets, appended after the
/// refined gameplay layout.
fn dedicated_categories(buckets: &MemberBuckets<'_>) -> Vec<RefinedCategory> {
    let mut categories = Vec::new();
    if !buckets.performance.is_empty() {
        categories.push(RefinedCategory {
            name: "Performance".to_string(),
            description: "FPS, memory and tick-rate optimizers".to_string(),
            capabilities: vec![
                "optimization.client".to_string(),
                "optimization.server".to_string(),
            ],
            mods: buckets
                .performance
                .iter()
                .map(|m| m.source_id.clone())
                .collect(),
        });
    }
    if !buckets.graphics.is_empty() {
        categories.push(RefinedCategory {
            name: "Graphics & Shaders".to_string(),
            description: "Rendering pipelines and shader support".to_string(),
            capabilities: vec![
                "graphics.shaders".to_string(),
                "render.pipeline".to_string(),
            ],
            mods: buckets
                .graphics
                .iter()
                .map(|m| m.source_id.clone())
                .collect(),
        });
    }
    categories.extend(library_categories(&buckets.libraries));
    categories
}

/// Jaccard similarity of two capability sets.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// Apply the deterministic refinement rules to the model's draft layout of
/// the gameplay mods. Performance, graphics and library categories are
/// appended by the caller from their dedicated buckets.
fn enforce_refinement(
    draft: RefineDraft,
    gameplay: &[&ModRecord],
    plan: &PlannedArchitecture,
) -> RefinedArchitecture {
    let records: HashMap<&str, &ModRecord> = gameplay
        .iter()
        .map(|m| (m.source_id.as_str(), *m))
        .collect();

    // Materialize draft categories; mods assigned out of range or twice
    // fall through to capability-based placement below.
    let mut categories: Vec<RefinedCategory> = draft
        .categories
        .iter()
        .map(|c| RefinedCategory {
            name: c.name.clone(),
            description: c.description.clone(),
            capabilities: c.capabilities.clone(),
            mods: Vec::new(),
        })
        .collect();
    if categories.is_empty() {
        categories = plan
            .categories
            .iter()
            .map(|c| RefinedCategory {
                name: c.name.clone(),
                description: c.description.clone(),
                capabilities: c.required_capabilities.clone(),
                mods: Vec::new(),
            })
            .collect();
    }

    let mut placed: HashSet<String> = HashSet::new();
    for assignment in draft.assignments {
        if !records.contains_key(assignment.source_id.as_str()) {
            continue;
        }
        if placed.contains(&assignment.source_id) {
            continue;
        }
        if let Some(category) = categories.get_mut(assignment.category_index) {
            category.mods.push(assignment.source_id.clone());
            placed.insert(assignment.source_id);
        }
    }

    // Place whatever the model missed by capability overlap.
    for record in gameplay {
        if placed.contains(&record.source_id) {
            continue;
        }
        let caps: HashSet<String> = record.capabilities.iter().cloned().collect();
        let best = categories
            .iter_mut()
            .max_by(|a, b| {
                let sa = a.capabilities.iter().filter(|c| caps.contains(*c)).count();
                let sb = b.capabilities.iter().filter(|c| caps.contains(*c)).count();
                sa.cmp(&sb)
            });
        if let Some(category) = best {
            category.mods.push(record.source_id.clone());
            placed.insert(record.source_id.clone());
        }
    }

    let mut categories = split_oversized(categories, &records);
    categories = merge_undersized(categories);
    categories.retain(|c| !c.mods.is_empty());

    RefinedArchitecture { categories }
}

/// Split categories holding more than [`SPLIT_THRESHOLD`] gameplay mods into
/// 2-3 sub-categories along top-level capability prefixes.
fn split_oversized(
    categories: Vec<RefinedCategory>,
    records: &HashMap<&str, &ModRecord>,
) -> Vec<RefinedCategory> {
    let mut out = Vec::new();
    for category in categories {
        if category.mods.len() <= SPLIT_THRESHOLD {
            out.push(category);
            continue;
        }

        // Bucket members by dominant capability prefix.
        let mut buckets: Vec<(String, Vec<String>)> = Vec::new();
        for source_id in &category.mods {
            let prefix = records
                .get(source_id.as_str())
                .and_then(|r| r.capabilities.first())
                .and_then(|c| c.split('.').next())
                .unwrap_or("misc")
                .to_string();
            match buckets.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, mods)) => mods.push(source_id.clone()),
                None => buckets.push((prefix, vec![source_id.clone()])),
            }
        }
        buckets.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

        // Fold the tail into at most three buckets.
        while buckets.len() > 3 {
            let (_, mods) = buckets.pop().expect("bucket list not empty");
            buckets
                .last_mut()
                .expect("at least one bucket remains")
                .1
                .extend(mods);
        }

        if buckets.len() == 1 {
            out.push(category);
            continue;
        }

        debug!(category = %category.name, splits = buckets.len(), "splitting oversized category");
        for (prefix, mods) in buckets {
            out.push(RefinedCategory {
                name: format!("{}: {}", category.name, title_case(&prefix)),
                description: category.description.clone(),
                capabilities: category.capabilities.clone(),
                mods,
            });
        }
    }
    out
}

/// Merge categories below [`MERGE_THRESHOLD`] into their nearest sibling by
/// capability Jaccard, when a sibling is similar enough.
fn merge_undersized(categories: Vec<RefinedCategory>) -> Vec<RefinedCategory> {
    let mut categories = categories;
    let mut unmergeable: HashSet<String> = HashSet::new();
    loop {
        let Some(small_idx) = categories.iter().position(|c| {
            !c.mods.is_empty() && c.mods.len() < MERGE_THRESHOLD && !unmergeable.contains(&c.name)
        }) else {
            break;
        };

        let small_caps: HashSet<String> = categories[small_idx].capabilities.iter().cloned().collect();
        let mut best: Option<(usize, f32)> = None;
        for (i, sibling) in categories.iter().enumerate() {
            if i == small_idx || sibling.mods.is_empty() {
                continue;
            }
            let sibling_caps: HashSet<String> = sibling.capabilities.iter().cloned().collect();
            let similarity = jaccard(&small_caps, &sibling_caps);
            if similarity >= MERGE_JACCARD
                && best.is_none_or(|(_, s)| similarity > s)
            {
                best = Some((i, similarity));
            }
        }

        match best {
            Some((target, similarity)) => {
                debug!(
                    from = %categories[small_idx].name,
                    into = %categories[target].name,
                    similarity,
                    "merging undersized category"
                );
                let mods = std::mem::take(&mut categories[small_idx].mods);
                categories[target].mods.extend(mods);
                categories.remove(small_idx);
            }
            // No sibling close enough; the small category stands.
            None => {
                unmergeable.insert(categories[small_idx].name.clone());
            }
        }
    }
    categories
}

/// Group libraries into their own categories, split by sub-capability when
/// the group is large.
fn library_categories(libraries: &[&ModRecord]) -> Vec<RefinedCategory> {
    if libraries.is_empty() {
        return Vec::new();
    }

    if libraries.len() < LIBRARY_SPLIT_THRESHOLD {
        return vec![RefinedCategory {
            name: "Libraries".to_string(),
            description: "APIs and shared libraries".to_string(),
            capabilities: vec!["dependency.library".to_string(), "api.exposed".to_string()],
            mods: libraries.iter().map(|m| m.source_id.clone()).collect(),
        }];
    }

    let mut apis = Vec::new();
    let mut compat = Vec::new();
    let mut core = Vec::new();
    for lib in libraries {
        if has_prefix(&lib.capabilities, &["api"]) {
            apis.push(lib.source_id.clone());
        } else if has_prefix(&lib.capabilities, &["compatibility"]) {
            compat.push(lib.source_id.clone());
        } else {
            core.push(lib.source_id.clone());
        }
    }

    [
        ("APIs", "Exposed mod APIs", "api.exposed", apis),
        ("Core Libraries", "Shared runtime libraries", "dependency.library", core),
        ("Compatibility", "Cross-mod compatibility glue", "compatibility.bridge", compat),
    ]
    .into_iter()
    .filter(|(_, _, _, mods)| !mods.is_empty())
    .map(|(name, description, capability, mods)| RefinedCategory {
        name: name.to_string(),
        description: description.to_string(),
        capabilities: vec![capability.to_string()],
        mods,
    })
    .collect()
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ModpackArchitecture, ReferenceCategory};

    fn reference(title: &str, provider_mods: &[&str]) -> ModpackRecord {
        let mut providers = HashMap::new();
        providers.insert(
            "any".to_string(),
            provider_mods.iter().map(|s| s.to_string()).collect(),
        );
        ModpackRecord {
            source_id: title.to_string(),
            title: title.to_string(),
            architecture: Some(ModpackArchitecture {
                categories: vec![ReferenceCategory {
                    name: "Main".to_string(),
                    required_capabilities: vec!["magic.spellcasting".into()],
                    preferred_capabilities: vec!["magic.rituals".into()],
                    providers,
                }],
            }),
            ..Default::default()
        }
    }

    fn gameplay_mod(id: &str, caps: &[&str]) -> ModRecord {
        ModRecord {
            source_id: id.to_string(),
            slug: id.to_string(),
            name: id.to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline_extraction_threshold() {
        let references = vec![
            reference("a", &["fabric-api", "sodium"]),
            reference("b", &["fabric-api", "sodium"]),
            reference("c", &["fabric-api", "lithium"]),
            reference("d", &["fabric-api"]),
        ];
        let baselines = ArchitecturePlanner::extract_baselines(&references);
        let ids: Vec<_> = baselines.iter().map(|b| b.source_id.as_str()).collect();
        // fabric-api in 4/4, sodium in 2/4, lithium in 1/4
        assert_eq!(ids, vec!["fabric-api"]);
        assert!((baselines[0].prevalence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cooccurrence_counts_pairs() {
        let references = vec![reference("a", &[]), reference("b", &[])];
        let pairs = ArchitecturePlanner::cooccurrence_table(&references);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].2, 2);
    }

    #[test]
    fn test_validate_plan_rescales_targets() {
        let plan = PlannedArchitecture {
            categories: (0..5)
                .map(|i| PlannedCategory {
                    name: format!("c{i}"),
                    description: String::new(),
                    required_capabilities: vec!["x.y".into()],
                    preferred_capabilities: Vec::new(),
                    target_mods: 4,
                })
                .collect(),
            pack_archetype: "test".into(),
            estimated_total_mods: 20,
        };
        // Sum 20 for max_mods 100 is far outside +-20%.
        let validated = validate_plan(plan, 100);
        let sum = validated.target_sum();
        assert!(sum >= 80 && sum <= 120, "sum {sum} outside tolerance");
    }

    #[test]
    fn test_validate_plan_keeps_in_tolerance_sum() {
        let plan = PlannedArchitecture {
            categories: (0..5)
                .map(|i| PlannedCategory {
                    name: format!("c{i}"),
                    description: String::new(),
                    required_capabilities: vec!["x.y".into()],
                    preferred_capabilities: Vec::new(),
                    target_mods: 19,
                })
                .collect(),
            pack_archetype: "test".into(),
            estimated_total_mods: 95,
        };
        let validated = validate_plan(plan, 100);
        assert_eq!(validated.target_sum(), 95);
    }

    #[test]
    fn test_validate_plan_drops_categories_without_required_caps() {
        let plan = PlannedArchitecture {
            categories: vec![
                PlannedCategory {
                    name: "good".into(),
                    description: String::new(),
                    required_capabilities: vec!["a.b".into()],
                    preferred_capabilities: Vec::new(),
                    target_mods: 10,
                },
                PlannedCategory {
                    name: "bad".into(),
                    description: String::new(),
                    required_capabilities: Vec::new(),
                    preferred_capabilities: Vec::new(),
                    target_mods: 10,
                },
            ],
            pack_archetype: String::new(),
            estimated_total_mods: 20,
        };
        let validated = validate_plan(plan, 10);
        assert_eq!(validated.categories.len(), 1);
        assert_eq!(validated.categories[0].name, "good");
    }

    #[test]
    fn test_macro_class_priorities() {
        let perf = gameplay_mod("sodium", &["optimization.client"]);
        assert_eq!(macro_class(&perf, 0, 0), MacroClass::Performance);

        let gfx = gameplay_mod("iris", &["shaders.pipeline"]);
        assert_eq!(macro_class(&gfx, 0, 0), MacroClass::Graphics);

        // Library with a performance signal stays performance (90 > 80).
        let perf_lib = gameplay_mod("ferritecore", &["optimization.memory", "dependency.library"]);
        assert_eq!(macro_class(&perf_lib, 0, 0), MacroClass::Performance);

        // Pure library scores 90.
        let lib = gameplay_mod("cloth-config", &["dependency.library"]);
        assert_eq!(macro_class(&lib, 0, 0), MacroClass::Library);

        let plain = gameplay_mod("create", &["technology.machines"]);
        assert_eq!(macro_class(&plain, 0, 0), MacroClass::Gameplay);
    }

    #[test]
    fn test_macro_class_tie_breaks_by_fill() {
        let both = gameplay_mod("canvas", &["optimization.client", "shaders.pipeline"]);
        assert_eq!(macro_class(&both, 5, 1), MacroClass::Performance);
        assert_eq!(macro_class(&both, 1, 5), MacroClass::Graphics);
    }

    fn empty_plan() -> PlannedArchitecture {
        PlannedArchitecture {
            categories: Vec::new(),
            pack_archetype: String::new(),
            estimated_total_mods: 0,
        }
    }

    #[test]
    fn test_enforce_refinement_places_unassigned_mods() {
        let a = gameplay_mod("a", &["magic.spellcasting"]);
        let b = gameplay_mod("b", &["technology.machines"]);
        let gameplay = vec![&a, &b];

        let draft = RefineDraft {
            categories: vec![
                RefineDraftCategory {
                    name: "Magic".into(),
                    description: String::new(),
                    capabilities: vec!["magic.spellcasting".into()],
                },
                RefineDraftCategory {
                    name: "Tech".into(),
                    description: String::new(),
                    capabilities: vec!["technology.machines".into()],
                },
            ],
            // The model only assigned one of the two mods.
            assignments: vec![RefineAssignment {
                source_id: "a".into(),
                category_index: 0,
            }],
        };

        let refined = enforce_refinement(draft, &gameplay, &empty_plan());
        let tech = refined
            .categories
            .iter()
            .find(|c| c.name == "Tech")
            .unwrap();
        assert_eq!(tech.mods, vec!["b"]);
    }

    #[test]
    fn test_split_oversized_category() {
        let mods: Vec<ModRecord> = (0..20)
            .map(|i| {
                let cap = if i < 12 { "magic.spells" } else { "combat.weapons" };
                gameplay_mod(&format!("m{i}"), &[cap])
            })
            .collect();
        let refs: Vec<&ModRecord> = mods.iter().collect();
        let records: HashMap<&str, &ModRecord> =
            refs.iter().map(|m| (m.source_id.as_str(), *m)).collect();

        let categories = vec![RefinedCategory {
            name: "Everything".into(),
            description: String::new(),
            capabilities: vec!["magic.spells".into()],
            mods: mods.iter().map(|m| m.source_id.clone()).collect(),
        }];

        let split = split_oversized(categories, &records);
        assert_eq!(split.len(), 2);
        assert!(split.iter().all(|c| c.mods.len() <= SPLIT_THRESHOLD));
    }

    #[test]
    fn test_merge_undersized_with_similar_sibling() {
        let categories = vec![
            RefinedCategory {
                name: "Big Magic".into(),
                description: String::new(),
                capabilities: vec!["magic.spellcasting".into(), "magic.rituals".into()],
                mods: (0..6).map(|i| format!("big{i}")).collect(),
            },
            RefinedCategory {
                name: "Tiny Magic".into(),
                description: String::new(),
                capabilities: vec!["magic.spellcasting".into()],
                mods: vec!["small1".into(), "small2".into()],
            },
        ];
        let merged = merge_undersized(categories);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].mods.len(), 8);
    }

    #[test]
    fn test_merge_skips_dissimilar_sibling() {
        let categories = vec![
            RefinedCategory {
                name: "Tech".into(),
                description: String::new(),
                capabilities: vec!["technology.machines".into()],
                mods: (0..6).map(|i| format!("t{i}")).collect(),
            },
            RefinedCategory {
                name: "Tiny Magic".into(),
                description: String::new(),
                capabilities: vec!["magic.spellcasting".into()],
                mods: vec!["m1".into()],
            },
        ];
        let merged = merge_undersized(categories);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_member_bucket_routing() {
        // Pure library: library bucket.
        let lib = gameplay_mod("cloth-config", &["dependency.library"]);
        assert_eq!(member_bucket(&lib, false, 0, 0), MacroClass::Library);

        // Dependency with performance capabilities wins the ladder.
        let perf_dep = gameplay_mod("ferritecore", &["optimization.memory"]);
        assert_eq!(member_bucket(&perf_dep, true, 0, 0), MacroClass::Performance);

        // Graphics signal beats a library signal.
        let gfx_lib = gameplay_mod("iris", &["shaders.pipeline", "api.exposed"]);
        assert_eq!(member_bucket(&gfx_lib, false, 0, 0), MacroClass::Graphics);

        // Dependency with gameplay capabilities stays gameplay-side.
        let content_dep = gameplay_mod("farmers-delight", &["food.cooking"]);
        assert_eq!(member_bucket(&content_dep, true, 0, 0), MacroClass::Gameplay);

        // Bare dependency with no capability data is a library.
        let bare_dep = gameplay_mod("some-lib", &[]);
        assert_eq!(member_bucket(&bare_dep, true, 0, 0), MacroClass::Library);

        // A plain selected mod stays a gameplay mod.
        let plain = gameplay_mod("create", &["technology.machines"]);
        assert_eq!(member_bucket(&plain, false, 0, 0), MacroClass::Gameplay);
    }

    #[test]
    fn test_partition_members_materializes_all_buckets() {
        let mods = vec![
            gameplay_mod("sodium", &["optimization.client"]),
            gameplay_mod("iris", &["shaders.pipeline"]),
            gameplay_mod("fabric-api", &["api.exposed"]),
            gameplay_mod("create", &["technology.machines"]),
        ];
        let deps: HashSet<String> = ["fabric-api".to_string()].into();

        let buckets = partition_members(&mods, &deps, &empty_plan());
        let ids = |v: &Vec<&ModRecord>| -> Vec<String> {
            v.iter().map(|m| m.source_id.clone()).collect()
        };
        assert_eq!(ids(&buckets.performance), vec!["sodium"]);
        assert_eq!(ids(&buckets.graphics), vec!["iris"]);
        assert_eq!(ids(&buckets.libraries), vec!["fabric-api"]);
        assert_eq!(ids(&buckets.gameplay), vec!["create"]);
    }

    #[test]
    fn test_partition_tie_break_uses_plan_targets() {
        // A mod with both signals follows the bucket with more remaining
        // planned fill.
        let plan = PlannedArchitecture {
            categories: vec![
                PlannedCategory {
                    name: "Performance".into(),
                    description: String::new(),
                    required_capabilities: vec!["optimization.client".into()],
                    preferred_capabilities: Vec::new(),
                    target_mods: 1,
                },
                PlannedCategory {
                    name: "Shaders".into(),
                    description: String::new(),
                    required_capabilities: vec!["graphics.shaders".into()],
                    preferred_capabilities: Vec::new(),
                    target_mods: 5,
                },
            ],
            pack_archetype: String::new(),
            estimated_total_mods: 6,
        };
        let mods = vec![gameplay_mod("canvas", &["optimization.client", "shaders.pipeline"])];

        let buckets = partition_members(&mods, &HashSet::new(), &plan);
        assert!(buckets.performance.is_empty());
        assert_eq!(buckets.graphics.len(), 1);
    }

    #[test]
    fn test_dedicated_categories_from_buckets() {
        let sodium = gameplay_mod("sodium", &["optimization.client"]);
        let iris = gameplay_mod("iris", &["shaders.pipeline"]);
        let lib = gameplay_mod("cloth-config", &["dependency.library"]);
        let buckets = MemberBuckets {
            performance: vec![&sodium],
            graphics: vec![&iris],
            libraries: vec![&lib],
            gameplay: Vec::new(),
        };

        let categories = dedicated_categories(&buckets);
        let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Performance", "Graphics & Shaders", "Libraries"]);
        assert_eq!(categories[0].mods, vec!["sodium"]);
        assert_eq!(categories[1].mods, vec!["iris"]);
        assert_eq!(categories[2].mods, vec!["cloth-config"]);
    }

    #[test]
    fn test_dedicated_categories_skips_empty_buckets() {
        let lib = gameplay_mod("cloth-config", &["dependency.library"]);
        let buckets = MemberBuckets {
            performance: Vec::new(),
            graphics: Vec::new(),
            libraries: vec![&lib],
            gameplay: Vec::new(),
        };
        let categories = dedicated_categories(&buckets);
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Libraries");
    }

    #[test]
    fn test_library_categories_single_group() {
        let libs: Vec<ModRecord> = (0..5)
            .map(|i| gameplay_mod(&format!("lib{i}"), &["dependency.library"]))
            .collect();
        let refs: Vec<&ModRecord> = libs.iter().collect();
        let categories = library_categories(&refs);
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Libraries");
        assert_eq!(categories[0].mods.len(), 5);
    }

    #[test]
    fn test_library_categories_split_when_large() {
        let mut libs = Vec::new();
        for i in 0..8 {
            libs.push(gameplay_mod(&format!("api{i}"), &["api.exposed"]));
        }
        for i in 0..8 {
            libs.push(gameplay_mod(&format!("core{i}"), &["dependency.library"]));
        }
        for i in 0..6 {
            libs.push(gameplay_mod(&format!("compat{i}"), &["compatibility.bridge"]));
        }
        let refs: Vec<&ModRecord> = libs.iter().collect();
        let categories = library_categories(&refs);
        assert_eq!(categories.len(), 3);
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"APIs"));
        assert!(names.contains(&"Core Libraries"));
        assert!(names.contains(&"Compatibility"));
    }
}
