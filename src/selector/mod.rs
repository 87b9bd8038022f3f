//! Final mod selection: a local capability-scored pre-filter shrinks the
//! candidate pool, then one gateway call picks the pack. Post-conditions
//! (no duplicates, valid category indices, exact count, category coverage)
//! are enforced deterministically after the call.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::llm::{call_structured, LlmCall, LlmGateway, LlmOutcome};
use crate::planner::{PlannedArchitecture, PlannedCategory};
use crate::prompts::FINAL_SELECTOR_PROMPT;
use crate::search::Candidate;
use crate::store::ModRecord;

/// Pool ceiling handed to the model.
const MAX_POOL: usize = 50;
/// Per-category pool contribution.
const PER_CATEGORY_LIMIT: usize = 6;
/// Libraries carried into the pool unconditionally.
const LIBRARY_POOL_LIMIT: usize = 15;

/// Role of a selected mod within the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRole {
    Primary,
    Library,
    Dependency,
    Bridge,
}

/// One selection produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedMod {
    pub source_id: String,
    #[serde(default)]
    pub category_index: Option<usize>,
    #[serde(default)]
    pub reason: String,
    pub role: SelectionRole,
}

#[derive(Debug, Deserialize)]
struct SelectionDraft {
    #[serde(default)]
    selections: Vec<SelectedMod>,
}

/// Score a mod against a planned category: capability intersections plus a
/// capped popularity term.
pub fn score_for_category(record: &ModRecord, category: &PlannedCategory) -> f64 {
    let caps: HashSet<&str> = record.capabilities.iter().map(String::as_str).collect();
    let required = category
        .required_capabilities
        .iter()
        .filter(|c| caps.contains(c.as_str()))
        .count() as f64;
    let preferred = category
        .preferred_capabilities
        .iter()
        .filter(|c| caps.contains(c.as_str()))
        .count() as f64;
    let popularity = ((record.downloads as f64 + 1.0).log10()).min(3.0);
    5.0 * required + 2.0 * preferred + popularity
}

/// Runs pre-filtering and the selection call.
pub struct FinalSelector {
    gateway: Arc<dyn LlmGateway>,
}

impl FinalSelector {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Local pre-filter: top mods per planned category plus the libraries,
    /// capped at [`MAX_POOL`]. Without a plan the top fused candidates pass
    /// straight through.
    pub fn prefilter<'a>(
        candidates: &'a [Candidate],
        plan: Option<&PlannedArchitecture>,
        max_mods: u32,
    ) -> Vec<&'a Candidate> {
        let Some(plan) = plan else {
            return candidates.iter().take(MAX_POOL).collect();
        };

        let (libraries, gameplay): (Vec<&Candidate>, Vec<&Candidate>) =
            candidates.iter().partition(|c| c.record.is_library());

        let mut picked: Vec<&Candidate> = Vec::new();
        let mut picked_ids: HashSet<&str> = HashSet::new();

        for category in &plan.categories {
            let mut scored: Vec<(f64, &Candidate)> = gameplay
                .iter()
                .filter(|c| !picked_ids.contains(c.record.source_id.as_str()))
                .map(|c| (score_for_category(&c.record, category), *c))
                // A category with required capabilities only admits mods
                // matching at least one of them.
                .filter(|(score, _)| {
                    category.required_capabilities.is_empty() || *score >= 5.0
                })
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            for (_, candidate) in scored.into_iter().take(PER_CATEGORY_LIMIT) {
                if picked_ids.insert(candidate.record.source_id.as_str()) {
                    picked.push(candidate);
                }
            }
        }

        // Backfill with the best remaining fused candidates.
        if picked.len() < max_mods as usize {
            for &candidate in &gameplay {
                if picked.len() >= max_mods as usize {
                    break;
                }
                if picked_ids.insert(candidate.record.source_id.as_str()) {
                    picked.push(candidate);
                }
            }
        }

        let mut pool: Vec<&Candidate> = libraries
            .into_iter()
            .take(LIBRARY_POOL_LIMIT)
            .collect();
        pool.extend(picked);
        pool.truncate(MAX_POOL);

        debug!(pool = pool.len(), candidates = candidates.len(), "pre-filter complete");
        pool
    }

    /// Gateway selection over the pool, with post-conditions enforced.
    pub async fn select(
        &self,
        prompt: &str,
        pool: &[&Candidate],
        plan: Option<&PlannedArchitecture>,
        max_mods: u32,
    ) -> AppResult<LlmOutcome<Vec<SelectedMod>>> {
        if pool.is_empty() {
            return Err(AppError::NoViableSelection);
        }
        let want = (max_mods as usize).min(pool.len());

        let category_block = plan
            .map(|p| {
                p.categories
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        format!(
                            "{i}. {} (target {}, requires [{}])",
                            c.name,
                            c.target_mods,
                            c.required_capabilities.join(", ")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_else(|| "none (use null category_index)".to_string());

        let pool_block = pool
            .iter()
            .map(|c| {
                let summary = c.record.summary.clone().unwrap_or_default();
                format!(
                    "- {} | {} | {} | caps: [{}] | downloads: {}",
                    c.record.source_id,
                    c.record.name,
                    summary.chars().take(120).collect::<String>(),
                    c.record.capabilities.join(", "),
                    c.record.downloads,
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "USER REQUEST: \"{prompt}\"\n\
             Select EXACTLY {want} mods.\n\n\
             CATEGORY PLAN:\n{category_block}\n\n\
             CANDIDATE POOL ({pool_len}):\n{pool_block}",
            pool_len = pool.len(),
        );

        let call = LlmCall::new("final_selector", FINAL_SELECTOR_PROMPT, user)
            .with_temperature(0.2)
            .with_max_tokens(4_000);

        let outcome: LlmOutcome<SelectionDraft> =
            call_structured(self.gateway.as_ref(), call).await?;

        let selections = enforce_postconditions(outcome.value.selections, pool, plan, want);
        if selections.is_empty() {
            return Err(AppError::NoViableSelection);
        }

        info!(selected = selections.len(), want, "final selection complete");
        Ok(LlmOutcome {
            value: selections,
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }
}

/// Enforce: known source ids only, no duplicates, valid category indices,
/// exactly `want` entries, and required-capability category coverage where
/// the pool permits.
fn enforce_postconditions(
    raw: Vec<SelectedMod>,
    pool: &[&Candidate],
    plan: Option<&PlannedArchitecture>,
    want: usize,
) -> Vec<SelectedMod> {
    let category_count = plan.map(|p| p.categories.len()).unwrap_or(0);
    let mut seen: HashSet<String> = HashSet::new();
    let mut selections: Vec<SelectedMod> = Vec::new();

    for mut selection in raw {
        if !pool
            .iter()
            .any(|c| c.record.source_id == selection.source_id)
        {
            continue;
        }
        if !seen.insert(selection.source_id.clone()) {
            continue;
        }
        if selection
            .category_index
            .is_some_and(|i| i >= category_count)
        {
            selection.category_index = None;
        }
        selections.push(selection);
        if selections.len() == want {
            break;
        }
    }

    // Backfill from the pool when the model under-selected.
    if selections.len() < want {
        for candidate in pool {
            if selections.len() >= want {
                break;
            }
            if seen.insert(candidate.record.source_id.clone()) {
                selections.push(SelectedMod {
                    source_id: candidate.record.source_id.clone(),
                    category_index: None,
                    reason: "high-ranking candidate".to_string(),
                    role: if candidate.record.is_library() {
                        SelectionRole::Library
                    } else {
                        SelectionRole::Primary
                    },
                });
            }
        }
    }

    if let Some(plan) = plan {
        ensure_category_coverage(&mut selections, pool, plan);
    }
    selections
}

/// Every category with required capabilities gets at least one selection
/// when the pool has a matching mod, swapping out the weakest extra pick if
/// the list is full.
fn ensure_category_coverage(
    selections: &mut Vec<SelectedMod>,
    pool: &[&Candidate],
    plan: &PlannedArchitecture,
) {
    for (index, category) in plan.categories.iter().enumerate() {
        if category.required_capabilities.is_empty() {
            continue;
        }
        if selections
            .iter()
            .any(|s| s.category_index == Some(index))
        {
            continue;
        }

        let selected_ids: HashSet<String> =
            selections.iter().map(|s| s.source_id.clone()).collect();

        // First try relabeling an already-selected mod that fits.
        if let Some(existing) = selections
            .iter_mut()
            .filter(|s| s.category_index.is_none())
            .find(|s| {
                pool.iter()
                    .find(|c| c.record.source_id == s.source_id)
                    .is_some_and(|c| score_for_category(&c.record, category) >= 5.0)
            })
        {
            existing.category_index = Some(index);
            continue;
        }

        let replacement = pool
            .iter()
            .filter(|c| !selected_ids.contains(&c.record.source_id))
            .map(|c| (score_for_category(&c.record, category), c))
            .filter(|(score, _)| *score >= 5.0)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((_, candidate)) = replacement {
            let pick = SelectedMod {
                source_id: candidate.record.source_id.clone(),
                category_index: Some(index),
                reason: format!("covers the {} category", category.name),
                role: SelectionRole::Primary,
            };
            // Swap out the last uncategorized pick to keep the count.
            if let Some(pos) = selections.iter().rposition(|s| s.category_index.is_none()) {
                selections[pos] = pick;
            } else {
                selections.push(pick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::QueryHit;

    fn candidate(id: &str, caps: &[&str], downloads: u64) -> Candidate {
        Candidate {
            record: ModRecord {
                source_id: id.to_string(),
                slug: id.to_string(),
                name: id.to_string(),
                capabilities: caps.iter().map(|s| s.to_string()).collect(),
                downloads,
                ..Default::default()
            },
            score: 0.01,
            trace: Vec::<QueryHit>::new(),
        }
    }

    fn category(name: &str, required: &[&str], target: u32) -> PlannedCategory {
        PlannedCategory {
            name: name.to_string(),
            description: String::new(),
            required_capabilities: required.iter().map(|s| s.to_string()).collect(),
            preferred_capabilities: Vec::new(),
            target_mods: target,
        }
    }

    fn plan(categories: Vec<PlannedCategory>) -> PlannedArchitecture {
        PlannedArchitecture {
            categories,
            pack_archetype: String::new(),
            estimated_total_mods: 0,
        }
    }

    #[test]
    fn test_score_formula() {
        let record = candidate("x", &["magic.spellcasting", "magic.rituals"], 99_999).record;
        let cat = PlannedCategory {
            name: "Magic".into(),
            description: String::new(),
            required_capabilities: vec!["magic.spellcasting".into()],
            preferred_capabilities: vec!["magic.rituals".into()],
            target_mods: 10,
        };
        let score = score_for_category(&record, &cat);
        // 5*1 + 2*1 + log10(100000) capped at 3 = 5 + 2 + 3
        assert!((score - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_popularity_term_capped_at_three() {
        let record = candidate("x", &[], 1_000_000_000).record;
        let cat = category("Any", &[], 10);
        assert!((score_for_category(&record, &cat) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_prefilter_without_plan_passes_top() {
        let candidates: Vec<Candidate> = (0..80)
            .map(|i| candidate(&format!("m{i}"), &[], 10_000))
            .collect();
        let pool = FinalSelector::prefilter(&candidates, None, 100);
        assert_eq!(pool.len(), MAX_POOL);
        assert_eq!(pool[0].record.source_id, "m0");
    }

    #[test]
    fn test_prefilter_takes_top_per_category() {
        let mut candidates: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("magic{i}"), &["magic.spellcasting"], 10_000))
            .collect();
        candidates.extend((0..20).map(|i| candidate(&format!("tech{i}"), &["technology.machines"], 10_000)));

        let p = plan(vec![
            category("Magic", &["magic.spellcasting"], 10),
            category("Tech", &["technology.machines"], 10),
        ]);
        let pool = FinalSelector::prefilter(&candidates, Some(&p), 12);

        let magic = pool
            .iter()
            .filter(|c| c.record.source_id.starts_with("magic"))
            .count();
        let tech = pool
            .iter()
            .filter(|c| c.record.source_id.starts_with("tech"))
            .count();
        assert!(magic >= PER_CATEGORY_LIMIT);
        assert!(tech >= PER_CATEGORY_LIMIT);
    }

    #[test]
    fn test_prefilter_keeps_libraries() {
        let mut candidates = vec![candidate("fabric-api", &["api.exposed"], 1_000_000)];
        candidates.extend((0..10).map(|i| candidate(&format!("m{i}"), &["magic.spellcasting"], 10_000)));

        let p = plan(vec![category("Magic", &["magic.spellcasting"], 10)]);
        let pool = FinalSelector::prefilter(&candidates, Some(&p), 10);
        assert!(pool.iter().any(|c| c.record.source_id == "fabric-api"));
    }

    fn sel(id: &str, index: Option<usize>) -> SelectedMod {
        SelectedMod {
            source_id: id.to_string(),
            category_index: index,
            reason: "test".into(),
            role: SelectionRole::Primary,
        }
    }

    #[test]
    fn test_postconditions_dedupe_and_unknown_dropped() {
        let owned: Vec<Candidate> = vec![
            candidate("a", &[], 10_000),
            candidate("b", &[], 10_000),
        ];
        let pool: Vec<&Candidate> = owned.iter().collect();
        let raw = vec![sel("a", None), sel("a", None), sel("ghost", None), sel("b", None)];
        let result = enforce_postconditions(raw, &pool, None, 2);
        let ids: Vec<_> = result.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_postconditions_backfill_to_exact_count() {
        let owned: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("m{i}"), &[], 10_000))
            .collect();
        let pool: Vec<&Candidate> = owned.iter().collect();
        let result = enforce_postconditions(vec![sel("m0", None)], &pool, None, 3);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_postconditions_invalid_category_index_cleared() {
        let owned = vec![candidate("a", &[], 10_000)];
        let pool: Vec<&Candidate> = owned.iter().collect();
        let p = plan(vec![category("Only", &["x.y"], 5)]);
        let result = enforce_postconditions(vec![sel("a", Some(7))], &pool, Some(&p), 1);
        assert_eq!(result[0].category_index, None);
    }

    #[test]
    fn test_category_coverage_relabels_fitting_pick() {
        let owned = vec![
            candidate("magic-mod", &["magic.spellcasting"], 10_000),
            candidate("other", &[], 10_000),
        ];
        let pool: Vec<&Candidate> = owned.iter().collect();
        let p = plan(vec![category("Magic", &["magic.spellcasting"], 5)]);

        let result = enforce_postconditions(
            vec![sel("magic-mod", None), sel("other", None)],
            &pool,
            Some(&p),
            2,
        );
        assert!(result.iter().any(|s| s.category_index == Some(0)));
    }

    #[test]
    fn test_category_coverage_swaps_in_pool_mod() {
        let owned = vec![
            candidate("plain1", &[], 10_000),
            candidate("plain2", &[], 10_000),
            candidate("magic-mod", &["magic.spellcasting"], 10_000),
        ];
        let pool: Vec<&Candidate> = owned.iter().collect();
        let p = plan(vec![category("Magic", &["magic.spellcasting"], 5)]);

        let result = enforce_postconditions(
            vec![sel("plain1", None), sel("plain2", None)],
            &pool,
            Some(&p),
            2,
        );
        assert_eq!(result.len(), 2);
        assert!(result
            .iter()
            .any(|s| s.source_id == "magic-mod" && s.category_index == Some(0)));
    }
}
