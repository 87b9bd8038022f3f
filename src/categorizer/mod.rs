//! Standard categorization for the simple flow, plus the free-form
//! auto-sort used by the board sorting endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppResult;
use crate::llm::{call_structured, LlmCall, LlmGateway, LlmOutcome};
use crate::prompts::{AUTO_SORT_PROMPT, CATEGORIZER_PROMPT};
use crate::store::ModRecord;

/// Fixed category set of the simple flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardCategory {
    Performance,
    Graphics,
    Utility,
    World,
    Gameplay,
    Content,
    Libraries,
    Other,
}

impl StandardCategory {
    pub fn label(&self) -> &'static str {
        match self {
            StandardCategory::Performance => "Performance",
            StandardCategory::Graphics => "Graphics",
            StandardCategory::Utility => "Utility",
            StandardCategory::World => "World",
            StandardCategory::Gameplay => "Gameplay",
            StandardCategory::Content => "Content",
            StandardCategory::Libraries => "Libraries",
            StandardCategory::Other => "Other",
        }
    }

    /// Parse a model-emitted label; anything unknown folds to Other.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "performance" => StandardCategory::Performance,
            "graphics" => StandardCategory::Graphics,
            "utility" => StandardCategory::Utility,
            "world" => StandardCategory::World,
            "gameplay" => StandardCategory::Gameplay,
            "content" => StandardCategory::Content,
            "libraries" => StandardCategory::Libraries,
            _ => StandardCategory::Other,
        }
    }
}

/// Capability/tag heuristic used for mods the model skips.
pub fn heuristic_category(record: &ModRecord) -> StandardCategory {
    let has_cap = |prefix: &str| {
        record
            .capabilities
            .iter()
            .any(|c| c == prefix || c.starts_with(&format!("{prefix}.")))
    };
    if record.is_library() {
        StandardCategory::Libraries
    } else if has_cap("optimization") || has_cap("performance") {
        StandardCategory::Performance
    } else if has_cap("graphics") || has_cap("shaders") || has_cap("render") {
        StandardCategory::Graphics
    } else if has_cap("worldgen") || has_cap("world") {
        StandardCategory::World
    } else if has_cap("utility") || record.tags.iter().any(|t| t == "utility" || t == "qol") {
        StandardCategory::Utility
    } else if has_cap("items") || has_cap("blocks") || has_cap("mobs") || has_cap("food") {
        StandardCategory::Content
    } else {
        StandardCategory::Gameplay
    }
}

#[derive(Debug, Deserialize)]
struct CategorizeDraft {
    #[serde(default)]
    assignments: Vec<CategorizeAssignment>,
}

#[derive(Debug, Deserialize)]
struct CategorizeAssignment {
    source_id: String,
    category: String,
}

/// Result of the free-form auto-sort.
#[derive(Debug, Clone, Serialize)]
pub struct AutoSortResult {
    pub categories: Vec<String>,
    /// mod name -> category name
    pub mod_to_category: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AutoSortDraft {
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    assignments: Vec<AutoSortAssignment>,
}

#[derive(Debug, Deserialize)]
struct AutoSortAssignment {
    name: String,
    category_index: usize,
}

/// Mod descriptor accepted by the auto-sort endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SortInputMod {
    pub name: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct Categorizer {
    gateway: Arc<dyn LlmGateway>,
}

impl Categorizer {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Map every mod into the fixed category set. One gateway call at
    /// temperature zero over deterministically ordered input.
    pub async fn categorize(
        &self,
        mods: &[ModRecord],
    ) -> AppResult<LlmOutcome<Vec<(String, StandardCategory)>>> {
        let mut ordered: Vec<&ModRecord> = mods.iter().collect();
        ordered.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let mods_block = ordered
            .iter()
            .map(|m| {
                format!(
                    "- {} | {} | caps: [{}] | tags: [{}]",
                    m.source_id,
                    m.name,
                    m.capabilities.join(", "),
                    m.tags.join(", "),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let call = LlmCall::new(
            "categorizer",
            CATEGORIZER_PROMPT,
            format!("MODS ({}):\n{}", ordered.len(), mods_block),
        )
        .with_temperature(0.0)
        .with_max_tokens(3_000);

        let outcome: LlmOutcome<CategorizeDraft> =
            call_structured(self.gateway.as_ref(), call).await?;

        let assigned: HashMap<String, StandardCategory> = outcome
            .value
            .assignments
            .into_iter()
            .map(|a| (a.source_id, StandardCategory::parse(&a.category)))
            .collect();

        // Anything the model skipped falls back to the heuristic.
        let result: Vec<(String, StandardCategory)> = ordered
            .iter()
            .map(|m| {
                let category = assigned
                    .get(&m.source_id)
                    .copied()
                    .unwrap_or_else(|| heuristic_category(m));
                (m.source_id.clone(), category)
            })
            .collect();

        info!(mods = result.len(), "categorization complete");
        Ok(LlmOutcome {
            value: result,
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }

    /// Free-form sort of a caller-supplied mod list into named groups.
    pub async fn auto_sort(
        &self,
        mods: &[SortInputMod],
        max_categories: Option<usize>,
        creativity: Option<f32>,
    ) -> AppResult<LlmOutcome<AutoSortResult>> {
        let max_categories = max_categories.unwrap_or(8).clamp(2, 16);
        let temperature = creativity.unwrap_or(0.3).clamp(0.0, 1.0);

        let mods_block = mods
            .iter()
            .map(|m| {
                format!(
                    "- {} | {}",
                    m.name,
                    m.description.clone().unwrap_or_default().chars().take(100).collect::<String>()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let call = LlmCall::new(
            "auto_sort",
            AUTO_SORT_PROMPT,
            format!(
                "Maximum categories: {max_categories}\n\nMODS ({}):\n{}",
                mods.len(),
                mods_block
            ),
        )
        .with_temperature(temperature)
        .with_max_tokens(3_000);

        let outcome: LlmOutcome<AutoSortDraft> =
            call_structured(self.gateway.as_ref(), call).await?;

        let mut categories = outcome.value.categories;
        categories.truncate(max_categories);
        if categories.is_empty() {
            categories.push("Mods".to_string());
        }

        let mut mod_to_category = HashMap::new();
        for assignment in outcome.value.assignments {
            let index = assignment.category_index.min(categories.len() - 1);
            mod_to_category.insert(assignment.name, categories[index].clone());
        }
        // Unassigned mods land in the last (catch-all) category.
        for m in mods {
            mod_to_category
                .entry(m.name.clone())
                .or_insert_with(|| categories[categories.len() - 1].clone());
        }

        Ok(LlmOutcome {
            value: AutoSortResult {
                categories,
                mod_to_category,
            },
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_caps(id: &str, caps: &[&str]) -> ModRecord {
        ModRecord {
            source_id: id.to_string(),
            slug: id.to_string(),
            name: id.to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(StandardCategory::parse("Performance"), StandardCategory::Performance);
        assert_eq!(StandardCategory::parse("  libraries "), StandardCategory::Libraries);
        assert_eq!(StandardCategory::parse("Shaders"), StandardCategory::Other);
    }

    #[test]
    fn test_heuristic_category() {
        assert_eq!(
            heuristic_category(&with_caps("sodium", &["optimization.client"])),
            StandardCategory::Performance
        );
        assert_eq!(
            heuristic_category(&with_caps("iris", &["shaders.pipeline"])),
            StandardCategory::Graphics
        );
        assert_eq!(
            heuristic_category(&with_caps("fabric-api", &["api.exposed"])),
            StandardCategory::Libraries
        );
        assert_eq!(
            heuristic_category(&with_caps("terralith", &["worldgen.biomes"])),
            StandardCategory::World
        );
        assert_eq!(
            heuristic_category(&with_caps("create", &["technology.machines"])),
            StandardCategory::Gameplay
        );
    }

    #[test]
    fn test_labels_round_trip() {
        for category in [
            StandardCategory::Performance,
            StandardCategory::Graphics,
            StandardCategory::Utility,
            StandardCategory::World,
            StandardCategory::Gameplay,
            StandardCategory::Content,
            StandardCategory::Libraries,
            StandardCategory::Other,
        ] {
            assert_eq!(StandardCategory::parse(category.label()), category);
        }
    }
}
