//! LLM crash diagnosis. The gateway returns a typed analysis; raw model
//! JSON never leaves this module.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::sanitizer::SanitizedLog;
use crate::board::BoardState;
use crate::error::AppResult;
use crate::llm::{call_structured, LlmCall, LlmGateway, LlmOutcome};
use crate::prompts::CRASH_ANALYZER_PROMPT;

/// Crash error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashErrorKind {
    ModConflict,
    MissingDependency,
    OutdatedMod,
    MixinError,
    ClassNotFound,
    FabricOnForge,
    Memory,
    Unknown,
}

/// Fix actions the analyzer may suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    AddMod,
    RemoveMod,
    DisableMod,
    UpdateMod,
    ClearLoaderCache,
}

/// Fix urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPriority {
    Critical,
    High,
    Normal,
    Low,
}

/// A mod the analysis blames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblematicMod {
    pub name: String,
    pub reason: String,
}

/// One raw fix suggestion, pre-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub action: FixAction,
    pub target_mod: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_priority")]
    pub priority: FixPriority,
}

fn default_priority() -> FixPriority {
    FixPriority::Normal
}

/// Structured diagnosis of a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashAnalysis {
    pub root_cause: String,
    pub error_kind: CrashErrorKind,
    pub confidence: f64,
    #[serde(default)]
    pub problematic_mods: Vec<ProblematicMod>,
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
}

pub struct CrashAnalyzer {
    gateway: Arc<dyn LlmGateway>,
}

impl CrashAnalyzer {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Diagnose a sanitized crash log against the current board.
    pub async fn analyze(
        &self,
        log: &SanitizedLog,
        game_log: Option<&str>,
        board: &BoardState,
        mc_version: &str,
        mod_loader: &str,
    ) -> AppResult<LlmOutcome<CrashAnalysis>> {
        let board_mods = board
            .mods
            .iter()
            .map(|m| {
                format!(
                    "- {} ({}){}",
                    m.slug,
                    m.title,
                    if m.is_disabled { " [disabled]" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let extracted = serde_json::to_string(&log.extracted).unwrap_or_default();
        let game_log_block = game_log
            .map(|g| format!("\n\nGAME LOG (tail):\n{g}"))
            .unwrap_or_default();

        let user = format!(
            "Minecraft version: {mc_version}\n\
             Mod loader: {mod_loader}\n\n\
             MODS ON BOARD ({count}):\n{board_mods}\n\n\
             EXTRACTED SIGNALS:\n{extracted}\n\n\
             CRASH LOG (sanitized):\n{log_text}{game_log_block}",
            count = board.mods.len(),
            log_text = log.text,
        );

        let call = LlmCall::new("crash_analyzer", CRASH_ANALYZER_PROMPT, user)
            .with_temperature(0.1)
            .with_max_tokens(3_000);

        let outcome: LlmOutcome<CrashAnalysis> =
            call_structured(self.gateway.as_ref(), call).await?;

        let mut analysis = outcome.value;
        analysis.confidence = analysis.confidence.clamp(0.0, 1.0);

        info!(
            error_kind = ?analysis.error_kind,
            confidence = analysis.confidence,
            fixes = analysis.suggested_fixes.len(),
            "crash analysis complete"
        );

        Ok(LlmOutcome {
            value: analysis,
            usage: outcome.usage,
            cost_usd: outcome.cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serde() {
        let kind: CrashErrorKind = serde_json::from_str("\"missing_dependency\"").unwrap();
        assert_eq!(kind, CrashErrorKind::MissingDependency);
        assert_eq!(
            serde_json::to_string(&CrashErrorKind::FabricOnForge).unwrap(),
            "\"fabric_on_forge\""
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(FixPriority::Critical < FixPriority::High);
        assert!(FixPriority::High < FixPriority::Normal);
        assert!(FixPriority::Normal < FixPriority::Low);
    }

    #[test]
    fn test_analysis_deserializes_model_shape() {
        let json = serde_json::json!({
            "root_cause": "fabric-api is missing",
            "error_kind": "missing_dependency",
            "confidence": 1.4,
            "problematic_mods": [{"name": "sodium", "reason": "requires fabric-api"}],
            "suggested_fixes": [
                {"action": "add_mod", "target_mod": "fabric-api", "reason": "required", "priority": "critical"}
            ]
        });
        let analysis: CrashAnalysis = serde_json::from_value(json).unwrap();
        assert_eq!(analysis.error_kind, CrashErrorKind::MissingDependency);
        assert_eq!(analysis.suggested_fixes[0].action, FixAction::AddMod);
        assert_eq!(analysis.suggested_fixes[0].priority, FixPriority::Critical);
    }

    #[test]
    fn test_missing_priority_defaults_to_normal() {
        let json = serde_json::json!({
            "action": "remove_mod",
            "target_mod": "optifine",
            "reason": "conflicts"
        });
        let fix: SuggestedFix = serde_json::from_value(json).unwrap();
        assert_eq!(fix.priority, FixPriority::Normal);
    }
}
