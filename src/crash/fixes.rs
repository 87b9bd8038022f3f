//! Fix planning: validate the analyzer's suggestions against the board and
//! the external registry, promoting the survivors to typed operations.
//!
//! Registry lookups are best effort. A suggestion whose target cannot be
//! validated becomes a warning and never blocks the rest of the plan.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::analyzer::{FixAction, FixPriority, SuggestedFix};
use crate::board::BoardState;
use crate::registry::ModRegistry;

/// A validated repair operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Operation {
    RemoveMod {
        target: String,
        reason: String,
        priority: FixPriority,
    },
    DisableMod {
        target: String,
        reason: String,
        priority: FixPriority,
    },
    UpdateMod {
        target: String,
        to_version: String,
        reason: String,
        priority: FixPriority,
    },
    /// Carried as intent; the patcher never fetches binaries.
    AddMod {
        target: String,
        source_id: String,
        version: String,
        reason: String,
        priority: FixPriority,
    },
    ClearLoaderCache {
        reason: String,
        priority: FixPriority,
    },
}

impl Operation {
    pub fn priority(&self) -> FixPriority {
        match self {
            Operation::RemoveMod { priority, .. }
            | Operation::DisableMod { priority, .. }
            | Operation::UpdateMod { priority, .. }
            | Operation::AddMod { priority, .. }
            | Operation::ClearLoaderCache { priority, .. } => *priority,
        }
    }

    fn dedup_key(&self) -> (FixAction, String) {
        match self {
            Operation::RemoveMod { target, .. } => (FixAction::RemoveMod, target.to_lowercase()),
            Operation::DisableMod { target, .. } => (FixAction::DisableMod, target.to_lowercase()),
            Operation::UpdateMod { target, .. } => (FixAction::UpdateMod, target.to_lowercase()),
            Operation::AddMod { target, .. } => (FixAction::AddMod, target.to_lowercase()),
            Operation::ClearLoaderCache { .. } => {
                (FixAction::ClearLoaderCache, String::new())
            }
        }
    }
}

/// Plan output: operations plus warnings for rejected suggestions.
#[derive(Debug, Default)]
pub struct FixPlan {
    pub operations: Vec<Operation>,
    pub warnings: Vec<String>,
}

pub struct FixPlanner {
    registry: Arc<dyn ModRegistry>,
}

impl FixPlanner {
    pub fn new(registry: Arc<dyn ModRegistry>) -> Self {
        Self { registry }
    }

    /// Validate suggestions and produce the operation plan. Registry
    /// lookups for independent suggestions run concurrently under
    /// `limiter`.
    pub async fn plan(
        &self,
        suggestions: &[SuggestedFix],
        board: &BoardState,
        mc_version: &str,
        mod_loader: &str,
        limiter: &Semaphore,
    ) -> FixPlan {
        let futures: Vec<_> = suggestions
            .iter()
            .map(|fix| async move {
                let _permit = limiter.acquire().await.expect("limiter closed");
                self.validate_one(fix, board, mc_version, mod_loader).await
            })
            .collect();

        let mut plan = FixPlan::default();
        let mut seen: HashSet<(FixAction, String)> = HashSet::new();
        for result in join_all(futures).await {
            match result {
                Validated::Operation(op) => {
                    if seen.insert(op.dedup_key()) {
                        plan.operations.push(op);
                    }
                }
                Validated::Warning(w) => plan.warnings.push(w),
            }
        }

        plan.operations.sort_by_key(|op| op.priority());
        debug!(
            operations = plan.operations.len(),
            warnings = plan.warnings.len(),
            "fix plan complete"
        );
        plan
    }

    async fn validate_one(
        &self,
        fix: &SuggestedFix,
        board: &BoardState,
        mc_version: &str,
        mod_loader: &str,
    ) -> Validated {
        let target = fix.target_mod.trim();
        if target.is_empty() && fix.action != FixAction::ClearLoaderCache {
            return Validated::Warning(format!(
                "invalid fix suggestion: {:?} without a target",
                fix.action
            ));
        }

        match fix.action {
            FixAction::ClearLoaderCache => Validated::Operation(Operation::ClearLoaderCache {
                reason: fix.reason.clone(),
                priority: fix.priority,
            }),

            FixAction::RemoveMod | FixAction::DisableMod => {
                if find_on_board(board, target).is_none() {
                    return Validated::Warning(format!(
                        "cannot {} '{}': mod not found on board",
                        action_label(fix.action),
                        target
                    ));
                }
                if fix.action == FixAction::RemoveMod {
                    Validated::Operation(Operation::RemoveMod {
                        target: target.to_string(),
                        reason: fix.reason.clone(),
                        priority: fix.priority,
                    })
                } else {
                    Validated::Operation(Operation::DisableMod {
                        target: target.to_string(),
                        reason: fix.reason.clone(),
                        priority: fix.priority,
                    })
                }
            }

            FixAction::AddMod => {
                match self.registry.find_project(target).await {
                    Ok(Some(project)) => {
                        match self
                            .registry
                            .compatible_version(&project.project_id, mod_loader, mc_version)
                            .await
                        {
                            Ok(Some(version)) => Validated::Operation(Operation::AddMod {
                                target: project.title.clone(),
                                source_id: project.project_id,
                                version: version.version_number,
                                reason: fix.reason.clone(),
                                priority: fix.priority,
                            }),
                            Ok(None) => Validated::Warning(format!(
                                "cannot add '{target}': no version for {mod_loader} {mc_version}"
                            )),
                            Err(e) => registry_warning(target, e),
                        }
                    }
                    Ok(None) => {
                        Validated::Warning(format!("cannot add '{target}': not found in registry"))
                    }
                    Err(e) => registry_warning(target, e),
                }
            }

            FixAction::UpdateMod => {
                let Some(board_mod) = find_on_board(board, target) else {
                    return Validated::Warning(format!(
                        "cannot update '{target}': mod not found on board"
                    ));
                };
                match self
                    .registry
                    .compatible_version(&board_mod.source_id, mod_loader, mc_version)
                    .await
                {
                    Ok(Some(version)) => Validated::Operation(Operation::UpdateMod {
                        target: board_mod.slug.clone(),
                        to_version: version.version_number,
                        reason: fix.reason.clone(),
                        priority: fix.priority,
                    }),
                    Ok(None) => Validated::Warning(format!(
                        "cannot update '{target}': no version for {mod_loader} {mc_version}"
                    )),
                    Err(e) => registry_warning(target, e),
                }
            }
        }
    }
}

enum Validated {
    Operation(Operation),
    Warning(String),
}

fn registry_warning(target: &str, error: crate::error::RegistryError) -> Validated {
    warn!(target, error = %error, "registry validation degraded to warning");
    Validated::Warning(format!("could not validate '{target}': registry unavailable"))
}

fn action_label(action: FixAction) -> &'static str {
    match action {
        FixAction::AddMod => "add",
        FixAction::RemoveMod => "remove",
        FixAction::DisableMod => "disable",
        FixAction::UpdateMod => "update",
        FixAction::ClearLoaderCache => "clear cache for",
    }
}

/// Find a board mod by slug or title, case-insensitive with substring
/// tolerance in both directions.
pub fn find_on_board<'a>(board: &'a BoardState, identifier: &str) -> Option<&'a crate::board::BoardMod> {
    let needle = identifier.to_lowercase();
    board
        .mods
        .iter()
        .find(|m| m.slug.to_lowercase() == needle || m.title.to_lowercase() == needle)
        .or_else(|| {
            board.mods.iter().find(|m| {
                let slug = m.slug.to_lowercase();
                let title = m.title.to_lowercase();
                slug.contains(&needle)
                    || needle.contains(&slug)
                    || title.contains(&needle)
                    || needle.contains(&title)
            })
        })
}
