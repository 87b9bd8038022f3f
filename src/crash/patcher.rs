//! Board patching: apply repair operations to a deep copy of the board.
//! Add operations are intent-only and pass through untouched.

use serde::Serialize;
use tracing::debug;

use super::fixes::{find_on_board, Operation};
use crate::board::BoardState;

/// Record of one applied (or skipped) operation.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedOperation {
    pub action: String,
    pub target: String,
    pub applied: bool,
}

/// Patch result: the new board plus an application log.
#[derive(Debug)]
pub struct PatchResult {
    pub board: BoardState,
    pub applied: Vec<AppliedOperation>,
}

/// Apply operations to a clone of `board`. The original is never mutated.
pub fn apply_operations(board: &BoardState, operations: &[Operation]) -> PatchResult {
    let mut patched = board.clone();
    let mut applied = Vec::new();

    for operation in operations {
        match operation {
            Operation::RemoveMod { target, .. } => {
                let unique_id = find_on_board(&patched, target).map(|m| m.unique_id);
                match unique_id {
                    Some(id) => {
                        patched.mods.retain(|m| m.unique_id != id);
                        // Drop dangling cached references to the removed mod.
                        let removed_source = board
                            .mods
                            .iter()
                            .find(|m| m.unique_id == id)
                            .map(|m| m.source_id.clone())
                            .unwrap_or_default();
                        for m in &mut patched.mods {
                            m.cached_dependencies.retain(|d| *d != removed_source);
                        }
                        applied.push(AppliedOperation {
                            action: "remove_mod".into(),
                            target: target.clone(),
                            applied: true,
                        });
                    }
                    None => applied.push(AppliedOperation {
                        action: "remove_mod".into(),
                        target: target.clone(),
                        applied: false,
                    }),
                }
            }

            Operation::DisableMod { target, .. } => {
                let unique_id = find_on_board(&patched, target).map(|m| m.unique_id);
                let mut done = false;
                if let Some(id) = unique_id {
                    if let Some(m) = patched.mods.iter_mut().find(|m| m.unique_id == id) {
                        m.is_disabled = true;
                        done = true;
                    }
                }
                applied.push(AppliedOperation {
                    action: "disable_mod".into(),
                    target: target.clone(),
                    applied: done,
                });
            }

            Operation::UpdateMod {
                target, to_version, ..
            } => {
                let unique_id = find_on_board(&patched, target).map(|m| m.unique_id);
                let mut done = false;
                if let Some(id) = unique_id {
                    if let Some(m) = patched.mods.iter_mut().find(|m| m.unique_id == id) {
                        m.version = Some(to_version.clone());
                        done = true;
                    }
                }
                applied.push(AppliedOperation {
                    action: "update_mod".into(),
                    target: target.clone(),
                    applied: done,
                });
            }

            // Intent-only: surfaced in the response, never applied here.
            Operation::AddMod { target, .. } => applied.push(AppliedOperation {
                action: "add_mod".into(),
                target: target.clone(),
                applied: false,
            }),
            Operation::ClearLoaderCache { .. } => applied.push(AppliedOperation {
                action: "clear_loader_cache".into(),
                target: String::new(),
                applied: false,
            }),
        }
    }

    debug!(
        operations = operations.len(),
        applied = applied.iter().filter(|a| a.applied).count(),
        "board patch complete"
    );
    PatchResult {
        board: patched,
        applied,
    }
}
