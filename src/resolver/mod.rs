//! Recursive required-dependency resolution with loader/version checks and
//! bidirectional incompatibility detection.
//!
//! Resolution is breadth-first over the `required` dependency graph with a
//! visited set, so dependency cycles terminate. Dependencies never count
//! toward the user's mod cap.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppResult;
use crate::store::{ModRecord, ModStore};

/// A detected incompatibility between two members of the resolved set.
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub a: String,
    pub b: String,
    pub reason: String,
}

/// A required dependency that could not be added.
#[derive(Debug, Clone, Serialize)]
pub struct Unresolved {
    pub source_id: String,
    pub missing_reason: String,
}

/// Output of dependency resolution.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Dependencies pulled in, in discovery order.
    pub added_dependencies: Vec<ModRecord>,
    /// Conflicts are reported, never auto-resolved.
    pub conflicts: Vec<Conflict>,
    pub unresolved: Vec<Unresolved>,
}

impl Resolution {
    pub fn added_ids(&self) -> Vec<String> {
        self.added_dependencies
            .iter()
            .map(|m| m.source_id.clone())
            .collect()
    }
}

/// Resolves the required-dependency closure for a selection.
pub struct DependencyResolver {
    store: Arc<dyn ModStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn ModStore>) -> Self {
        Self { store }
    }

    /// Compute the closure of `required` dependencies for `selection` under
    /// the target loader and game version.
    pub async fn resolve(
        &self,
        selection: &[ModRecord],
        loader: &str,
        game_version: &str,
    ) -> AppResult<Resolution> {
        let mut resolution = Resolution::default();
        let mut visited: HashSet<String> = selection
            .iter()
            .map(|m| m.source_id.clone())
            .collect();

        // Conflicts within the selection itself are surfaced up front.
        report_pairwise_conflicts(selection, loader, &mut resolution.conflicts);

        let mut frontier: Vec<(String, String)> = Vec::new();
        for mod_record in selection {
            for dep_id in mod_record.required_dependency_ids() {
                if visited.insert(dep_id.to_string()) {
                    frontier.push((dep_id.to_string(), mod_record.name.clone()));
                }
            }
        }

        let mut members: Vec<ModRecord> = selection.to_vec();

        while !frontier.is_empty() {
            let ids: Vec<String> = frontier.iter().map(|(id, _)| id.clone()).collect();
            debug!(count = ids.len(), "fetching dependency batch");
            let fetched = self.store.get_mods_batch(&ids).await?;

            let mut next_frontier = Vec::new();
            for (dep_id, needed_by) in frontier {
                let Some(dep) = fetched.iter().find(|m| m.source_id == dep_id) else {
                    resolution.unresolved.push(Unresolved {
                        source_id: dep_id,
                        missing_reason: format!("not in catalog (required by {needed_by})"),
                    });
                    continue;
                };

                if !dep.supports_loader(loader) {
                    resolution.unresolved.push(Unresolved {
                        source_id: dep_id,
                        missing_reason: format!(
                            "not available for {loader} (only for: {})",
                            dep.loaders.join(", ")
                        ),
                    });
                    continue;
                }
                if !dep.supports_game_version(game_version) {
                    resolution.unresolved.push(Unresolved {
                        source_id: dep_id,
                        missing_reason: format!("no build for Minecraft {game_version}"),
                    });
                    continue;
                }

                if let Some(conflict) = find_conflict(dep, &members, loader) {
                    resolution.unresolved.push(Unresolved {
                        source_id: dep_id.clone(),
                        missing_reason: format!("incompatible with {}", conflict.b),
                    });
                    resolution.conflicts.push(conflict);
                    continue;
                }

                for next_id in dep.required_dependency_ids() {
                    if visited.insert(next_id.to_string()) {
                        next_frontier.push((next_id.to_string(), dep.name.clone()));
                    }
                }
                members.push(dep.clone());
                resolution.added_dependencies.push(dep.clone());
            }
            frontier = next_frontier;
        }

        info!(
            selected = selection.len(),
            added = resolution.added_dependencies.len(),
            conflicts = resolution.conflicts.len(),
            unresolved = resolution.unresolved.len(),
            "dependency resolution complete"
        );
        Ok(resolution)
    }
}

/// Bidirectional incompatibility check of `candidate` against `members`.
fn find_conflict(candidate: &ModRecord, members: &[ModRecord], loader: &str) -> Option<Conflict> {
    for member in members {
        if candidate.incompatible_with(&member.source_id, loader)
            || member.incompatible_with(&candidate.source_id, loader)
        {
            return Some(Conflict {
                a: candidate.source_id.clone(),
                b: member.source_id.clone(),
                reason: format!(
                    "{} and {} are incompatible on {loader}",
                    candidate.name, member.name
                ),
            });
        }
    }
    None
}

/// Report every conflicting pair within a set, each pair once.
fn report_pairwise_conflicts(members: &[ModRecord], loader: &str, out: &mut Vec<Conflict>) {
    for (i, a) in members.iter().enumerate() {
        for b in members.iter().skip(i + 1) {
            if a.incompatible_with(&b.source_id, loader) || b.incompatible_with(&a.source_id, loader)
            {
                out.push(Conflict {
                    a: a.source_id.clone(),
                    b: b.source_id.clone(),
                    reason: format!("{} and {} are incompatible on {loader}", a.name, b.name),
                });
            }
        }
    }
}
