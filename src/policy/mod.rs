//! Cross-loader compatibility policy.
//!
//! The rules are data, not code: a bridge-mod table keyed by target loader
//! and a renderer-equivalents table keyed by (loader, version prefix).
//! Applied after dependency closure; bridge mods themselves go back through
//! the resolver.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::AppResult;
use crate::store::{ModRecord, ModStore};

/// Fabric's loader API. Never valid on Forge/NeoForge, compat mode or not.
pub const FABRIC_API_SLUG: &str = "fabric-api";

/// Bridge mods appended to Fabric packs carrying Forge/NeoForge mods.
const FABRIC_COMPAT_BRIDGES: [BridgeEntry; 2] = [
    BridgeEntry {
        source_id: "u58R1TMW",
        slug: "connector",
        reason: "runs Forge/NeoForge mods on Fabric",
    },
    BridgeEntry {
        source_id: "Aqlf1Shp",
        slug: "forgified-fabric-api",
        reason: "Fabric API surface for bridged mods",
    },
];

/// Rendering-optimizer equivalents per loader/version family.
const RENDERER_EQUIVALENTS: [RendererEntry; 5] = [
    RendererEntry {
        loader: "fabric",
        version_prefix: "",
        slug: "sodium",
    },
    RendererEntry {
        loader: "quilt",
        version_prefix: "",
        slug: "sodium",
    },
    RendererEntry {
        loader: "neoforge",
        version_prefix: "1.21",
        slug: "sodium",
    },
    RendererEntry {
        loader: "neoforge",
        version_prefix: "1.20",
        slug: "embeddium",
    },
    RendererEntry {
        loader: "forge",
        version_prefix: "",
        slug: "embeddium",
    },
];

#[derive(Debug, Clone, Copy)]
struct BridgeEntry {
    source_id: &'static str,
    slug: &'static str,
    reason: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct RendererEntry {
    loader: &'static str,
    version_prefix: &'static str,
    slug: &'static str,
}

/// A mod removed by policy, with the rule that removed it.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRemoval {
    pub source_id: String,
    pub slug: String,
    pub reason: String,
}

/// Result of applying loader-bridge rules.
#[derive(Debug, Default)]
pub struct PolicyOutcome {
    pub removed: Vec<PolicyRemoval>,
    /// Bridge mods to append with role `bridge`; still need resolution.
    pub bridges: Vec<ModRecord>,
}

/// Applies the cross-loader rule tables.
pub struct LoaderBridgePolicy {
    store: Arc<dyn ModStore>,
}

impl LoaderBridgePolicy {
    pub fn new(store: Arc<dyn ModStore>) -> Self {
        Self { store }
    }

    /// Enforce loader rules on `members` in place and compute the bridge
    /// set. `fabric_compat_mode` only has meaning on a Fabric target.
    pub async fn apply(
        &self,
        members: &mut Vec<ModRecord>,
        loader: &str,
        _game_version: &str,
        fabric_compat_mode: bool,
    ) -> AppResult<PolicyOutcome> {
        let mut outcome = PolicyOutcome::default();
        let loader_lc = loader.to_lowercase();

        if loader_lc == "forge" || loader_lc == "neoforge" {
            members.retain(|m| {
                if m.slug == FABRIC_API_SLUG {
                    outcome.removed.push(PolicyRemoval {
                        source_id: m.source_id.clone(),
                        slug: m.slug.clone(),
                        reason: format!("Fabric API cannot run on {loader}"),
                    });
                    false
                } else {
                    true
                }
            });
        }

        if loader_lc == "fabric" {
            let alien: Vec<String> = members
                .iter()
                .filter(|m| is_forge_family_exclusive(m))
                .map(|m| m.source_id.clone())
                .collect();

            if !alien.is_empty() {
                if fabric_compat_mode {
                    let bridge_ids: Vec<String> = FABRIC_COMPAT_BRIDGES
                        .iter()
                        .map(|b| b.source_id.to_string())
                        .collect();
                    let fetched = self.store.get_mods_batch(&bridge_ids).await?;
                    for entry in FABRIC_COMPAT_BRIDGES {
                        if members.iter().any(|m| m.slug == entry.slug)
                            || outcome.bridges.iter().any(|m| m.slug == entry.slug)
                        {
                            continue;
                        }
                        if let Some(bridge) =
                            fetched.iter().find(|m| m.source_id == entry.source_id)
                        {
                            info!(bridge = entry.slug, reason = entry.reason, "appending bridge mod");
                            outcome.bridges.push(bridge.clone());
                        }
                    }
                } else {
                    members.retain(|m| {
                        if alien.contains(&m.source_id) {
                            outcome.removed.push(PolicyRemoval {
                                source_id: m.source_id.clone(),
                                slug: m.slug.clone(),
                                reason: "Forge/NeoForge mod on a Fabric pack without compatibility mode"
                                    .to_string(),
                            });
                            false
                        } else {
                            true
                        }
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Preferred rendering optimizer for the target, from the equivalents
    /// table. First match wins; an empty version prefix matches everything.
    pub fn preferred_renderer(loader: &str, game_version: &str) -> Option<&'static str> {
        let loader_lc = loader.to_lowercase();
        RENDERER_EQUIVALENTS
            .iter()
            .find(|e| e.loader == loader_lc && game_version.starts_with(e.version_prefix))
            .map(|e| e.slug)
    }
}

/// Runs only under the Forge family: lists forge/neoforge but neither
/// fabric, quilt, nor universal.
fn is_forge_family_exclusive(m: &ModRecord) -> bool {
    if m.loaders.is_empty() {
        return false;
    }
    let has = |l: &str| m.loaders.iter().any(|x| x.eq_ignore_ascii_case(l));
    (has("forge") || has("neoforge")) && !has("fabric") && !has("quilt") && !has("universal")
}
