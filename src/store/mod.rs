//! Mod store layer: read-only catalog queries plus the few writes this
//! service owns (user counters, crash sessions, build records, feedback).
//!
//! The catalog itself (mods, reference modpacks) is produced by an external
//! ingestion job and is never mutated here.

mod rest;
#[doc(hidden)]
pub mod testing;

pub use rest::RestStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Embedding dimension used across the catalog
pub const EMBEDDING_DIM: usize = 384;

/// A mod as stored in the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModRecord {
    /// Unique registry id.
    pub source_id: String,
    /// URL-friendly identifier.
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Loaders the mod runs under. `universal` matches every loader.
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub game_versions: Vec<String>,
    /// Hierarchical semantic tags, e.g. `combat.weapons.melee`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub modrinth_categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<ModDependency>,
    /// Per-loader incompatibility lists: loader -> conflicting source ids.
    #[serde(default)]
    pub incompatibilities: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub followers: u64,
    /// Times users reported the mod as abandoned/broken.
    #[serde(default)]
    pub outdated_reports: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Declared dependency of a mod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModDependency {
    pub project_id: String,
    pub dependency_type: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
}

/// Dependency relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Required,
    Optional,
    Embedded,
    Incompatible,
}

impl ModRecord {
    /// A mod is usable under a loader iff the loader is listed or the mod
    /// is universal.
    pub fn supports_loader(&self, loader: &str) -> bool {
        if self.loaders.is_empty() {
            return true;
        }
        self.loaders
            .iter()
            .any(|l| l.eq_ignore_ascii_case(loader) || l.eq_ignore_ascii_case("universal"))
    }

    /// Game-version compatibility with prefix matching in both directions,
    /// so "1.21.1" satisfies a mod listing "1.21" and vice versa.
    pub fn supports_game_version(&self, version: &str) -> bool {
        if self.game_versions.is_empty() {
            return true;
        }
        self.game_versions
            .iter()
            .any(|v| v == version || version.starts_with(v.as_str()) || v.starts_with(version))
    }

    /// Library detection by capability and tag signals.
    pub fn is_library(&self) -> bool {
        const LIB_CAPS: [&str; 4] = [
            "api.exposed",
            "dependency.library",
            "compatibility.bridge",
            "compatibility.integration",
        ];
        const LIB_TAGS: [&str; 4] = ["library", "api", "dependency", "core-mod"];
        self.capabilities
            .iter()
            .any(|c| LIB_CAPS.contains(&c.as_str()))
            || self.tags.iter().any(|t| LIB_TAGS.contains(&t.as_str()))
    }

    /// Required dependency project ids.
    pub fn required_dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.dependency_type == DependencyKind::Required)
            .map(|d| d.project_id.as_str())
    }

    /// Whether this mod declares an incompatibility with `other` under `loader`.
    pub fn incompatible_with(&self, other_source_id: &str, loader: &str) -> bool {
        let check = |key: &str| {
            self.incompatibilities
                .get(key)
                .is_some_and(|ids| ids.iter().any(|id| id == other_source_id))
        };
        check(loader) || check("universal")
    }
}

/// Validate a capability path (`combat.weapons.melee`).
pub fn is_valid_capability(cap: &str) -> bool {
    let mut segments = cap.split('.');
    let Some(first) = segments.next() else {
        return false;
    };
    let head_ok = !first.is_empty()
        && first
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    head_ok
        && segments.all(|s| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

/// A reference modpack mined by the ingestion job. Read-only input to the
/// architecture planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModpackRecord {
    pub source_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mc_versions: Vec<String>,
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub architecture: Option<ModpackArchitecture>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub followers: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Category structure of a reference modpack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModpackArchitecture {
    #[serde(default)]
    pub categories: Vec<ReferenceCategory>,
}

/// One category inside a reference architecture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceCategory {
    pub name: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub preferred_capabilities: Vec<String>,
    /// capability -> mods providing it in this pack
    #[serde(default)]
    pub providers: HashMap<String, Vec<String>>,
}

/// Subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Test,
    Premium,
    Pro,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Test => write!(f, "test"),
            Tier::Premium => write!(f, "premium"),
            Tier::Pro => write!(f, "pro"),
        }
    }
}

/// Per-user limit overrides; each field overrides the tier default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_requests: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_requests: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mods_per_request: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_token_limit: Option<i64>,
}

/// A user row as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub subscription_tier: Tier,
    #[serde(default)]
    pub daily_requests_used: i64,
    #[serde(default)]
    pub monthly_requests_used: i64,
    #[serde(default)]
    pub ai_tokens_used: i64,
    #[serde(default)]
    pub last_request_date: Option<NaiveDate>,
    #[serde(default)]
    pub custom_limits: Option<CustomLimits>,
}

/// Claims resolved from a verified bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthClaims {
    pub id: String,
    #[serde(default)]
    pub aud: String,
}

/// Append-only record of a completed assembly build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: String,
    pub user_id: String,
    pub prompt: String,
    pub request_type: String,
    pub mc_version: String,
    pub mod_loader: String,
    pub mod_count: usize,
    pub dependency_count: usize,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// User feedback, idempotent by build id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub build_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Filters shared by catalog search operations.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub loader: Option<String>,
    pub game_version: Option<String>,
    pub min_downloads: Option<u64>,
    /// Any-match capability filter.
    pub capabilities_any: Vec<String>,
}

impl SearchFilters {
    /// Post-filter check applied to candidates the store returns.
    pub fn matches(&self, rec: &ModRecord) -> bool {
        if let Some(loader) = &self.loader {
            if !rec.supports_loader(loader) {
                return false;
            }
        }
        if let Some(version) = &self.game_version {
            if !rec.supports_game_version(version) {
                return false;
            }
        }
        if let Some(min) = self.min_downloads {
            if rec.downloads < min {
                return false;
            }
        }
        if !self.capabilities_any.is_empty()
            && !rec
                .capabilities
                .iter()
                .any(|c| self.capabilities_any.iter().any(|f| c == f))
        {
            return false;
        }
        true
    }
}

/// Capability interface over the datastore. Orchestrators receive this as a
/// trait object so tests can supply scripted fakes.
#[async_trait]
pub trait ModStore: Send + Sync {
    async fn get_mod(&self, source_id: &str) -> StoreResult<Option<ModRecord>>;

    /// Batch fetch; implementations must issue a single query.
    async fn get_mods_batch(&self, source_ids: &[String]) -> StoreResult<Vec<ModRecord>>;

    /// Approximate nearest-neighbor search over mod embeddings, ranked by
    /// cosine similarity.
    async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModRecord>>;

    /// Tokenized full-text search, ranked.
    async fn keyword_search(
        &self,
        terms: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModRecord>>;

    /// ANN search over reference-modpack embeddings.
    async fn modpack_vector_search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModpackRecord>>;

    async fn get_user(&self, user_id: &str) -> StoreResult<UserRecord>;

    /// Conditionally reset counters for a new day/month. The update is
    /// guarded by the previously observed `last_request_date` so concurrent
    /// requests racing over midnight cannot both win the reset.
    async fn reset_counters(
        &self,
        user_id: &str,
        observed: &UserRecord,
        today: NaiveDate,
    ) -> StoreResult<UserRecord>;

    /// Increment daily/monthly counters by one and the token counter by
    /// `tokens`. Called only after a terminal `complete`.
    async fn commit_usage(&self, user_id: &str, tokens: u64, today: NaiveDate) -> StoreResult<()>;

    /// Verify a bearer token with the auth backend and return its claims.
    async fn verify_token(&self, bearer: &str) -> StoreResult<AuthClaims>;

    async fn record_crash_session(&self, session: &crate::crash::CrashSession) -> StoreResult<()>;

    async fn record_build(&self, build: &BuildRecord) -> StoreResult<()>;

    /// Idempotent by `build_id`.
    async fn record_feedback(&self, feedback: &FeedbackRecord) -> StoreResult<()>;
}
