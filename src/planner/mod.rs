//! LLM-backed planning stages: request classification (query planner) and
//! themed-pack architecture planning/refinement.

pub mod architecture;
pub mod query;

pub use architecture::{
    ArchitecturePlanner, BaselineMod, PlannedArchitecture, PlannedCategory, RefinedArchitecture,
    RefinedCategory,
};
pub use query::QueryPlanner;

use serde::{Deserialize, Serialize};

/// Classified request kinds, routing the assembly pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    SimpleAdd,
    Performance,
    ThemedPack,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestType::SimpleAdd => write!(f, "simple_add"),
            RequestType::Performance => write!(f, "performance"),
            RequestType::ThemedPack => write!(f, "themed_pack"),
        }
    }
}

/// Search query kinds executed by hybrid retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Keyword,
    Semantic,
}

/// One retrieval query within a search plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub kind: QueryKind,
    pub text: String,
    pub weight: f32,
}

/// Structured plan produced by the query planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub request_type: RequestType,
    pub use_architecture_planner: bool,
    pub search_queries: Vec<SearchQuery>,
    #[serde(default)]
    pub capabilities_focus: Vec<String>,
    #[serde(default)]
    pub baseline_mods: Vec<String>,
    /// Minimum download threshold override for retrieval post-filtering.
    #[serde(default)]
    pub min_downloads: Option<u64>,
}

impl SearchPlan {
    /// Whether the plan routes through the architecture planner.
    pub fn is_themed(&self) -> bool {
        self.request_type == RequestType::ThemedPack
    }
}
