//! # Packwright
//!
//! An intelligent modpack assembly engine: given a natural-language
//! request, a target game version and a mod loader, it returns a coherent
//! set of mods (with their required dependencies) organized into named,
//! positioned categories for a visual board. A companion crash-analysis
//! engine ingests crash logs plus the current board and produces a
//! structured repair plan and a patched board state.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (axum, SSE) -> Orchestrators -> { Query Planner, Architecture Planner,
//!                                        Hybrid Retrieval (RRF), Final Selector,
//!                                        Dependency Resolver, Loader Policy,
//!                                        Board Assembler, Crash Pipeline }
//!                                   -> { LLM Gateway, Mod Store (PostgREST),
//!                                        Mod Registry, Embedder }
//! ```
//!
//! External effects are capability traits ([`store::ModStore`],
//! [`llm::LlmGateway`], [`registry::ModRegistry`], [`embedding::Embedder`])
//! injected into the orchestrators, so the pipelines are testable with
//! scripted fakes.

/// Deterministic board layout for categorized mods.
pub mod board;
/// Standard categorization and free-form auto-sort.
pub mod categorizer;
/// Configuration management.
pub mod config;
/// Crash-analysis pipeline.
pub mod crash;
/// Text embedding capability.
pub mod embedding;
/// Error types and result aliases.
pub mod error;
/// LLM gateway with structured JSON calls.
pub mod llm;
/// Orchestrators and application context.
pub mod pipeline;
/// Query and architecture planners.
pub mod planner;
/// Cross-loader compatibility policy.
pub mod policy;
/// Progress-event transport.
pub mod progress;
/// System prompts for gateway calls.
pub mod prompts;
/// Quota gate and tier policy.
pub mod quota;
/// External mod registry client.
pub mod registry;
/// Dependency resolution.
pub mod resolver;
/// Hybrid retrieval with RRF fusion.
pub mod search;
/// Mod selection.
pub mod selector;
/// HTTP surface.
pub mod server;
/// Datastore access and domain records.
pub mod store;
/// Per-request pipeline tracing.
pub mod trace;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::AppContext;
