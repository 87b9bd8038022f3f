//! End-to-end assembly pipeline tests with scripted capabilities.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{catalog_mod, test_config, FixedEmbedder, ScriptedGateway, ScriptedRegistry};
use packwright::pipeline::{AppContext, BuildRequest};
use packwright::progress::ProgressSender;
use packwright::store::testing::StubStore;
use packwright::store::{ModRecord, ModStore};
use packwright::trace::PipelineTrace;

fn build_request(prompt: &str, loader: &str, mc_version: &str, max_mods: u32) -> BuildRequest {
    BuildRequest {
        prompt: prompt.to_string(),
        mc_version: mc_version.to_string(),
        mod_loader: loader.to_string(),
        max_mods,
        current_mods: Vec::new(),
        project_id: None,
        fabric_compat_mode: false,
        use_v3_architecture: None,
    }
}

fn context(store: StubStore, gateway: ScriptedGateway) -> AppContext {
    AppContext::new(
        test_config(),
        Arc::new(store),
        Arc::new(gateway),
        Arc::new(FixedEmbedder),
        Arc::new(ScriptedRegistry { known: Vec::new() }),
    )
}

fn simple_plan_response() -> serde_json::Value {
    json!({
        "request_type": "simple_add",
        "use_architecture_planner": false,
        "search_queries": [
            {"kind": "keyword", "text": "sodium lithium", "weight": 1.0},
            {"kind": "keyword", "text": "sodium", "weight": 0.6},
            {"kind": "semantic", "text": "performance optimization", "weight": 0.4}
        ],
        "capabilities_focus": [],
        "baseline_mods": [],
        "min_downloads": 1000
    })
}

/// Simple add on Fabric 1.21.1: both requested mods selected, the shared
/// dependency resolved, everything under Performance and Libraries.
#[tokio::test]
async fn test_simple_add_flow() {
    let sodium = catalog_mod(
        "sodium",
        "Sodium",
        &["fabric"],
        &["1.21.1"],
        &["optimization.client"],
        9_000_000,
        &["fabric-api"],
    );
    let lithium = catalog_mod(
        "lithium",
        "Lithium",
        &["fabric"],
        &["1.21.1"],
        &["optimization.server"],
        5_000_000,
        &["fabric-api"],
    );
    let fabric_api = catalog_mod(
        "fabric-api",
        "Fabric API",
        &["fabric"],
        &["1.21.1"],
        &["api.exposed"],
        30_000_000,
        &[],
    );

    let store = StubStore {
        // fabric-api lives in the catalog for dependency resolution but is
        // not a retrieval hit.
        mods: vec![fabric_api],
        keyword_hits: vec![sodium.clone(), lithium.clone()],
        vector_hits: vec![sodium, lithium],
        ..Default::default()
    };

    let gateway = ScriptedGateway::new()
        .script("query_planner", simple_plan_response())
        .script(
            "final_selector",
            json!({
                "selections": [
                    {"source_id": "sodium", "category_index": null, "reason": "requested by name", "role": "primary"},
                    {"source_id": "lithium", "category_index": null, "reason": "requested by name", "role": "primary"}
                ]
            }),
        )
        .script(
            "categorizer",
            json!({
                "assignments": [
                    {"source_id": "sodium", "category": "Performance"},
                    {"source_id": "lithium", "category": "Performance"}
                ]
            }),
        );

    let ctx = context(store, gateway);
    let pipeline = ctx.assembly_pipeline();
    let (mut progress, mut rx) = ProgressSender::channel(64);
    let mut trace = PipelineTrace::new("test-s1");

    let outcome = pipeline
        .run(
            "user-1",
            &build_request("add sodium and lithium", "fabric", "1.21.1", 15),
            &mut progress,
            &mut trace,
        )
        .await
        .expect("pipeline should succeed");

    // Both requested mods plus the resolved dependency are on the board.
    let board_ids: Vec<&str> = outcome
        .board_state
        .mods
        .iter()
        .map(|m| m.source_id.as_str())
        .collect();
    assert!(board_ids.contains(&"sodium"));
    assert!(board_ids.contains(&"lithium"));
    assert!(board_ids.contains(&"fabric-api"));

    // No duplicate selections.
    let mut unique = board_ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), board_ids.len());

    // Categories: Performance and Libraries.
    let titles: Vec<&str> = outcome
        .board_state
        .categories
        .iter()
        .map(|c| c.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Performance", "Libraries"]);

    // Every board mod references an existing category.
    for board_mod in &outcome.board_state.mods {
        assert!(outcome
            .board_state
            .categories
            .iter()
            .any(|c| c.id == board_mod.category_id));
    }

    // Every required dependency of a board mod is present on the board.
    for board_mod in &outcome.board_state.mods {
        for dep in &board_mod.cached_dependencies {
            assert!(board_ids.contains(&dep.as_str()));
        }
    }

    assert_eq!(outcome.stats.dependencies_added, 1);
    assert_eq!(outcome.stats.request_type, "simple_add");
    assert!(trace.total_tokens() > 0);

    // Stage events were emitted in order, no terminal from the pipeline.
    drop(progress);
    let mut stages = Vec::new();
    while let Some(event) = rx.recv().await {
        stages.push(event.to_json()["data"]["name"].as_str().unwrap().to_string());
    }
    assert_eq!(stages.first().map(String::as_str), Some("planning"));
    assert_eq!(stages.last().map(String::as_str), Some("board"));
}

/// Themed flow on NeoForge: architecture planned and refined, and the
/// Fabric API never survives to the board.
#[tokio::test]
async fn test_themed_flow_excludes_fabric_api_on_neoforge() {
    let caps = [
        "magic.spellcasting",
        "combat.weapons",
        "worldgen.structures",
        "adventure.quests",
        "technology.machines",
    ];
    let mut hits: Vec<ModRecord> = (0..8)
        .map(|i| {
            catalog_mod(
                &format!("medieval{i}"),
                &format!("Medieval {i}"),
                &["neoforge"],
                &["1.20.1"],
                &[caps[i % caps.len()]],
                100_000 + i as u64,
                &[],
            )
        })
        .collect();
    // Poisoned catalog row: Fabric API claiming NeoForge support. Policy
    // must still forbid it.
    hits.push(catalog_mod(
        "fabric-api",
        "Fabric API",
        &["fabric", "neoforge"],
        &["1.20.1"],
        &["api.exposed"],
        30_000_000,
        &[],
    ));
    // Performance and graphics picks must land in their dedicated
    // categories, not an arbitrary gameplay bucket.
    hits.push(catalog_mod(
        "embeddium",
        "Embeddium",
        &["neoforge"],
        &["1.20.1"],
        &["optimization.client"],
        9_000_000,
        &[],
    ));
    hits.push(catalog_mod(
        "oculus",
        "Oculus",
        &["neoforge"],
        &["1.20.1"],
        &["shaders.pipeline"],
        2_000_000,
        &[],
    ));

    let reference = serde_json::from_value::<packwright::store::ModpackRecord>(json!({
        "source_id": "ref-1",
        "title": "Medieval Legends",
        "loaders": ["neoforge"],
        "mc_versions": ["1.20.1"],
        "downloads": 500_000,
        "architecture": {
            "categories": [{
                "name": "Magic",
                "required_capabilities": ["magic.spellcasting"],
                "preferred_capabilities": [],
                "providers": {"magic.spellcasting": ["medieval0"]}
            }]
        }
    }))
    .unwrap();

    let store = StubStore {
        vector_hits: hits.clone(),
        keyword_hits: hits,
        modpacks: vec![reference],
        ..Default::default()
    };

    let selections: Vec<serde_json::Value> = (0..8)
        .map(|i| {
            json!({
                "source_id": format!("medieval{i}"),
                "category_index": i % 5,
                "reason": "fits the theme",
                "role": "primary"
            })
        })
        .chain([
            json!({
                "source_id": "fabric-api",
                "category_index": null,
                "reason": "api",
                "role": "library"
            }),
            json!({
                "source_id": "embeddium",
                "category_index": null,
                "reason": "keeps the pack smooth",
                "role": "primary"
            }),
            json!({
                "source_id": "oculus",
                "category_index": null,
                "reason": "shader support",
                "role": "primary"
            }),
        ])
        .collect();

    let assignments: Vec<serde_json::Value> = (0..8)
        .map(|i| json!({"source_id": format!("medieval{i}"), "category_index": i % 2}))
        .collect();

    let gateway = ScriptedGateway::new()
        .script(
            "query_planner",
            json!({
                "request_type": "themed_pack",
                "use_architecture_planner": true,
                "search_queries": [
                    {"kind": "semantic", "text": "medieval fantasy castles magic", "weight": 0.8},
                    {"kind": "semantic", "text": "knights adventure", "weight": 0.5},
                    {"kind": "keyword", "text": "medieval", "weight": 0.4}
                ],
                "capabilities_focus": [],
                "baseline_mods": [],
                "min_downloads": 1000
            }),
        )
        .script(
            "architecture_plan",
            json!({
                "pack_archetype": "medieval-fantasy",
                "estimated_total_mods": 20,
                "categories": [
                    {"name": "Magic", "description": "", "required_capabilities": ["magic.spellcasting"], "preferred_capabilities": [], "target_mods": 4},
                    {"name": "Combat", "description": "", "required_capabilities": ["combat.weapons"], "preferred_capabilities": [], "target_mods": 4},
                    {"name": "World", "description": "", "required_capabilities": ["worldgen.structures"], "preferred_capabilities": [], "target_mods": 4},
                    {"name": "Adventure", "description": "", "required_capabilities": ["adventure.quests"], "preferred_capabilities": [], "target_mods": 4},
                    {"name": "Tech", "description": "", "required_capabilities": ["technology.machines"], "preferred_capabilities": [], "target_mods": 4}
                ]
            }),
        )
        .script("final_selector", json!({ "selections": selections }))
        .script(
            "architecture_refine",
            json!({
                "categories": [
                    {"name": "Castle Life", "description": "", "capabilities": ["magic.spellcasting", "combat.weapons"]},
                    {"name": "Realm Building", "description": "", "capabilities": ["worldgen.structures", "adventure.quests", "technology.machines"]}
                ],
                "assignments": assignments
            }),
        );

    let ctx = context(store, gateway);
    let pipeline = ctx.assembly_pipeline();
    let (mut progress, _rx) = ProgressSender::channel(64);
    let mut trace = PipelineTrace::new("test-s2");

    let mut request = build_request(
        "medieval fantasy with castles and magic",
        "neoforge",
        "1.20.1",
        20,
    );
    request.use_v3_architecture = Some(true);

    let outcome = pipeline
        .run("user-2", &request, &mut progress, &mut trace)
        .await
        .expect("themed pipeline should succeed");

    // Fabric API never appears on a NeoForge board.
    assert!(outcome
        .board_state
        .mods
        .iter()
        .all(|m| m.slug != "fabric-api"));
    assert!(outcome.warnings.iter().any(|w| w.contains("fabric-api")));

    assert_eq!(outcome.stats.request_type, "themed_pack");
    assert_eq!(outcome.board_state.mods.len(), 10);

    // The classification ladder gives performance and graphics mods their
    // own categories instead of a gameplay bucket.
    let find_category = |title: &str| {
        outcome
            .board_state
            .categories
            .iter()
            .find(|c| c.title == title)
            .unwrap_or_else(|| panic!("missing category {title}"))
    };
    let performance = find_category("Performance");
    let graphics = find_category("Graphics & Shaders");

    let embeddium = outcome
        .board_state
        .mods
        .iter()
        .find(|m| m.slug == "embeddium")
        .expect("embeddium on board");
    assert_eq!(embeddium.category_id, performance.id);

    let oculus = outcome
        .board_state
        .mods
        .iter()
        .find(|m| m.slug == "oculus")
        .expect("oculus on board");
    assert_eq!(oculus.category_id, graphics.id);

    // The gameplay categories from the refine draft hold only gameplay mods.
    for title in ["Castle Life", "Realm Building"] {
        let category = find_category(title);
        let members: Vec<&str> = outcome
            .board_state
            .mods
            .iter()
            .filter(|m| m.category_id == category.id)
            .map(|m| m.slug.as_str())
            .collect();
        assert!(members.iter().all(|slug| slug.starts_with("medieval")));
    }

    // Four gateway calls: plan, architecture, selection, refine.
    assert_eq!(trace.llm_calls.len(), 4);
}

/// Retrieval coming up empty is not fatal: an empty board with a warning.
#[tokio::test]
async fn test_no_candidates_returns_empty_outcome() {
    let store = StubStore::default();
    let gateway = ScriptedGateway::new().script("query_planner", simple_plan_response());

    let ctx = context(store, gateway);
    let pipeline = ctx.assembly_pipeline();
    let (mut progress, _rx) = ProgressSender::channel(64);
    let mut trace = PipelineTrace::new("test-empty");

    let outcome = pipeline
        .run(
            "user-3",
            &build_request("add some nonexistent mod", "fabric", "1.21.1", 10),
            &mut progress,
            &mut trace,
        )
        .await
        .expect("empty retrieval should not error");

    assert!(outcome.board_state.mods.is_empty());
    assert_eq!(outcome.warnings, vec!["no_candidates".to_string()]);
}

/// A dropped progress receiver (client disconnect) cancels the pipeline.
#[tokio::test]
async fn test_client_disconnect_cancels_pipeline() {
    let sodium = catalog_mod(
        "sodium",
        "Sodium",
        &["fabric"],
        &["1.21.1"],
        &["optimization.client"],
        9_000_000,
        &[],
    );
    let store = StubStore {
        keyword_hits: vec![sodium.clone()],
        vector_hits: vec![sodium],
        ..Default::default()
    };
    let gateway = ScriptedGateway::new().script("query_planner", simple_plan_response());

    let ctx = context(store, gateway);
    let pipeline = ctx.assembly_pipeline();
    let (mut progress, rx) = ProgressSender::channel(1);
    drop(rx);
    let mut trace = PipelineTrace::new("test-cancel");

    let result = pipeline
        .run(
            "user-4",
            &build_request("add sodium", "fabric", "1.21.1", 5),
            &mut progress,
            &mut trace,
        )
        .await;
    assert!(matches!(result, Err(packwright::AppError::Cancelled)));
}

/// Invalid requests are rejected before any gateway call.
#[tokio::test]
async fn test_invalid_request_rejected_without_llm_call() {
    let store = StubStore::default();
    let gateway = ScriptedGateway::new();

    let ctx = context(store, gateway);
    let pipeline = ctx.assembly_pipeline();
    let (mut progress, _rx) = ProgressSender::channel(8);
    let mut trace = PipelineTrace::new("test-invalid");

    let result = pipeline
        .run(
            "user-5",
            &build_request("anything", "bukkit", "1.21.1", 10),
            &mut progress,
            &mut trace,
        )
        .await;
    assert!(matches!(
        result,
        Err(packwright::AppError::InvalidRequest { .. })
    ));
    assert_eq!(trace.llm_calls.len(), 0);
}

/// Builds are recorded to the store on success.
#[tokio::test]
async fn test_build_recorded() {
    let sodium = catalog_mod(
        "sodium",
        "Sodium",
        &["fabric"],
        &["1.21.1"],
        &["optimization.client"],
        9_000_000,
        &[],
    );
    let store = Arc::new(StubStore {
        keyword_hits: vec![sodium.clone()],
        vector_hits: vec![sodium],
        ..Default::default()
    });

    let gateway = ScriptedGateway::new()
        .script("query_planner", simple_plan_response())
        .script(
            "final_selector",
            json!({
                "selections": [
                    {"source_id": "sodium", "category_index": null, "reason": "requested", "role": "primary"}
                ]
            }),
        )
        .script(
            "categorizer",
            json!({
                "assignments": [{"source_id": "sodium", "category": "Performance"}]
            }),
        );

    let ctx = AppContext::new(
        test_config(),
        Arc::clone(&store) as Arc<dyn ModStore>,
        Arc::new(gateway),
        Arc::new(FixedEmbedder),
        Arc::new(ScriptedRegistry { known: Vec::new() }),
    );
    let pipeline = ctx.assembly_pipeline();
    let (mut progress, _rx) = ProgressSender::channel(64);
    let mut trace = PipelineTrace::new("test-record");

    let outcome = pipeline
        .run(
            "user-6",
            &build_request("add sodium", "fabric", "1.21.1", 5),
            &mut progress,
            &mut trace,
        )
        .await
        .unwrap();

    let builds = store.recorded_builds.lock().unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].id, outcome.build_id);
    assert_eq!(builds[0].user_id, "user-6");
    assert_eq!(builds[0].mod_count, outcome.board_state.mods.len());
}
