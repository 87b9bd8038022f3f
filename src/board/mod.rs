//! Board assembly: deterministic layout of categorized mods onto the
//! authoring canvas. Everything except the freshly generated UUIDs is a
//! pure function of the input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grid column pitch for category placement.
const CATEGORY_COLUMN_WIDTH: f64 = 340.0;
/// Vertical cell pitch for mods inside a category.
const MOD_ROW_PITCH: f64 = 60.0;
const CATEGORIES_PER_ROW: usize = 4;
const START_X: f64 = 100.0;
const START_Y: f64 = 100.0;
const CATEGORY_HEADER: f64 = 40.0;
const CATEGORY_PADDING: f64 = 8.0;
const CATEGORY_WIDTH: f64 = 255.0;
const ROW_GAP: f64 = 100.0;

/// Category accent colors, keyed by lowercased title keywords.
const CATEGORY_COLORS: [(&str, &str); 12] = [
    ("performance", "#22c55e"),
    ("librar", "#3b82f6"),
    ("api", "#3b82f6"),
    ("utilit", "#f59e0b"),
    ("graphic", "#ec4899"),
    ("world", "#10b981"),
    ("gameplay", "#8b5cf6"),
    ("combat", "#ef4444"),
    ("tech", "#06b6d4"),
    ("magic", "#a855f7"),
    ("food", "#84cc16"),
    ("compat", "#ff9500"),
];
const DEFAULT_COLOR: &str = "#6b7280";

/// 2D position on the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Viewport of the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Camera {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// A mod placed on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardMod {
    pub source_id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub unique_id: Uuid,
    pub position: Position,
    pub category_id: Uuid,
    /// Slot within the category, unique per category.
    pub category_index: usize,
    #[serde(default)]
    pub is_disabled: bool,
    /// Version metadata, bumped by crash-fix updates.
    #[serde(default)]
    pub version: Option<String>,
    /// Resolved dependency ids present on this board.
    #[serde(default)]
    pub cached_dependencies: Vec<String>,
}

/// A category rectangle on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardCategory {
    pub id: Uuid,
    pub title: String,
    pub position: Position,
    pub color: String,
    pub width: f64,
    pub height: f64,
}

/// The serializable authoring canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardState {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub camera: Camera,
    pub mods: Vec<BoardMod>,
    pub categories: Vec<BoardCategory>,
    pub updated_at: DateTime<Utc>,
}

/// Assembly input: one category with its members, in placement order.
#[derive(Debug, Clone)]
pub struct CategoryInput {
    pub title: String,
    pub mods: Vec<ModInput>,
}

/// Assembly input: one mod.
#[derive(Debug, Clone)]
pub struct ModInput {
    pub source_id: String,
    pub slug: String,
    pub title: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
    /// Required dependency ids declared by the mod.
    pub required_dependencies: Vec<String>,
}

/// Assemble a board with random UUIDs.
pub fn assemble(
    categories: Vec<CategoryInput>,
    project_id: Option<String>,
    now: DateTime<Utc>,
) -> BoardState {
    assemble_with(categories, project_id, now, &mut |_| Uuid::new_v4())
}

/// Assemble a board with an injected id generator, making layout fully
/// reproducible in tests. The generator receives a running counter.
pub fn assemble_with(
    categories: Vec<CategoryInput>,
    project_id: Option<String>,
    now: DateTime<Utc>,
    id_gen: &mut dyn FnMut(usize) -> Uuid,
) -> BoardState {
    let mut id_counter = 0usize;
    let mut next_id = move |gen: &mut dyn FnMut(usize) -> Uuid| {
        let id = gen(id_counter);
        id_counter += 1;
        id
    };

    let board_ids: std::collections::HashSet<String> = categories
        .iter()
        .flat_map(|c| c.mods.iter().map(|m| m.source_id.clone()))
        .collect();

    let mut board_categories = Vec::new();
    let mut board_mods = Vec::new();

    let mut row_y = START_Y;
    let mut row_max_height = 0.0f64;

    for (index, category) in categories.into_iter().enumerate() {
        let column = index % CATEGORIES_PER_ROW;
        if column == 0 && index > 0 {
            row_y += row_max_height + ROW_GAP;
            row_max_height = 0.0;
        }

        let height = CATEGORY_HEADER
            + category.mods.len() as f64 * MOD_ROW_PITCH
            + 2.0 * CATEGORY_PADDING;
        row_max_height = row_max_height.max(height);

        let position = Position {
            x: START_X + column as f64 * CATEGORY_COLUMN_WIDTH,
            y: row_y,
        };
        let category_id = next_id(id_gen);

        for (slot, mod_input) in category.mods.into_iter().enumerate() {
            let cached_dependencies: Vec<String> = mod_input
                .required_dependencies
                .iter()
                .filter(|dep| board_ids.contains(*dep))
                .cloned()
                .collect();

            board_mods.push(BoardMod {
                source_id: mod_input.source_id,
                slug: mod_input.slug,
                title: mod_input.title,
                icon_url: mod_input.icon_url,
                description: mod_input.description,
                unique_id: next_id(id_gen),
                position: Position {
                    x: position.x + CATEGORY_PADDING,
                    y: position.y + CATEGORY_HEADER + CATEGORY_PADDING + slot as f64 * MOD_ROW_PITCH,
                },
                category_id,
                category_index: slot,
                is_disabled: false,
                version: None,
                cached_dependencies,
            });
        }

        board_categories.push(BoardCategory {
            id: category_id,
            title: category.title.clone(),
            position,
            color: color_for(&category.title).to_string(),
            width: CATEGORY_WIDTH,
            height,
        });
    }

    BoardState {
        project_id,
        camera: Camera::default(),
        mods: board_mods,
        categories: board_categories,
        updated_at: now,
    }
}

fn color_for(title: &str) -> &'static str {
    let lower = title.to_lowercase();
    CATEGORY_COLORS
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_COLOR)
}
