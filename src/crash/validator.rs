//! Log freshness validation: a crash log whose mod list barely overlaps the
//! current board was probably produced by an older install.

use crate::board::BoardState;

/// Overlap below this ratio marks the log as stale.
pub const STALE_OVERLAP_THRESHOLD: f64 = 0.3;

/// Warning code attached to responses built from stale logs.
pub const STALE_LOG_WARNING: &str = "stale_log";

/// Fraction of log-mentioned mods that exist on the board.
///
/// Matching is fuzzy in both directions over slugs and titles, since jar
/// names and loader ids rarely agree exactly.
pub fn overlap_ratio(mods_in_log: &[String], board: &BoardState) -> f64 {
    if mods_in_log.is_empty() {
        // Nothing to compare; treat as fresh.
        return 1.0;
    }

    let board_names: Vec<String> = board
        .mods
        .iter()
        .flat_map(|m| [m.slug.to_lowercase(), m.title.to_lowercase()])
        .collect();

    let matched = mods_in_log
        .iter()
        .filter(|log_mod| {
            let log_mod = log_mod.to_lowercase();
            board_names
                .iter()
                .any(|b| b.contains(&log_mod) || log_mod.contains(b.as_str()))
        })
        .count();

    matched as f64 / mods_in_log.len() as f64
}

/// Whether the log should carry a [`STALE_LOG_WARNING`].
pub fn is_stale(mods_in_log: &[String], board: &BoardState) -> bool {
    overlap_ratio(mods_in_log, board) < STALE_OVERLAP_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{assemble, CategoryInput, ModInput};
    use chrono::Utc;

    fn board_with(slugs: &[&str]) -> BoardState {
        let mods = slugs
            .iter()
            .map(|s| ModInput {
                source_id: s.to_string(),
                slug: s.to_string(),
                title: s.to_string(),
                icon_url: None,
                description: None,
                required_dependencies: Vec::new(),
            })
            .collect();
        assemble(
            vec![CategoryInput {
                title: "All".into(),
                mods,
            }],
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_full_overlap() {
        let board = board_with(&["sodium", "lithium"]);
        let log_mods = vec!["sodium".to_string(), "lithium".to_string()];
        assert!((overlap_ratio(&log_mods, &board) - 1.0).abs() < 1e-9);
        assert!(!is_stale(&log_mods, &board));
    }

    #[test]
    fn test_no_overlap_is_stale() {
        let board = board_with(&["create", "jei"]);
        let log_mods = vec!["sodium".to_string(), "lithium".to_string()];
        assert!(is_stale(&log_mods, &board));
    }

    #[test]
    fn test_partial_overlap_threshold() {
        let board = board_with(&["sodium"]);
        // 1 of 4 matches: 25% < 30%
        let log_mods = vec![
            "sodium".to_string(),
            "a".to_string(),
            "bb".to_string(),
            "ccc".to_string(),
        ];
        assert!(is_stale(&log_mods, &board));

        // 2 of 4 matches: 50% >= 30%
        let board = board_with(&["sodium", "ccc"]);
        assert!(!is_stale(&log_mods, &board));
    }

    #[test]
    fn test_empty_log_mod_list_is_fresh() {
        let board = board_with(&["sodium"]);
        assert!(!is_stale(&[], &board));
    }

    #[test]
    fn test_fuzzy_matching_jar_names() {
        let board = board_with(&["farmers-delight"]);
        let log_mods = vec!["farmers-delight".to_string()];
        assert!(!is_stale(&log_mods, &board));
    }
}
