//! Crash-log sanitizer: strips user paths, addresses, tokens and other
//! noise, extracts the structured signals the analyzer needs, and bounds
//! the log size while keeping the head and the error neighborhood.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Post-sanitization size bound.
pub const MAX_LOG_CHARS: usize = 20_000;
/// Share of the budget spent on the log head when truncating.
const HEAD_SHARE: f64 = 0.6;

/// Signals pulled out of the log during sanitization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractedInfo {
    pub mc_version: Option<String>,
    pub mod_loader: Option<String>,
    /// First exception/failure line.
    pub error_hint: Option<String>,
    pub stack_trace: Vec<String>,
    /// Mod ids mentioned by the log (loading issues, jar names).
    pub mods_in_log: Vec<String>,
}

/// Sanitized log plus extraction results.
#[derive(Debug, Clone)]
pub struct SanitizedLog {
    pub text: String,
    pub extracted: ExtractedInfo,
    pub original_length: usize,
}

struct Patterns {
    user_paths: Vec<Regex>,
    uuid: Regex,
    ip: Regex,
    timestamp: Regex,
    access_token: Regex,
    mc_version: Regex,
    loading_issue: Regex,
    jar_name: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        user_paths: vec![
            Regex::new(r"(?i)[A-Z]:\\Users\\[^\\\s]+").expect("valid regex"),
            Regex::new(r"/home/[^/\s]+").expect("valid regex"),
            Regex::new(r"/Users/[^/\s]+").expect("valid regex"),
        ],
        uuid: Regex::new(
            r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
        )
        .expect("valid regex"),
        ip: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("valid regex"),
        timestamp: Regex::new(r"\[\d{2}:\d{2}:\d{2}\]|\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?")
            .expect("valid regex"),
        access_token: Regex::new(r"--accessToken[,\s]+\S+").expect("valid regex"),
        mc_version: Regex::new(r"(?i)Minecraft Version:?\s*(\d+\.\d+(\.\d+)?)").expect("valid regex"),
        loading_issue: Regex::new(r"(?i)Mod loading issue for:?\s*([a-z0-9_-]+)")
            .expect("valid regex"),
        jar_name: Regex::new(r"([a-zA-Z][a-zA-Z0-9_+.-]{2,})-[0-9][^\s/\\]*\.jar")
            .expect("valid regex"),
    })
}

/// Sanitize a raw crash log.
pub fn sanitize(raw: &str, max_chars: usize) -> SanitizedLog {
    let original_length = raw.len();
    if raw.is_empty() {
        return SanitizedLog {
            text: String::new(),
            extracted: ExtractedInfo::default(),
            original_length,
        };
    }

    let p = patterns();
    let mut text = raw.to_string();
    for path in &p.user_paths {
        text = path.replace_all(&text, "[USER_PATH]").into_owned();
    }
    text = p.uuid.replace_all(&text, "[UUID]").into_owned();
    text = p.ip.replace_all(&text, "[IP]").into_owned();
    text = p.timestamp.replace_all(&text, "[TS]").into_owned();
    text = p
        .access_token
        .replace_all(&text, "--accessToken [REDACTED]")
        .into_owned();

    let extracted = extract_info(&text);
    let text = truncate_preserving_error(&text, max_chars);

    SanitizedLog {
        text,
        extracted,
        original_length,
    }
}

fn extract_info(text: &str) -> ExtractedInfo {
    let p = patterns();
    let mut info = ExtractedInfo::default();

    info.mc_version = p
        .mc_version
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let lower = text.to_lowercase();
    info.mod_loader = if lower.contains("neoforge") {
        Some("neoforge".to_string())
    } else if lower.contains("fml") || lower.contains("minecraftforge") || lower.contains("forge ")
    {
        Some("forge".to_string())
    } else if lower.contains("quilt") {
        Some("quilt".to_string())
    } else if lower.contains("fabric") {
        Some("fabric".to_string())
    } else {
        None
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if info.error_hint.is_none()
            && (trimmed.contains("Exception")
                || trimmed.contains("Failure message")
                || trimmed.contains("Error:")
                || trimmed.contains("FATAL"))
        {
            info.error_hint = Some(trimmed.to_string());
        }
        if trimmed.starts_with("at ") && info.stack_trace.len() < 30 {
            info.stack_trace.push(trimmed.to_string());
        }
    }

    let mut mods: Vec<String> = Vec::new();
    for capture in p.loading_issue.captures_iter(text) {
        if let Some(m) = capture.get(1) {
            mods.push(m.as_str().to_lowercase());
        }
    }
    for capture in p.jar_name.captures_iter(text) {
        if let Some(m) = capture.get(1) {
            mods.push(m.as_str().to_lowercase());
        }
    }
    mods.sort();
    mods.dedup();
    info.mods_in_log = mods;

    info
}

/// Truncate to `max_chars`, spending most of the budget on the head and
/// the rest on the first error neighborhood past it.
fn truncate_preserving_error(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    let head_budget = (max_chars as f64 * HEAD_SHARE) as usize;
    let head_end = floor_char_boundary(text, head_budget);
    let head = &text[..head_end];

    let tail = &text[head_end..];
    let error_markers = ["Caused by", "Exception", "-- Crash", "Failure message", "FATAL"];
    let error_offset = error_markers
        .iter()
        .filter_map(|marker| tail.find(marker))
        .min();

    let tail_budget = max_chars.saturating_sub(head_end).saturating_sub(32);
    let window = match error_offset {
        Some(offset) => {
            let start = floor_char_boundary(tail, offset);
            let end = floor_char_boundary(tail, (offset + tail_budget).min(tail.len()));
            &tail[start..end]
        }
        // No error past the head; keep the end of the log.
        None => {
            let start = floor_char_boundary(tail, tail.len().saturating_sub(tail_budget));
            &tail[start..]
        }
    };

    format!("{head}\n... [TRUNCATED] ...\n{window}")
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
