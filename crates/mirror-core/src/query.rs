//! Sync filters and their translation into a CQL search query.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static NEEDS_QUOTES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,()]").unwrap());

/// Which pages a sync pass should consider.
///
/// Empty lists mean "no restriction" for that criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncFilters {
    pub enabled: bool,
    pub space_keys: Vec<String>,
    pub labels: Vec<String>,
    /// Page-tree roots; only numeric ids are valid
    pub root_page_ids: Vec<String>,
}

/// Build the CQL query for a set of filters.
///
/// Disabled or absent filters yield the base `type = page` query.
pub fn build_search_query(filters: Option<&SyncFilters>) -> String {
    let mut conditions = vec!["type = page".to_string()];

    let Some(filters) = filters.filter(|f| f.enabled) else {
        return conditions.join(" AND ");
    };

    let spaces: Vec<String> = filters
        .space_keys
        .iter()
        .filter_map(|key| escape_value(key))
        .collect();
    if !spaces.is_empty() {
        conditions.push(format!("space IN ({})", spaces.join(", ")));
    }

    let labels: Vec<String> = filters
        .labels
        .iter()
        .filter_map(|label| escape_value(label))
        .collect();
    if !labels.is_empty() {
        conditions.push(format!("label IN ({})", labels.join(", ")));
    }

    let roots: Vec<&str> = filters
        .root_page_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| NUMERIC_ID.is_match(id))
        .collect();
    if !roots.is_empty() {
        conditions.push(format!("ancestor IN ({})", roots.join(", ")));
    }

    conditions.join(" AND ")
}

/// Check that enabled filters restrict something and that page ids are numeric.
pub fn validate_filters(filters: &SyncFilters) -> bool {
    if !filters.enabled {
        return true;
    }

    let has_any = !filters.space_keys.is_empty()
        || !filters.labels.is_empty()
        || !filters.root_page_ids.is_empty();
    if !has_any {
        return false;
    }

    let invalid: Vec<&String> = filters
        .root_page_ids
        .iter()
        .filter(|id| !id.is_empty() && !NUMERIC_ID.is_match(id))
        .collect();
    if !invalid.is_empty() {
        warn!("Invalid page IDs in filters: {:?}", invalid);
        return false;
    }

    true
}

/// Quote values containing whitespace, commas or parentheses; drop blanks.
fn escape_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if NEEDS_QUOTES.is_match(trimmed) {
        Some(format!("\"{}\"", trimmed.replace('"', "\\\"")))
    } else {
        Some(trimmed.to_string())
    }
}
