//! Splitting a synced note into its remote-owned and user-owned regions.
//!
//! A synced note is laid out as:
//! ```markdown
//! ---
//! title: Page
//! ---
//!
//! <!-- CONFLUENCE_START -->
//! converted body, replaced on every sync
//! <!-- CONFLUENCE_END -->
//!
//! ## Local Notes
//! anything the user writes here survives re-syncs
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

pub const CONFLUENCE_START_MARKER: &str = "<!-- CONFLUENCE_START -->";
pub const CONFLUENCE_END_MARKER: &str = "<!-- CONFLUENCE_END -->";

/// Scaffold appended below the end marker when a note has no user section yet.
pub const DEFAULT_LOCAL_NOTES_TEMPLATE: &str =
    "## Local Notes\n\n_Notes written here are kept across syncs._\n\n## Backlinks\n";

static HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^---\r?\n(?s:.*?)---\r?\n").unwrap());

/// A note split around the region markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileContent {
    /// Text between the markers, or the whole input for unmarked files
    pub remote_section: String,
    /// Text after the end marker
    pub user_section: String,
    pub has_markers: bool,
}

/// Split raw note text around the region markers.
///
/// A missing marker, or a start marker at or after the end marker, makes the
/// whole input count as remote content.
pub fn parse_file_content(raw: &str) -> ParsedFileContent {
    let start = raw.find(CONFLUENCE_START_MARKER);
    let end = raw.find(CONFLUENCE_END_MARKER);

    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            let remote = &raw[start + CONFLUENCE_START_MARKER.len()..end];
            let user = &raw[end + CONFLUENCE_END_MARKER.len()..];
            ParsedFileContent {
                remote_section: remote.trim().to_string(),
                user_section: user.trim().to_string(),
                has_markers: true,
            }
        }
        _ => ParsedFileContent {
            remote_section: raw.to_string(),
            user_section: String::new(),
            has_markers: false,
        },
    }
}

/// Rewrite any region marker inside `text` so it no longer parses as one.
pub fn escape_markers(text: &str) -> String {
    text.replace(CONFLUENCE_START_MARKER, "<!-- CONFLUENCE START -->")
        .replace(CONFLUENCE_END_MARKER, "<!-- CONFLUENCE END -->")
}

/// Split off a leading `---` delimited header.
///
/// Returns `(header, body)`; the header keeps its delimiters and is empty
/// when the text does not start with one.
pub fn split_header(raw: &str) -> (&str, &str) {
    match HEADER.find(raw) {
        Some(m) => raw.split_at(m.end()),
        None => ("", raw),
    }
}
