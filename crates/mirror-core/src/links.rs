//! Rewriting Confluence page links as Obsidian wikilinks.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use tracing::debug;

/// `[text](…/wiki/…/pages/{id}…)` in converted Markdown, with the image
/// prefix `!` captured so embeds can be left alone
static MARKDOWN_PAGE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(!?)\[([^\]]+)\]\(([^)]*/wiki/(?:spaces/[^/]+/)?pages/(\d+)[^)]*)\)").unwrap()
});

/// `[[target]]`, or `[[target|alias]]` when the alias differs
pub fn render_wikilink(target: &str, alias: Option<&str>) -> String {
    match alias {
        Some(alias) if alias != target => format!("[[{}|{}]]", target, alias),
        _ => format!("[[{}]]", target),
    }
}

/// Replace Markdown links to synced pages with wikilinks.
///
/// `page_files` maps page id to the note path. Links to pages that were
/// never synced are kept and flagged with a comment. Image embeds are
/// never rewritten.
pub fn transform_links(markdown: &str, page_files: &HashMap<String, String>) -> String {
    MARKDOWN_PAGE_LINK
        .replace_all(markdown, |caps: &Captures| {
            if !caps[1].is_empty() {
                return caps[0].to_string();
            }
            let text = &caps[2];
            let page_id = &caps[4];

            match page_files.get(page_id) {
                Some(path) => {
                    let file = path.rsplit('/').next().unwrap_or(path);
                    let name = file.strip_suffix(".md").unwrap_or(file);
                    if text == file {
                        render_wikilink(name, None)
                    } else {
                        render_wikilink(name, Some(text))
                    }
                }
                None => {
                    debug!("Link to unsynced page {}", page_id);
                    format!(
                        "{} <!-- TODO: Link to unsynced page (ID: {}) -->",
                        &caps[0], page_id
                    )
                }
            }
        })
        .into_owned()
}
