//! File-name slugs for page titles.

/// Leaves room for the `.md` extension and a `-N` suffix
const MAX_SLUG_LEN: usize = 200;

/// Dropped outright instead of becoming a separator
const REMOVED: &[char] = &['*', '+', '~', '.', '(', ')', '\'', '"', '!', ':', '@'];

/// Turn a page title into a lowercase, file-name safe slug.
///
/// Letters and digits of any script are kept so non-Latin titles stay
/// readable; every other run of characters becomes a single `-`.
pub fn generate_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        if REMOVED.contains(&c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        return "untitled".to_string();
    }

    if slug.chars().count() > MAX_SLUG_LEN {
        slug = slug.chars().take(MAX_SLUG_LEN).collect();
        slug.truncate(slug.trim_end_matches('-').len());
    }

    slug
}
