//! Diagram macro extraction.
//!
//! Diagram macros cannot survive the Markdown transform, so they are cut out
//! of the storage markup first, replaced by `<p>__{TAG}_PLACEHOLDER_{i}__</p>`,
//! and put back as their final artifact once the transform has run. The
//! transform escapes underscores, so restoration matches both
//! `\_\_PLANTUML\_PLACEHOLDER\_0\_\_` and the raw token.
//!
//! Matching is regex based and isolated behind [`MacroExtractor`].

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static CDATA_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<ac:plain-text-body>\s*<!\[CDATA\[(.*?)\]\]>\s*</ac:plain-text-body>")
        .unwrap()
});
static TEXT_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ac:plain-text-body>(.*?)</ac:plain-text-body>").unwrap());

/// One macro found in the storage markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMacro {
    /// Diagram source, trimmed
    pub payload: String,
    pub label: Option<String>,
    /// Byte offset of the opening tag
    pub start: usize,
    /// Byte offset just past the closing tag
    pub end: usize,
}

/// Finds one kind of structured macro and swaps it for placeholders.
pub trait MacroExtractor {
    /// Token tag used in placeholders, e.g. `PLANTUML`
    fn tag(&self) -> &'static str;

    /// Matches the whole macro; group 1 is its inner markup
    fn macro_pattern(&self) -> &Regex;

    /// Matches the label parameter; group 1 is its value
    fn label_pattern(&self) -> &Regex;

    /// All macros with a payload, front to back
    fn extract_macros(&self, markup: &str) -> Vec<ExtractedMacro> {
        let macros: Vec<ExtractedMacro> = self
            .macro_pattern()
            .captures_iter(markup)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let inner = caps.get(1).map_or("", |m| m.as_str());
                let payload = extract_payload(inner)?;
                let label = self
                    .label_pattern()
                    .captures(inner)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|l| !l.is_empty());
                Some(ExtractedMacro {
                    payload,
                    label,
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect();

        debug!("Found {} {} macros", macros.len(), self.tag());
        macros
    }

    fn placeholder(&self, index: usize) -> String {
        format!("__{}_PLACEHOLDER_{}__", self.tag(), index)
    }

    /// Form of the placeholder after the transform escaped its underscores
    fn escaped_placeholder(&self, index: usize) -> String {
        self.placeholder(index).replace('_', "\\_")
    }

    /// Swap each macro for a paragraph holding its placeholder.
    ///
    /// Works back to front so earlier offsets stay valid; placeholder `i`
    /// still names the `i`-th macro front to back.
    fn replace_with_placeholders(&self, markup: &str, macros: &[ExtractedMacro]) -> String {
        let mut result = markup.to_string();
        for (index, m) in macros.iter().enumerate().rev() {
            let placeholder = format!("<p>{}</p>", self.placeholder(index));
            result.replace_range(m.start..m.end, &placeholder);
        }
        result
    }

    /// Replace placeholder `i` with `replacements[i]`
    fn restore_placeholders(&self, text: &str, replacements: &[String]) -> String {
        let mut result = text.to_string();
        for (index, replacement) in replacements.iter().enumerate() {
            let escaped = self.escaped_placeholder(index);
            let raw = self.placeholder(index);
            if result.contains(&escaped) {
                result = result.replacen(&escaped, replacement, 1);
            } else {
                result = result.replacen(&raw, replacement, 1);
            }
        }
        result
    }
}

/// CDATA body first, raw body text as fallback
fn extract_payload(inner: &str) -> Option<String> {
    let body = CDATA_BODY
        .captures(inner)
        .or_else(|| TEXT_BODY.captures(inner))
        .and_then(|caps| caps.get(1))?;
    let payload = body.as_str().trim();
    (!payload.is_empty()).then(|| payload.to_string())
}

/// PlantUML diagrams, restored as fenced `plantuml` blocks
pub struct PlantUmlExtractor {
    pattern: Regex,
    label: Regex,
}

impl PlantUmlExtractor {
    pub fn new() -> Self {
        Self {
            pattern: macro_regex("plantuml"),
            label: parameter_regex("title"),
        }
    }

    /// Optional `<!-- label -->` line, then the fenced source
    pub fn render(&self, m: &ExtractedMacro) -> String {
        let mut out = String::new();
        if let Some(label) = &m.label {
            out.push_str(&format!("<!-- {} -->\n", label));
        }
        out.push_str("```plantuml\n");
        out.push_str(&m.payload);
        out.push_str("\n```");
        out
    }
}

impl Default for PlantUmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroExtractor for PlantUmlExtractor {
    fn tag(&self) -> &'static str {
        "PLANTUML"
    }

    fn macro_pattern(&self) -> &Regex {
        &self.pattern
    }

    fn label_pattern(&self) -> &Regex {
        &self.label
    }
}

/// draw.io diagrams, saved as `.drawio` files and restored as embeds
pub struct DrawioExtractor {
    pattern: Regex,
    label: Regex,
}

impl DrawioExtractor {
    pub fn new() -> Self {
        Self {
            pattern: macro_regex("drawio"),
            label: parameter_regex("name"),
        }
    }

    pub fn file_name(&self, page_slug: &str, index: usize) -> String {
        format!("{}-diagram-{}.drawio", page_slug, index)
    }

    pub fn embed(&self, file_name: &str) -> String {
        format!("![[{}]]", file_name)
    }
}

impl Default for DrawioExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroExtractor for DrawioExtractor {
    fn tag(&self) -> &'static str {
        "DRAWIO"
    }

    fn macro_pattern(&self) -> &Regex {
        &self.pattern
    }

    fn label_pattern(&self) -> &Regex {
        &self.label
    }
}

fn macro_regex(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?is)<ac:structured-macro\s+ac:name="{}"[^>]*>(.*?)</ac:structured-macro>"#,
        regex::escape(name)
    ))
    .unwrap()
}

fn parameter_regex(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?i)<ac:parameter\s+ac:name="{}">([^<]+)</ac:parameter>"#,
        regex::escape(name)
    ))
    .unwrap()
}
