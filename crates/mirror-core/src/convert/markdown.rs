//! Storage-format markup to Markdown.
//!
//! The markup is tokenized with quick-xml into a small element tree, then
//! rendered with these conventions:
//! - atx headings, `-` bullets, `1.` ordered items
//! - `*em*`, `**strong**`, backtick inline code, fenced code blocks
//! - pipe tables surrounded by blank lines
//! - comments kept verbatim
//! - `ac:image` attachments as `![[file]]`, `ac:link` pages as `[[Title]]`
//! - task lists as `- [ ]` / `- [x]`
//!
//! Text is escaped so that literal `*`, `_`, `[` and friends stay literal.

use super::ConversionError;
use crate::links::render_wikilink;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::borrow::Cow;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ORDERED_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\. ").unwrap());

/// HTML elements that never have content, even when written as `<br>`
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }
}

/// Convert storage-format markup to Markdown.
///
/// Fails only on markup the tokenizer cannot get through, such as an
/// unterminated comment or CDATA section.
pub fn to_markdown(markup: &str) -> Result<String, ConversionError> {
    if markup.trim().is_empty() {
        return Ok(String::new());
    }
    let root = parse(markup)?;
    Ok(tidy(&render_nodes(&root.children)))
}

// ============================================================================
// Tokenizing
// ============================================================================

fn parse(markup: &str) -> Result<Element, ConversionError> {
    let mut reader = Reader::from_str(markup);
    reader.trim_text(false);
    reader.check_end_names(false);

    let mut stack = vec![Element {
        name: "#root".to_string(),
        ..Default::default()
    }];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let element = start_element(&e);
                if VOID_ELEMENTS.contains(&element.name.as_str()) {
                    push_child(&mut stack, Node::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Ok(Event::Empty(e)) => push_child(&mut stack, Node::Element(start_element(&e))),
            Ok(Event::End(e)) => {
                let name = lowercase(e.name().as_ref());
                // Unmatched end tags are dropped; skipped ones close implicitly
                if let Some(pos) = stack.iter().rposition(|el| el.name == name) {
                    while pos > 0 && stack.len() > pos {
                        close_top(&mut stack);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let raw = String::from_utf8_lossy(&t);
                push_child(&mut stack, Node::Text(decode_entities(&raw)));
            }
            Ok(Event::CData(c)) => {
                push_child(&mut stack, Node::CData(String::from_utf8_lossy(&c).into_owned()));
            }
            Ok(Event::Comment(c)) => {
                push_child(&mut stack, Node::Comment(String::from_utf8_lossy(&c).into_owned()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ConversionError::Markup {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                });
            }
        }
        buf.clear();
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }
    Ok(stack.pop().unwrap_or_default())
}

fn close_top(stack: &mut Vec<Element>) {
    if stack.len() > 1 {
        if let Some(element) = stack.pop() {
            push_child(stack, Node::Element(element));
        }
    }
}

fn push_child(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn start_element(e: &BytesStart) -> Element {
    let attrs = e
        .attributes()
        .with_checks(false)
        .flatten()
        .map(|attr| {
            let value = String::from_utf8_lossy(&attr.value);
            (lowercase(attr.key.as_ref()), decode_entities(&value))
        })
        .collect();

    Element {
        name: lowercase(e.name().as_ref()),
        attrs,
        children: Vec::new(),
    }
}

fn lowercase(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_lowercase()
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    // A stray `&` makes the whole node undecodable; keep it as written
    quick_xml::escape::unescape_with(raw, resolve_entity)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "times" => "\u{d7}",
        "deg" => "\u{b0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "euro" => "\u{20ac}",
        "rarr" => "\u{2192}",
        "larr" => "\u{2190}",
        _ => return None,
    };
    Some(value)
}

// ============================================================================
// Rendering
// ============================================================================

fn render_nodes(nodes: &[Node]) -> String {
    nodes.iter().map(render_node).collect()
}

fn render_node(node: &Node) -> String {
    match node {
        Node::Text(text) | Node::CData(text) => escape_markdown(&WHITESPACE.replace_all(text, " ")),
        Node::Comment(comment) => format!("<!--{}-->", comment),
        Node::Element(el) => render_element(el),
    }
}

fn render_element(el: &Element) -> String {
    match el.name.as_str() {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = el.name[1..].parse::<usize>().unwrap_or(1);
            let text = single_line(&render_nodes(&el.children));
            if text.is_empty() {
                String::new()
            } else {
                block(&format!("{} {}", "#".repeat(level), text))
            }
        }
        "p" | "div" | "section" | "article" | "header" | "footer" | "ac:layout"
        | "ac:layout-section" | "ac:layout-cell" | "ac:rich-text-body" => {
            block(&render_nodes(&el.children))
        }
        "br" => "  \n".to_string(),
        "hr" => block("---"),
        "strong" | "b" => wrap("**", &render_nodes(&el.children)),
        "em" | "i" => wrap("*", &render_nodes(&el.children)),
        "del" | "s" | "strike" => wrap("~~", &render_nodes(&el.children)),
        "code" | "tt" | "kbd" => inline_code(&raw_text(el)),
        "pre" => {
            let language = el
                .child("code")
                .and_then(|code| code.attr("class"))
                .and_then(|class| class.strip_prefix("language-"))
                .unwrap_or("");
            fenced(language, &raw_text(el))
        }
        "a" => link(el),
        "img" => image(el),
        "ul" => list(el, false),
        "ol" => list(el, true),
        "blockquote" => blockquote(el),
        "table" => table(el),
        "ac:structured-macro" => structured_macro(el),
        "ac:plain-text-body" => fenced("", &raw_text(el)),
        "ac:image" => ac_image(el),
        "ac:link" => ac_link(el),
        "ac:task-list" => task_list(el),
        "ac:parameter" | "ac:emoticon" | "ac:placeholder" | "script" | "style" | "head" => {
            String::new()
        }
        _ => render_nodes(&el.children),
    }
}

/// Content separated from its neighbours by blank lines
fn block(content: &str) -> String {
    let content = content.trim();
    if content.is_empty() {
        String::new()
    } else {
        format!("\n\n{}\n\n", content)
    }
}

fn single_line(content: &str) -> String {
    WHITESPACE.replace_all(content, " ").trim().to_string()
}

fn wrap(marker: &str, content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lead = if content.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if content.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{}{}{}{}{}", lead, marker, trimmed, marker, trail)
}

fn inline_code(code: &str) -> String {
    if code.is_empty() {
        String::new()
    } else if code.contains('`') {
        format!("`` {} ``", code)
    } else {
        format!("`{}`", code)
    }
}

fn fenced(language: &str, code: &str) -> String {
    let code = code.trim_matches('\n');
    format!("\n\n```{}\n{}\n```\n\n", language.trim(), code)
}

/// Text content as written, for code
fn raw_text(el: &Element) -> String {
    el.children
        .iter()
        .map(|node| match node {
            Node::Text(text) | Node::CData(text) => text.clone(),
            Node::Element(child) if child.name == "br" => "\n".to_string(),
            Node::Element(child) => raw_text(child),
            Node::Comment(_) => String::new(),
        })
        .collect()
}

fn link(el: &Element) -> String {
    let text = render_nodes(&el.children).trim().to_string();
    match el.attr("href").filter(|href| !href.is_empty()) {
        Some(_) if text.is_empty() => String::new(),
        Some(href) => format!("[{}]({})", text, href),
        None => text,
    }
}

fn image(el: &Element) -> String {
    match el.attr("src").filter(|src| !src.is_empty()) {
        Some(src) => format!("![{}]({})", el.attr("alt").unwrap_or(""), src),
        None => String::new(),
    }
}

fn list(el: &Element, ordered: bool) -> String {
    let start: usize = el
        .attr("start")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let mut out = String::new();
    for (i, item) in el.elements().filter(|c| c.name == "li").enumerate() {
        let prefix = if ordered {
            format!("{}. ", start + i)
        } else {
            "- ".to_string()
        };
        out.push_str(&prefix);
        out.push_str(&indent_continuation(
            tidy(&render_nodes(&item.children)).as_str(),
            prefix.len(),
        ));
        out.push('\n');
    }
    block(&out)
}

/// Indent every line but the first so it stays inside a list item
fn indent_continuation(content: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    content
        .lines()
        .enumerate()
        .map(|(n, line)| {
            if n == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn blockquote(el: &Element) -> String {
    let content = tidy(&render_nodes(&el.children));
    let quoted = content
        .lines()
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    block(&quoted)
}

fn table(el: &Element) -> String {
    let mut rows: Vec<&Element> = Vec::new();
    for child in el.elements() {
        match child.name.as_str() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(child.elements().filter(|r| r.name == "tr")),
            _ => {}
        }
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.elements()
                .filter(|c| c.name == "td" || c.name == "th")
                .map(|cell| single_line(&render_nodes(&cell.children)).replace('|', "\\|"))
                .collect()
        })
        .collect();

    let width = cells.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return block(&render_nodes(&el.children));
    }

    let mut lines = Vec::with_capacity(cells.len() + 1);
    for (i, row) in cells.iter().enumerate() {
        let mut padded = row.clone();
        padded.resize(width, String::new());
        lines.push(format!("| {} |", padded.join(" | ")));
        if i == 0 {
            lines.push(format!("| {} |", vec!["---"; width].join(" | ")));
        }
    }
    block(&lines.join("\n"))
}

fn macro_parameter(el: &Element, name: &str) -> Option<String> {
    el.elements()
        .find(|c| c.name == "ac:parameter" && c.attr("ac:name") == Some(name))
        .map(|param| raw_text(param).trim().to_string())
}

/// Code macros become fenced blocks tagged with their `language`
/// parameter; other macros keep their body content.
fn structured_macro(el: &Element) -> String {
    let language = macro_parameter(el, "language").unwrap_or_default();
    el.children
        .iter()
        .map(|node| match node {
            Node::Element(child) if child.name == "ac:parameter" => String::new(),
            Node::Element(child) if child.name == "ac:plain-text-body" => {
                fenced(&language, &raw_text(child))
            }
            other => render_node(other),
        })
        .collect()
}

fn ac_image(el: &Element) -> String {
    if let Some(file) = el
        .child("ri:attachment")
        .and_then(|a| a.attr("ri:filename"))
    {
        return format!("![[{}]]", file);
    }
    match el.child("ri:url").and_then(|u| u.attr("ri:value")) {
        Some(url) => format!("![{}]({})", el.attr("ac:alt").unwrap_or(""), url),
        None => String::new(),
    }
}

fn ac_link(el: &Element) -> String {
    let text = el
        .child("ac:link-body")
        .map(|body| single_line(&render_nodes(&body.children)))
        .or_else(|| {
            el.child("ac:plain-text-link-body")
                .map(|body| raw_text(body).trim().to_string())
        })
        .filter(|text| !text.is_empty());

    let target = el
        .child("ri:page")
        .and_then(|page| page.attr("ri:content-title"))
        .or_else(|| {
            el.child("ri:attachment")
                .and_then(|a| a.attr("ri:filename"))
        });

    match target {
        Some(target) => render_wikilink(target, text.as_deref()),
        None => text.unwrap_or_default(),
    }
}

fn task_list(el: &Element) -> String {
    let lines: Vec<String> = el
        .elements()
        .filter(|c| c.name == "ac:task")
        .map(|task| {
            let done = task
                .child("ac:task-status")
                .map(|status| raw_text(status).trim() == "complete")
                .unwrap_or(false);
            let body = task
                .child("ac:task-body")
                .map(|body| single_line(&render_nodes(&body.children)))
                .unwrap_or_default();
            format!("- [{}] {}", if done { "x" } else { " " }, body)
        })
        .collect();
    block(&lines.join("\n"))
}

// ============================================================================
// Text
// ============================================================================

fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }

    // Line-start syntax only matters at the start of a text run
    let ordered_digits = ORDERED_START.captures(&out).map(|caps| caps[1].len());
    if let Some(digits) = ordered_digits {
        out.insert(digits, '\\');
    } else if out.starts_with('#')
        || out.starts_with('>')
        || out.starts_with("- ")
        || out.starts_with("+ ")
    {
        out.insert(0, '\\');
    }
    out
}

/// Drop whitespace-only lines and runs of blank lines outside fences
fn tidy(markdown: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut previous_blank = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && line.trim().is_empty() {
            if !previous_blank {
                lines.push("");
            }
            previous_blank = true;
            continue;
        }
        previous_blank = false;
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}
