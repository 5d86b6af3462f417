//! Query text preparation for the semantic tier
//!
//! Raw recall text can be a pasted document. Before embedding we strip
//! frontmatter, collapse code blocks, flatten markdown links, drop HTML
//! tags, trim whitespace and cap the length.

use regex::Regex;
use std::sync::LazyLock;

/// Character cap, roughly eight thousand tokens
pub const MAX_QUERY_CHARS: usize = 32_000;

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("code block pattern"));

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("markdown link pattern"));

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html pattern"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws pattern"));

/// Prepare free text for embedding
pub fn prepare_query_text(text: &str) -> String {
    let mut s = text.to_string();

    // YAML frontmatter at the very top of the document
    if s.starts_with("---") {
        if let Some(end) = s[3..].find("\n---") {
            s = s[3 + end + 4..].to_string();
        }
    }

    let s = CODE_BLOCK.replace_all(&s, " [code] ");
    let s = MARKDOWN_LINK.replace_all(&s, "$1");
    let s = HTML_TAG.replace_all(&s, " ");
    let s = WHITESPACE.replace_all(&s, " ");
    let s = s.trim();

    if s.chars().count() > MAX_QUERY_CHARS {
        s.chars().take(MAX_QUERY_CHARS).collect()
    } else {
        s.to_string()
    }
}
