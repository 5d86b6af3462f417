//! Fragment Factory
//!
//! Pure, stateless construction of fragment records: PII redaction,
//! truncation, content hashing, tier inference, keyword extraction and
//! token counting. No I/O happens here.

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::fragment::{Fragment, FragmentType, TtlTier};
use super::keywords::{extract_keywords, normalize_keywords};
use super::redaction::redact;
use super::tokens::estimate_tokens;

/// Maximum stored content length, ellipsis marker included
pub const MAX_CONTENT_CHARS: usize = 300;

const ELLIPSIS: &str = "...";

/// Parameters for building a fragment
#[derive(Debug, Clone, Default)]
pub struct CreateFragment {
    pub content: String,
    pub topic: String,
    pub keywords: Vec<String>,
    pub fragment_type: FragmentType,
    /// Defaults to the type's importance when `None`
    pub importance: Option<f64>,
    pub source: Option<String>,
    pub agent_id: String,
    pub is_anchor: bool,
}

/// Stateless fragment constructor
pub struct FragmentFactory;

impl FragmentFactory {
    /// Build a fragment record from raw input.
    ///
    /// The content hash is computed over the redacted, truncated form, so
    /// re-creating the same input always yields the same hash.
    pub fn create(params: CreateFragment) -> Fragment {
        let now = Utc::now();
        let content = truncate_content(&redact(&params.content));
        let importance = params
            .importance
            .unwrap_or_else(|| params.fragment_type.default_importance())
            .clamp(0.0, 1.0);

        let keywords = if params.keywords.is_empty() {
            extract_keywords(&content)
        } else {
            normalize_keywords(&params.keywords)
        };

        let ttl_tier = TtlTier::infer(params.fragment_type, importance);
        let estimated_tokens = estimate_tokens(&content);
        let content_hash = content_hash(&content);

        Fragment {
            id: Fragment::new_id(),
            content,
            topic: params.topic,
            keywords,
            fragment_type: params.fragment_type,
            importance,
            content_hash,
            source: params.source,
            linked_to: Vec::new(),
            agent_id: params.agent_id,
            access_count: 0,
            accessed_at: None,
            created_at: now,
            ttl_tier,
            estimated_tokens,
            utility_score: 1.0,
            verified_at: now,
            has_embedding: false,
            is_anchor: params.is_anchor,
        }
    }

    /// Split a longer text into a chain of fragments, each within the
    /// content limit, linked to its predecessor in insertion order.
    pub fn split(text: &str, template: CreateFragment) -> Vec<Fragment> {
        let redacted = redact(text);
        let chunks = split_chunks(&redacted, MAX_CONTENT_CHARS);

        let mut fragments: Vec<Fragment> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut fragment = Self::create(CreateFragment {
                content: chunk,
                topic: template.topic.clone(),
                keywords: template.keywords.clone(),
                fragment_type: template.fragment_type,
                importance: template.importance,
                source: template.source.clone(),
                agent_id: template.agent_id.clone(),
                is_anchor: template.is_anchor,
            });
            if let Some(prev) = fragments.last() {
                fragment.linked_to.push(prev.id.clone());
            }
            fragments.push(fragment);
        }
        fragments
    }
}

/// 16-hex prefix of SHA-256 over the redacted, truncated content
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Truncate to the content limit, char-boundary safe, appending the
/// ellipsis marker when anything was cut
pub fn truncate_content(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX_CONTENT_CHARS {
        return trimmed.to_string();
    }
    let keep = MAX_CONTENT_CHARS - ELLIPSIS.chars().count();
    let mut out: String = trimmed.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Greedy sentence-boundary chunking under `limit` chars. A single
/// over-long sentence is hard-split at the limit.
fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in text.split_inclusive(['.', '!', '?', '\n']) {
        let piece_len = piece.chars().count();
        let current_len = current.chars().count();

        if piece_len > limit {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            let chars: Vec<char> = piece.chars().collect();
            for window in chars.chunks(limit) {
                chunks.push(window.iter().collect::<String>().trim().to_string());
            }
            continue;
        }

        if current_len + piece_len > limit && !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(piece);
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}
