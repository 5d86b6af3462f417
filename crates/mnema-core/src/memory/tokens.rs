//! Token counting
//!
//! Uses the `cl100k_base` tokenizer when it initialises, falling back to a
//! `ceil(len / 4)` character approximation process-wide. Initialisation
//! failure is logged once and degrades silently.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn tokenizer() -> Option<&'static CoreBPE> {
    TOKENIZER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!("cl100k_base tokenizer unavailable, using char/4 estimate: {}", e);
                None
            }
        })
        .as_ref()
}

/// Estimate the token count of `text`
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    match tokenizer() {
        Some(bpe) => bpe.encode_ordinary(text).len() as i64,
        None => text.len().div_ceil(4) as i64,
    }
}

/// The char/4 approximation on its own, used for working-memory entries
/// where exact counts are not worth the tokenizer round-trip
pub fn approximate_tokens(text: &str) -> i64 {
    text.len().div_ceil(4) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(approximate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_is_positive_for_text() {
        let n = estimate_tokens("Redis NOAUTH indicates missing REDIS_PASSWORD.");
        assert!(n > 0);
        assert!(n < 64);
    }

    #[test]
    fn test_approximation_rounds_up() {
        assert_eq!(approximate_tokens("abc"), 1);
        assert_eq!(approximate_tokens("abcd"), 1);
        assert_eq!(approximate_tokens("abcde"), 2);
    }
}
