//! Keyword extraction
//!
//! Lowercase, Unicode-aware tokenisation (Hangul included), bilingual
//! stopword removal, term-frequency ranking, top five.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Number of keywords returned when the caller does not supply any
pub const MAX_KEYWORDS: usize = 5;

/// Unicode word splitter; `\w` covers Hangul syllables
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern"));

/// Fixed bilingual stopword set (English + Korean)
static STOPWORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has",
    "have", "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to",
    "was", "were", "when", "which", "will", "with", "not", "no", "do", "does",
    "did", "can", "should", "would", "use", "using", "used",
    // Korean particles and fillers
    "은", "는", "이", "가", "을", "를", "의", "에", "에서", "으로", "로", "와", "과",
    "도", "만", "하다", "있다", "없다", "되다", "것", "수", "등", "및", "그", "저",
];

fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// Extract up to [`MAX_KEYWORDS`] keywords from free text.
///
/// Single-character Latin tokens and pure numbers are dropped along with
/// the stopword set; ties break on first appearance so extraction is
/// deterministic.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new(); // term -> (tf, first_pos)

    for (pos, m) in WORD.find_iter(&lowered).enumerate() {
        let term = m.as_str();
        if term.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if term.len() < 2 && term.is_ascii() {
            continue;
        }
        if is_stopword(term) {
            continue;
        }
        let entry = counts.entry(term.to_string()).or_insert((0, pos));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(term, _)| term)
        .collect()
}

/// Normalise caller-supplied keywords: lowercase, deduplicated, non-empty
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for kw in keywords {
        let k = kw.trim().to_lowercase();
        if !k.is_empty() && seen.insert(k.clone()) {
            out.push(k);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_top_terms_by_frequency() {
        let kws = extract_keywords(
            "Redis NOAUTH error: Redis requires REDIS_PASSWORD. Check the redis sentinel config.",
        );
        assert!(kws.contains(&"redis".to_string()));
        assert_eq!(kws[0], "redis"); // highest term frequency
        assert!(kws.len() <= MAX_KEYWORDS);
    }

    #[test]
    fn test_drops_stopwords_and_numbers() {
        let kws = extract_keywords("the pool size is 20 and the pool is full");
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.contains(&"is".to_string()));
        assert!(!kws.contains(&"20".to_string()));
        assert!(kws.contains(&"pool".to_string()));
    }

    #[test]
    fn test_handles_hangul() {
        let kws = extract_keywords("레디스 연결 오류는 레디스 설정 문제");
        assert!(kws.contains(&"레디스".to_string()));
        assert!(!kws.contains(&"는".to_string()));
    }

    #[test]
    fn test_deterministic_tie_break() {
        let a = extract_keywords("alpha beta gamma delta epsilon zeta");
        let b = extract_keywords("alpha beta gamma delta epsilon zeta");
        assert_eq!(a, b);
        assert_eq!(a.len(), MAX_KEYWORDS);
        assert_eq!(a[0], "alpha");
    }

    #[test]
    fn test_normalize_dedups_and_lowercases() {
        let input = vec![
            "Redis".to_string(),
            "redis".to_string(),
            "  NOAUTH ".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_keywords(&input), vec!["redis", "noauth"]);
    }
}
