//! PII Redaction
//!
//! Four ordered, destructive substitutions applied to fragment content
//! before hashing and storage. Topic, keywords and source are never
//! redacted. Originals are never stored.

use regex::Regex;
use std::sync::LazyLock;

/// API keys: OpenAI-style `sk-...` and Google-style `AIza...`
static API_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sk-[A-Za-z0-9]{32,}|AIza[0-9A-Za-z_-]{35}").expect("api key pattern")
});

/// RFC-5321 address, pragmatic form
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

/// Password assignments, English and Korean keyword variants
static PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|passwd|pwd|비밀번호|비번)\s*[:=]\s*\S+").expect("password pattern")
});

/// Korean mobile numbers (010/011/016/017/018/019)
static PHONE_KR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"01[016789][-\s]?\d{3,4}[-\s]?\d{4}").expect("phone pattern")
});

/// Apply the four substitutions in order. Idempotent: redacting an
/// already-redacted string is a no-op.
pub fn redact(content: &str) -> String {
    let s = API_KEY.replace_all(content, "[REDACTED_API_KEY]");
    let s = EMAIL.replace_all(&s, "[REDACTED_EMAIL]");
    let s = PASSWORD.replace_all(&s, "$1: [REDACTED_PWD]");
    let s = PHONE_KR.replace_all(&s, "[REDACTED_PHONE]");
    s.into_owned()
}
