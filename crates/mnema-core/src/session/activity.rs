//! Session Activity Tracker
//!
//! Per-session rolling documents: tool-call counts, recent keywords and
//! fragment ids, and a reflected flag. Entries expire after 24 hours;
//! the scan helper surfaces sessions that closed without a reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Activity document lifetime
pub const ACTIVITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Bound on the keyword list (most recent, unique)
pub const MAX_TRACKED_KEYWORDS: usize = 50;

/// Bound on the fragment list (most recent, unique)
pub const MAX_TRACKED_FRAGMENTS: usize = 100;

/// A session's rolling activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivity {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub tool_calls: HashMap<String, u64>,
    pub keywords: Vec<String>,
    pub fragments: Vec<String>,
    pub reflected: bool,
}

impl SessionActivity {
    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            started_at: now,
            last_activity: now,
            tool_calls: HashMap::new(),
            keywords: Vec::new(),
            fragments: Vec::new(),
            reflected: false,
        }
    }

    /// Compact per-tool summary like `remember:3, recall:7`
    pub fn tool_summary(&self) -> String {
        let mut entries: Vec<(&String, &u64)> = self.tool_calls.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        entries
            .iter()
            .map(|(tool, count)| format!("{}:{}", tool, count))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Total number of recorded tool calls
    pub fn total_calls(&self) -> u64 {
        self.tool_calls.values().sum()
    }
}

/// Shared tracker over all live sessions
#[derive(Default)]
pub struct ActivityTracker {
    sessions: RwLock<HashMap<String, (SessionActivity, Instant)>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch<F>(&self, session_id: &str, mutate: F)
    where
        F: FnOnce(&mut SessionActivity),
    {
        let Ok(mut sessions) = self.sessions.write() else { return };
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| (SessionActivity::new(session_id), Instant::now() + ACTIVITY_TTL));
        mutate(&mut entry.0);
        entry.0.last_activity = Utc::now();
        entry.1 = Instant::now() + ACTIVITY_TTL;
    }

    /// Record one tool invocation
    pub fn record_tool_call(&self, session_id: &str, tool: &str) {
        self.touch(session_id, |activity| {
            *activity.tool_calls.entry(tool.to_string()).or_insert(0) += 1;
        });
    }

    /// Record query keywords (bounded, unique, most recent last)
    pub fn record_keywords(&self, session_id: &str, keywords: &[String]) {
        self.touch(session_id, |activity| {
            for kw in keywords {
                activity.keywords.retain(|k| k != kw);
                activity.keywords.push(kw.clone());
            }
            let overflow = activity.keywords.len().saturating_sub(MAX_TRACKED_KEYWORDS);
            if overflow > 0 {
                activity.keywords.drain(..overflow);
            }
        });
    }

    /// Record fragment ids touched by the session (bounded, unique)
    pub fn record_fragments(&self, session_id: &str, ids: &[String]) {
        self.touch(session_id, |activity| {
            for id in ids {
                activity.fragments.retain(|f| f != id);
                activity.fragments.push(id.clone());
            }
            let overflow = activity.fragments.len().saturating_sub(MAX_TRACKED_FRAGMENTS);
            if overflow > 0 {
                activity.fragments.drain(..overflow);
            }
        });
    }

    /// Mark a session as reflected
    pub fn mark_reflected(&self, session_id: &str) {
        self.touch(session_id, |activity| {
            activity.reflected = true;
        });
    }

    /// Fetch a session's activity if it has not expired
    pub fn get(&self, session_id: &str) -> Option<SessionActivity> {
        let sessions = self.sessions.read().ok()?;
        match sessions.get(session_id) {
            Some((activity, expires)) if *expires > Instant::now() => Some(activity.clone()),
            _ => None,
        }
    }

    /// Up to `limit` sessions that have activity but no reflection yet
    pub fn unreflected_sessions(&self, limit: usize) -> Vec<String> {
        let Ok(sessions) = self.sessions.read() else { return Vec::new() };
        let now = Instant::now();
        let mut ids: Vec<String> = sessions
            .values()
            .filter(|(activity, expires)| {
                *expires > now && !activity.reflected && !activity.tool_calls.is_empty()
            })
            .map(|(activity, _)| activity.session_id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);
        ids
    }

    /// Drop expired documents; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let Ok(mut sessions) = self.sessions.write() else { return 0 };
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, (_, expires)| *expires > now);
        before - sessions.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_get() {
        let tracker = ActivityTracker::new();
        tracker.record_tool_call("s1", "remember");
        tracker.record_tool_call("s1", "remember");
        tracker.record_tool_call("s1", "recall");

        let activity = tracker.get("s1").unwrap();
        assert_eq!(activity.tool_calls.get("remember"), Some(&2));
        assert_eq!(activity.total_calls(), 3);
        assert!(!activity.reflected);
        assert!(tracker.get("s2").is_none());
    }

    #[test]
    fn test_tool_summary_sorted_by_count() {
        let tracker = ActivityTracker::new();
        tracker.record_tool_call("s1", "recall");
        tracker.record_tool_call("s1", "recall");
        tracker.record_tool_call("s1", "remember");

        let summary = tracker.get("s1").unwrap().tool_summary();
        assert!(summary.starts_with("recall:2"));
        assert!(summary.contains("remember:1"));
    }

    #[test]
    fn test_keyword_bound_and_uniqueness() {
        let tracker = ActivityTracker::new();
        for i in 0..60 {
            tracker.record_keywords("s1", &[format!("kw{}", i)]);
        }
        // Re-record an early keyword; it moves to the end instead of duplicating
        tracker.record_keywords("s1", &["kw59".to_string()]);

        let activity = tracker.get("s1").unwrap();
        assert_eq!(activity.keywords.len(), MAX_TRACKED_KEYWORDS);
        assert_eq!(activity.keywords.last().unwrap(), "kw59");
        assert_eq!(
            activity
                .keywords
                .iter()
                .filter(|k| k.as_str() == "kw59")
                .count(),
            1
        );
    }

    #[test]
    fn test_fragment_bound() {
        let tracker = ActivityTracker::new();
        let ids: Vec<String> = (0..120).map(|i| format!("frag-{:016x}", i)).collect();
        tracker.record_fragments("s1", &ids);
        let activity = tracker.get("s1").unwrap();
        assert_eq!(activity.fragments.len(), MAX_TRACKED_FRAGMENTS);
        assert_eq!(activity.fragments.last().unwrap(), &ids[119]);
    }

    #[test]
    fn test_unreflected_scan() {
        let tracker = ActivityTracker::new();
        tracker.record_tool_call("busy", "remember");
        tracker.record_tool_call("done", "remember");
        tracker.mark_reflected("done");
        // A session with no tool calls is not surfaced
        tracker.record_keywords("idle", &["kw".to_string()]);

        let unreflected = tracker.unreflected_sessions(10);
        assert_eq!(unreflected, vec!["busy".to_string()]);
    }

    #[test]
    fn test_sweep_noop_when_fresh() {
        let tracker = ActivityTracker::new();
        tracker.record_tool_call("s1", "remember");
        assert_eq!(tracker.sweep_expired(), 0);
        assert!(tracker.get("s1").is_some());
    }
}
