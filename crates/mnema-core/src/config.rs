//! Memory configuration
//!
//! All tunables in one place, overridable from the environment. The
//! ranking weights must sum to 1; `validate` enforces that at startup.

use std::time::Duration;

/// Configuration for the memory subsystem
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Composite score coefficient for importance
    pub importance_weight: f64,
    /// Composite score coefficient for recency
    pub recency_weight: f64,
    /// Store size at which composite ranking turns on
    pub activation_threshold: i64,
    /// Days since verification before a procedure is marked stale
    pub stale_procedure_days: i64,
    /// Days since verification before a fact is marked stale
    pub stale_fact_days: i64,
    /// Days since verification before a decision is marked stale
    pub stale_decision_days: i64,
    /// Staleness window for every other type
    pub stale_default_days: i64,
    /// One-hop cap when expanding linked fragments
    pub linked_fragment_limit: usize,
    /// Working-memory token ceiling per session
    pub wm_max_tokens: i64,
    /// Default recall token budget
    pub default_token_budget: i64,
    /// Default context token budget
    pub context_token_budget: i64,
    /// Minimum cosine similarity admitted by the semantic tier
    pub min_similarity: f32,
    /// Row limit for the durable keyword tier
    pub l2_limit: usize,
    /// Row limit for the semantic tier
    pub l3_limit: usize,
    /// Keyword-set cap enforced by index pruning
    pub max_keyword_set: usize,
    /// Evaluator poll cadence when its queue is empty
    pub eval_poll_interval: Duration,
    /// LLM JSON completion timeout
    pub llm_timeout: Duration,
    /// External NLI classification timeout
    pub nli_timeout: Duration,
    /// Embedding dimensionality; must agree with the vector index
    pub embedding_dims: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            importance_weight: 0.6,
            recency_weight: 0.4,
            activation_threshold: 100,
            stale_procedure_days: 30,
            stale_fact_days: 60,
            stale_decision_days: 90,
            stale_default_days: 60,
            linked_fragment_limit: 10,
            wm_max_tokens: 500,
            default_token_budget: 1000,
            context_token_budget: 2000,
            min_similarity: 0.3,
            l2_limit: 30,
            l3_limit: 10,
            max_keyword_set: 1000,
            eval_poll_interval: Duration::from_secs(5),
            llm_timeout: Duration::from_secs(30),
            nli_timeout: Duration::from_secs(3),
            embedding_dims: 768,
        }
    }
}

impl MemoryConfig {
    /// Load the default configuration with environment overrides
    /// (`MNEMA_*` variables)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<f64>("MNEMA_IMPORTANCE_WEIGHT") {
            config.importance_weight = v;
            config.recency_weight = 1.0 - v;
        }
        if let Some(v) = env_parse::<i64>("MNEMA_ACTIVATION_THRESHOLD") {
            config.activation_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("MNEMA_LINKED_FRAGMENT_LIMIT") {
            config.linked_fragment_limit = v;
        }
        if let Some(v) = env_parse::<i64>("MNEMA_WM_MAX_TOKENS") {
            config.wm_max_tokens = v;
        }
        if let Some(v) = env_parse::<usize>("MNEMA_EMBEDDING_DIMS") {
            config.embedding_dims = v;
        }
        config
    }

    /// Staleness window for a fragment type
    pub fn stale_days(&self, fragment_type: crate::memory::FragmentType) -> i64 {
        use crate::memory::FragmentType;
        match fragment_type {
            FragmentType::Procedure => self.stale_procedure_days,
            FragmentType::Fact => self.stale_fact_days,
            FragmentType::Decision => self.stale_decision_days,
            _ => self.stale_default_days,
        }
    }

    /// Check the invariants the ranking formula depends on
    pub fn validate(&self) -> Result<(), String> {
        if (self.importance_weight + self.recency_weight - 1.0).abs() > 1e-9 {
            return Err(format!(
                "ranking weights must sum to 1 (importance {} + recency {})",
                self.importance_weight, self.recency_weight
            ));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err("min_similarity must be in [0, 1]".to_string());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let config = MemoryConfig {
            importance_weight: 0.9,
            recency_weight: 0.4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
