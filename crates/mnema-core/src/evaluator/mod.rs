//! Quality Evaluator (background worker)
//!
//! A single long-lived task that drains the `memory_evaluation` queue,
//! asks the LLM to score each newly stored fragment and writes the
//! verdict back: importance from the score (capped for downgrade and
//! discard actions) plus a rationale keyword. LLM unavailability drops
//! the job; there is no retry queue.
//!
//! `fact`, `procedure` and `error` fragments are never enqueued; they
//! carry their own provenance discipline.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::MemoryConfig;
use crate::index::{EvalJob, MemoryIndex};
use crate::llm::LlmClient;
use crate::memory::FragmentType;
use crate::storage::FragmentStore;

/// Verdict actions the evaluation prompt may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalAction {
    Keep,
    Downgrade,
    Discard,
}

#[derive(Debug, Deserialize)]
struct EvalVerdict {
    score: f64,
    rationale: String,
    action: EvalAction,
}

/// Importance cap applied per action
pub fn apply_action(score: f64, action: EvalAction) -> f64 {
    let score = score.clamp(0.0, 1.0);
    match action {
        EvalAction::Keep => score,
        EvalAction::Downgrade => score.min(0.3),
        EvalAction::Discard => score.min(0.1),
    }
}

/// Whether a fragment type is eligible for LLM evaluation
pub fn should_evaluate(fragment_type: FragmentType) -> bool {
    !fragment_type.excluded_from_evaluation()
}

fn evaluation_prompt(job: &EvalJob) -> String {
    format!(
        "You are auditing an agent memory store. Rate how useful this stored \
         fragment will be for future sessions.\n\n\
         Type: {}\nContent: {}\n\n\
         Reply with JSON: {{\"score\": <0.0-1.0>, \"rationale\": \"<one sentence>\", \
         \"action\": \"keep\"|\"downgrade\"|\"discard\"}}",
        job.fragment_type.as_str(),
        job.content
    )
}

// ============================================================================
// WORKER
// ============================================================================

/// The background evaluation worker
pub struct Evaluator {
    store: Arc<FragmentStore>,
    index: Arc<MemoryIndex>,
    llm: Arc<dyn LlmClient>,
    poll_interval: Duration,
    llm_timeout: Duration,
}

impl Evaluator {
    pub fn new(
        store: Arc<FragmentStore>,
        index: Arc<MemoryIndex>,
        llm: Arc<dyn LlmClient>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            store,
            index,
            llm,
            poll_interval: config.eval_poll_interval,
            llm_timeout: config.llm_timeout,
        }
    }

    /// Spawn the poll loop. The worker finishes its current job and exits
    /// when the shutdown signal flips.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Evaluator worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.index.pop_evaluation() {
                Some(job) => self.handle_job(job).await,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::info!("Evaluator worker stopped");
    }

    async fn handle_job(&self, job: EvalJob) {
        if !self.llm.is_available() {
            tracing::debug!("LLM unavailable, dropping evaluation for {}", job.fragment_id);
            return;
        }

        let Some(value) = self
            .llm
            .complete_json(&evaluation_prompt(&job), self.llm_timeout)
            .await
        else {
            tracing::debug!("Evaluation dropped for {} (no completion)", job.fragment_id);
            return;
        };

        let verdict: EvalVerdict = match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Evaluation verdict malformed for {}: {}", job.fragment_id, e);
                return;
            }
        };

        let importance = apply_action(verdict.score, verdict.action);
        if let Err(e) = self.store.set_importance(&job.fragment_id, importance) {
            tracing::warn!("Evaluation write-back failed for {}: {}", job.fragment_id, e);
            return;
        }
        let rationale = format!("Rationale: {}", verdict.rationale);
        if let Err(e) = self.store.append_keyword(&job.fragment_id, &rationale) {
            tracing::warn!("Rationale append failed for {}: {}", job.fragment_id, e);
        }

        tracing::debug!(
            fragment = %job.fragment_id,
            importance,
            action = ?verdict.action,
            "Evaluation applied"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DisabledEmbedder;
    use crate::memory::{CreateFragment, FragmentFactory};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    struct FixedLlm(Value);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete_json(&self, _prompt: &str, _timeout: Duration) -> Option<Value> {
            Some(self.0.clone())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn test_store() -> (Arc<FragmentStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FragmentStore::new(
            Some(dir.path().join("test.db")),
            Arc::new(DisabledEmbedder),
            8,
        )
        .unwrap();
        (Arc::new(store), dir)
    }

    #[test]
    fn test_apply_action_caps() {
        assert_eq!(apply_action(0.9, EvalAction::Keep), 0.9);
        assert_eq!(apply_action(0.9, EvalAction::Downgrade), 0.3);
        assert_eq!(apply_action(0.2, EvalAction::Downgrade), 0.2);
        assert_eq!(apply_action(0.9, EvalAction::Discard), 0.1);
        assert_eq!(apply_action(1.5, EvalAction::Keep), 1.0);
    }

    #[test]
    fn test_excluded_types() {
        assert!(!should_evaluate(FragmentType::Fact));
        assert!(!should_evaluate(FragmentType::Procedure));
        assert!(!should_evaluate(FragmentType::Error));
        assert!(should_evaluate(FragmentType::Decision));
        assert!(should_evaluate(FragmentType::Preference));
        assert!(should_evaluate(FragmentType::Relation));
    }

    #[tokio::test]
    async fn test_handle_job_writes_back() {
        let (store, _dir) = test_store();
        let index = Arc::new(MemoryIndex::default());
        let fragment = FragmentFactory::create(CreateFragment {
            content: "We will ship weekly from now on.".to_string(),
            topic: "process".to_string(),
            fragment_type: FragmentType::Decision,
            agent_id: "default".to_string(),
            ..Default::default()
        });
        store.insert(&fragment).unwrap();

        let llm = Arc::new(FixedLlm(json!({
            "score": 0.85,
            "rationale": "durable team decision",
            "action": "keep"
        })));
        let evaluator = Evaluator::new(store.clone(), index, llm, &MemoryConfig::default());
        evaluator
            .handle_job(EvalJob {
                fragment_id: fragment.id.clone(),
                agent_id: "default".to_string(),
                fragment_type: FragmentType::Decision,
                content: fragment.content.clone(),
            })
            .await;

        let after = store
            .get_by_id(&fragment.id, &crate::memory::AgentScope::maintenance())
            .unwrap()
            .unwrap();
        assert_eq!(after.importance, 0.85);
        assert!(after.keywords.iter().any(|k| k.starts_with("Rationale:")));
    }

    #[tokio::test]
    async fn test_discard_action_floors_importance() {
        let (store, _dir) = test_store();
        let index = Arc::new(MemoryIndex::default());
        let fragment = FragmentFactory::create(CreateFragment {
            content: "Lunch was pasta today.".to_string(),
            topic: "noise".to_string(),
            fragment_type: FragmentType::Relation,
            agent_id: "default".to_string(),
            ..Default::default()
        });
        store.insert(&fragment).unwrap();

        let llm = Arc::new(FixedLlm(json!({
            "score": 0.7,
            "rationale": "not actionable",
            "action": "discard"
        })));
        let evaluator = Evaluator::new(store.clone(), index, llm, &MemoryConfig::default());
        evaluator
            .handle_job(EvalJob {
                fragment_id: fragment.id.clone(),
                agent_id: "default".to_string(),
                fragment_type: FragmentType::Relation,
                content: fragment.content.clone(),
            })
            .await;

        let after = store
            .get_by_id(&fragment.id, &crate::memory::AgentScope::maintenance())
            .unwrap()
            .unwrap();
        assert_eq!(after.importance, 0.1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let (store, _dir) = test_store();
        let index = Arc::new(MemoryIndex::default());
        let evaluator = Evaluator::new(
            store,
            index,
            Arc::new(crate::llm::DisabledLlm),
            &MemoryConfig {
                eval_poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let (tx, rx) = watch::channel(false);
        let handle = evaluator.spawn(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop on shutdown")
            .unwrap();
    }
}
