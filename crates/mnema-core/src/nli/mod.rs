//! NLI Classification
//!
//! Scores `(premise, hypothesis)` pairs into an
//! entailment/neutral/contradiction distribution. Two modes sit behind
//! the `NliModel` trait: an HTTP classifier endpoint and an optional
//! in-process quantised model (`local-nli` feature). Every failure path
//! collapses to `None`; the consolidation pipeline then falls through to
//! its LLM stage or the pending queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(feature = "local-nli")]
pub mod local;

// ============================================================================
// TYPES
// ============================================================================

/// The three NLI labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NliLabel {
    Entailment,
    Neutral,
    Contradiction,
}

/// Softmax distribution over the three labels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NliScores {
    pub entailment: f64,
    pub neutral: f64,
    pub contradiction: f64,
}

impl NliScores {
    /// The argmax label
    pub fn label(&self) -> NliLabel {
        if self.contradiction >= self.entailment && self.contradiction >= self.neutral {
            NliLabel::Contradiction
        } else if self.entailment >= self.neutral {
            NliLabel::Entailment
        } else {
            NliLabel::Neutral
        }
    }
}

/// Verdict of the threshold ladder over an NLI distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContradictionVerdict {
    pub contradicts: bool,
    pub confidence: f64,
    pub needs_escalation: bool,
    pub scores: NliScores,
}

/// Apply the fixed decision ladder to an NLI distribution.
///
/// High-confidence contradictions and entailments resolve directly; the
/// middle band escalates to the LLM stage.
pub fn detect_contradiction(scores: NliScores) -> ContradictionVerdict {
    let (contradicts, needs_escalation, confidence) = if scores.contradiction >= 0.8 {
        (true, false, scores.contradiction)
    } else if scores.entailment >= 0.6 {
        (false, false, scores.entailment)
    } else if scores.contradiction >= 0.5 {
        (true, true, scores.contradiction)
    } else if scores.contradiction >= 0.2 {
        (false, true, scores.contradiction)
    } else {
        (false, false, scores.entailment.max(scores.neutral))
    };

    ContradictionVerdict {
        contradicts,
        confidence,
        needs_escalation,
        scores,
    }
}

// ============================================================================
// MODEL SEAM
// ============================================================================

/// NLI inference seam. `None` means the classifier is unavailable for
/// this pair; callers never treat that as an error.
#[async_trait]
pub trait NliModel: Send + Sync {
    async fn classify(&self, premise: &str, hypothesis: &str) -> Option<NliScores>;

    /// Whether the backend is believed reachable/loaded
    fn is_available(&self) -> bool;
}

/// A classifier that is never available
pub struct DisabledNli;

#[async_trait]
impl NliModel for DisabledNli {
    async fn classify(&self, _premise: &str, _hypothesis: &str) -> Option<NliScores> {
        None
    }

    fn is_available(&self) -> bool {
        false
    }
}

// ============================================================================
// HTTP CLASSIFIER
// ============================================================================

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    premise: &'a str,
    hypothesis: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[allow(dead_code)]
    label: Option<String>,
    scores: NliScores,
}

/// Remote NLI classifier: POST `/classify` with a bounded timeout.
///
/// A connection-level failure marks the endpoint failed so later calls
/// short-circuit instead of re-paying the timeout.
pub struct HttpNli {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    failed: AtomicBool,
}

impl HttpNli {
    /// Build a classifier against `base_url` (the `/classify` path is
    /// appended)
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/classify", base_url.trim_end_matches('/')),
            timeout,
            failed: AtomicBool::new(false),
        }
    }

    /// Build from `MNEMA_NLI_URL`, if set
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let base_url = std::env::var("MNEMA_NLI_URL").ok()?;
        if base_url.is_empty() {
            return None;
        }
        Some(Self::new(&base_url, timeout))
    }
}

#[async_trait]
impl NliModel for HttpNli {
    async fn classify(&self, premise: &str, hypothesis: &str) -> Option<NliScores> {
        if self.failed.load(Ordering::SeqCst) {
            return None;
        }

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ClassifyRequest { premise, hypothesis })
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if e.is_connect() {
                    tracing::warn!("NLI endpoint unreachable, disabling: {}", e);
                    self.failed.store(true, Ordering::SeqCst);
                } else {
                    tracing::warn!("NLI classify failed: {}", e);
                }
                return None;
            }
        };

        match response.json::<ClassifyResponse>().await {
            Ok(body) => Some(body.scores),
            Err(e) => {
                tracing::warn!("NLI classify returned malformed body: {}", e);
                None
            }
        }
    }

    fn is_available(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// TESTS
// ============================================================================
