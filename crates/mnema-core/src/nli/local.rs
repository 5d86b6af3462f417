//! In-process NLI inference (`local-nli` feature)
//!
//! Loads a quantised multilingual NLI cross-encoder (mDeBERTa-v3 XNLI
//! ONNX export) once into a process singleton and serves inferences
//! synchronously. A load failure sets a permanent failed flag so every
//! later call short-circuits to `None`.
//!
//! Expects `MNEMA_NLI_MODEL_DIR` to contain `model.onnx` and
//! `tokenizer.json`.

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tokenizers::Tokenizer;

use super::{NliModel, NliScores};

/// mDeBERTa XNLI head order: entailment, neutral, contradiction
const LABEL_ENTAILMENT: usize = 0;
const LABEL_NEUTRAL: usize = 1;
const LABEL_CONTRADICTION: usize = 2;

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

static MODEL: OnceLock<Result<LoadedModel, String>> = OnceLock::new();

fn model_dir() -> Option<PathBuf> {
    std::env::var("MNEMA_NLI_MODEL_DIR").ok().map(PathBuf::from)
}

fn load() -> &'static Result<LoadedModel, String> {
    MODEL.get_or_init(|| {
        let dir = model_dir().ok_or_else(|| "MNEMA_NLI_MODEL_DIR is not set".to_string())?;

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| format!("tokenizer load failed: {}", e))?;

        let session = Session::builder()
            .map_err(|e| format!("session builder failed: {}", e))?
            .commit_from_file(dir.join("model.onnx"))
            .map_err(|e| format!("model load failed: {}", e))?;

        tracing::info!("Local NLI model loaded from {:?}", dir);
        Ok(LoadedModel {
            session: Mutex::new(session),
            tokenizer,
        })
    })
}

fn softmax3(logits: [f64; 3]) -> [f64; 3] {
    let max = logits.iter().cloned().fold(f64::MIN, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    [exps[0] / sum, exps[1] / sum, exps[2] / sum]
}

/// The in-process classifier
pub struct LocalNli;

impl LocalNli {
    pub fn new() -> Self {
        Self
    }

    fn infer(premise: &str, hypothesis: &str) -> Result<NliScores, String> {
        let loaded = match load() {
            Ok(m) => m,
            Err(e) => return Err(e.clone()),
        };

        let encoding = loaded
            .tokenizer
            .encode((premise.to_string(), hypothesis.to_string()), true)
            .map_err(|e| format!("tokenization failed: {}", e))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&x| x as i64)
            .collect();
        let len = ids.len();

        let input_ids =
            Tensor::from_array(([1usize, len], ids)).map_err(|e| format!("tensor: {}", e))?;
        let attention_mask =
            Tensor::from_array(([1usize, len], mask)).map_err(|e| format!("tensor: {}", e))?;

        let mut session = loaded
            .session
            .lock()
            .map_err(|_| "session lock poisoned".to_string())?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| format!("inference failed: {}", e))?;

        let (_, logits) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("logit extraction failed: {}", e))?;
        if logits.len() < 3 {
            return Err(format!("unexpected logit shape: {}", logits.len()));
        }

        let probabilities = softmax3([
            logits[LABEL_ENTAILMENT] as f64,
            logits[LABEL_NEUTRAL] as f64,
            logits[LABEL_CONTRADICTION] as f64,
        ]);

        Ok(NliScores {
            entailment: probabilities[LABEL_ENTAILMENT],
            neutral: probabilities[LABEL_NEUTRAL],
            contradiction: probabilities[LABEL_CONTRADICTION],
        })
    }
}

impl Default for LocalNli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NliModel for LocalNli {
    async fn classify(&self, premise: &str, hypothesis: &str) -> Option<NliScores> {
        match Self::infer(premise, hypothesis) {
            Ok(scores) => Some(scores),
            Err(e) => {
                tracing::debug!("Local NLI unavailable: {}", e);
                None
            }
        }
    }

    fn is_available(&self) -> bool {
        load().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax3([1.0, 2.0, 3.0]);
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }
}
