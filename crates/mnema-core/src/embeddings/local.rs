//! Local embedding provider
//!
//! fastembed (ONNX) inference behind the `Embedder` trait. The model loads
//! once into a process-wide singleton; a load failure is remembered so
//! later calls short-circuit instead of retrying the download.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, MutexGuard, OnceLock};

use super::{normalize, Embedder};

/// Dimensions produced by nomic-embed-text-v1.5
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 768;

/// Maximum text length passed to the model (longer inputs are truncated)
pub const MAX_TEXT_LENGTH: usize = 8192;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "mnema", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<MutexGuard<'static, TextEmbedding>, String> {
    let result = MODEL.get_or_init(|| {
        let cache_dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create embedding cache dir {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "Failed to initialise nomic-embed-text-v1.5: {}. \
                Fragments will be stored without embeddings until the model loads.",
                e
            )
        })
    });

    match result {
        Ok(model) => model.lock().map_err(|e| format!("Model lock poisoned: {}", e)),
        Err(err) => Err(err.clone()),
    }
}

/// Embedder backed by the local fastembed model
pub struct LocalEmbedder;

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Force model initialisation (downloads on first run). Call during
    /// server startup, not in hot paths.
    pub fn init(&self) -> Result<(), String> {
        model().map(|_| ())
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.is_empty() {
            return None;
        }

        let mut model = match model() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Embedding skipped: {}", e);
                return None;
            }
        };

        let text = if text.len() > MAX_TEXT_LENGTH {
            let boundary = (0..=MAX_TEXT_LENGTH)
                .rev()
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(0);
            &text[..boundary]
        } else {
            text
        };

        match model.embed(vec![text], None) {
            Ok(mut vectors) if !vectors.is_empty() => {
                let mut vector = vectors.remove(0);
                normalize(&mut vector);
                Some(vector)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Embedding generation failed: {}", e);
                None
            }
        }
    }

    fn dimensions(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSIONS
    }

    fn is_ready(&self) -> bool {
        model().is_ok()
    }
}
