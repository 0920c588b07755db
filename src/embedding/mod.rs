//! Process-wide embedding service.
//!
//! Wraps a fastembed text encoder (nomic-embed-text-v1.5, 768 dimensions,
//! unit-norm output) behind a lazily initialized singleton so concurrent
//! first callers do not duplicate the model load. Embedding failures return
//! `None` rather than erroring; callers own retry/backoff policy via
//! [`embed_with_retry`].

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::task::spawn_blocking;

use crate::types::{AppError, Result};

/// Dimension of the issue corpus and profile vectors.
pub const EMBEDDING_DIM: usize = 768;

/// Retry attempts for source-vector generation.
pub const MAX_RETRIES: u32 = 3;
/// Base backoff for retries; doubles per attempt.
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Text embedding service producing unit-L2-norm 768-dim vectors.
///
/// The underlying fastembed model is synchronous and requires `&mut`, so all
/// embed calls run under `spawn_blocking` with the model behind a mutex.
pub struct EmbeddingService {
    model: Arc<Mutex<Option<TextEmbedding>>>,
}

impl EmbeddingService {
    /// Load the embedding model. Blocking work (model load, possible first
    /// time download) is offloaded to the blocking pool.
    pub async fn new() -> Result<Self> {
        let model = spawn_blocking(|| {
            TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                    .with_show_download_progress(false),
            )
            .map_err(|e| AppError::Internal(format!("Failed to initialize embedding model: {}", e)))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))??;

        Ok(Self {
            model: Arc::new(Mutex::new(Some(model))),
        })
    }

    /// Embed a single text. Returns `None` on any failure.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .flatten()
    }

    /// Embed a batch of texts. The result has one entry per input; entries
    /// are `None` where embedding failed or the service was shut down.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let model = Arc::clone(&self.model);
        let texts_owned: Vec<String> = texts.to_vec();
        let count = texts_owned.len();

        let result = spawn_blocking(move || {
            let mut guard = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let model = guard
                .as_mut()
                .ok_or_else(|| AppError::Internal("embedding service closed".to_string()))?;

            let refs: Vec<&str> = texts_owned.iter().map(|s| s.as_str()).collect();
            model
                .embed(refs, None)
                .map_err(|e| AppError::Internal(format!("Embedding failed: {}", e)))
        })
        .await;

        match result {
            Ok(Ok(vectors)) => vectors
                .into_iter()
                .map(|v| {
                    if v.len() == EMBEDDING_DIM && v.iter().all(|x| x.is_finite()) {
                        Some(v)
                    } else {
                        tracing::warn!(dim = v.len(), "discarding malformed embedding");
                        None
                    }
                })
                .collect(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "batch embedding failed");
                vec![None; count]
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding task panicked or was cancelled");
                vec![None; count]
            }
        }
    }

    /// Release the model. Subsequent embed calls return `None`.
    pub fn close(&self) {
        let mut guard = self
            .model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            tracing::info!("embedding service closed");
        }
    }
}

// ============= Singleton Access =============

static EMBEDDER_CELL: OnceLock<Arc<EmbeddingService>> = OnceLock::new();
static INIT_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Return the singleton embedding service, initializing it on first call.
///
/// Double-checked: the fast path reads the cell without locking; the slow
/// path re-checks under the init mutex so concurrent first callers load the
/// model exactly once.
pub async fn get_embedder() -> Result<Arc<EmbeddingService>> {
    if let Some(embedder) = EMBEDDER_CELL.get() {
        return Ok(Arc::clone(embedder));
    }

    let _guard = INIT_LOCK.lock().await;
    if let Some(embedder) = EMBEDDER_CELL.get() {
        return Ok(Arc::clone(embedder));
    }

    tracing::info!("initializing embedding service singleton");
    let service = Arc::new(EmbeddingService::new().await?);
    let _ = EMBEDDER_CELL.set(Arc::clone(&service));
    Ok(service)
}

/// Embed a single query text via the singleton. Returns `None` on failure
/// (including singleton initialization failure).
pub async fn embed_query(text: &str) -> Option<Vec<f32>> {
    match get_embedder().await {
        Ok(embedder) => embedder.embed(text).await,
        Err(e) => {
            tracing::warn!(error = %e, "embedder unavailable");
            None
        }
    }
}

/// Release singleton resources. Called on shutdown.
pub fn close_embedder() {
    if let Some(embedder) = EMBEDDER_CELL.get() {
        embedder.close();
    }
}

/// Validate the dimension and finiteness of an externally sourced vector.
pub fn assert_vector_dim(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(AppError::InvalidInput(format!(
            "expected {}-dim vector, got {}",
            EMBEDDING_DIM,
            vector.len()
        )));
    }
    if !vector.iter().all(|x| x.is_finite()) {
        return Err(AppError::InvalidInput(
            "vector contains non-finite components".to_string(),
        ));
    }
    Ok(())
}

/// Generate an embedding under an exponential-backoff loop (base 1 s,
/// factor 2, up to [`MAX_RETRIES`] attempts). Final failure logs and returns
/// `None` without raising.
pub async fn embed_with_retry(text: &str) -> Option<Vec<f32>> {
    for attempt in 0..MAX_RETRIES {
        if let Some(vector) = embed_query(text).await {
            return Some(vector);
        }

        tracing::warn!(
            attempt = attempt + 1,
            max = MAX_RETRIES,
            "embedding attempt returned no vector"
        );

        if attempt < MAX_RETRIES - 1 {
            let backoff = BASE_BACKOFF * 2u32.pow(attempt);
            tokio::time::sleep(backoff).await;
        }
    }

    tracing::error!("embedding permanently failed after {} attempts", MAX_RETRIES);
    None
}
