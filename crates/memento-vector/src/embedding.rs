//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` loads a sentence-transformer ONNX model via ort
//!   and tokenizes with the HuggingFace tokenizers crate. This is the
//!   production backend.
//! - `HashEmbedding` produces deterministic feature-hashed vectors: texts that
//!   share words land close together. Used in tests and offline runs.
//!
//! Every vector handed to the store must have the configured dimension;
//! [`embed_checked`] enforces that at the call sites.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use memento_core::error::MementoError;
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

/// Default dimension of stored embeddings.
pub const DEFAULT_DIMENSIONS: usize = 1024;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional, L2-normalized
/// vectors. The same service embeds stored decisions and retrieval queries.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, MementoError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not object-safe.
/// A blanket implementation boxes the future so that every `EmbeddingService`
/// can be held as `Arc<dyn DynEmbeddingService>`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, MementoError>> + Send + 'a>,
    >;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, MementoError>> + Send + 'a>,
    > {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Embed `text` and reject vectors whose length is not `expected`.
pub async fn embed_checked(
    embedder: &dyn DynEmbeddingService,
    text: &str,
    expected: usize,
) -> Result<Vec<f32>, MementoError> {
    let vector = embedder.embed_boxed(text).await?;
    if vector.len() != expected {
        return Err(MementoError::EmbeddingDimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

fn embedding_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> MementoError {
    move |e| MementoError::Embedding(format!("{}: {}", context, e))
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - real ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding service using a sentence-transformer model.
///
/// The model must accept `input_ids`, `attention_mask` and `token_type_ids`
/// as i64 inputs and produce token-level embeddings; masked mean pooling
/// reduces them to one vector per input.
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load from explicit model and tokenizer file paths.
    ///
    /// `expected_dimensions` is the configured store dimension; a model whose
    /// declared hidden size differs is refused at load time.
    pub fn from_files(
        model_path: &Path,
        tokenizer_path: &Path,
        expected_dimensions: usize,
    ) -> Result<Self, MementoError> {
        if !model_path.exists() {
            return Err(MementoError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(MementoError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| MementoError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| MementoError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| MementoError::Embedding(format!("ONNX load model: {}", e)))?;

        // Output is [batch, seq_len, hidden]; a dynamic hidden size reports <= 0.
        let declared = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map(|d| d as usize);

        if let Some(declared) = declared {
            if declared != expected_dimensions {
                return Err(MementoError::EmbeddingDimension {
                    expected: expected_dimensions,
                    actual: declared,
                });
            }
        }

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| MementoError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimensions = expected_dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions: expected_dimensions,
        })
    }

    /// Tokenize, run inference, and mean-pool the output.
    fn embed_sync(
        session: &Mutex<Session>,
        tokenizer: &Tokenizer,
        text: &str,
    ) -> Result<Vec<f32>, MementoError> {
        if text.trim().is_empty() {
            return Err(MementoError::Embedding("Cannot embed empty text".to_string()));
        }

        let encoding = tokenizer
            .encode(text, true)
            .map_err(|e| MementoError::Embedding(format!("Tokenization failed: {}", e)))?;

        let to_i64 = |v: &[u32]| v.iter().map(|&x| x as i64).collect::<Vec<i64>>();
        let input_ids = to_i64(encoding.get_ids());
        let attention_mask = to_i64(encoding.get_attention_mask());
        let token_type_ids = to_i64(encoding.get_type_ids());
        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(embedding_err("input_ids array"))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(embedding_err("attention_mask array"))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(embedding_err("token_type_ids array"))?;

        let ids_ref =
            TensorRef::from_array_view(&ids_array).map_err(embedding_err("input_ids tensor"))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(embedding_err("attention_mask tensor"))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(embedding_err("token_type_ids tensor"))?;

        let mut session = session
            .lock()
            .map_err(|e| MementoError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| MementoError::Embedding(format!("ONNX inference failed: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MementoError::Embedding(format!("Extract embeddings: {}", e)))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [.., _, last] => *last as usize,
            other => {
                return Err(MementoError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    other
                )))
            }
        };

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;
        for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
            if mask_val > 0 {
                let token = &data[tok_idx * hidden_dim..(tok_idx + 1) * hidden_dim];
                for (acc, v) in pooled.iter_mut().zip(token) {
                    *acc += v;
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            for val in &mut pooled {
                *val /= count;
            }
        }

        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MementoError> {
        // Inference is CPU-bound; run on a blocking thread.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let text_owned = text.to_string();

        tokio::task::spawn_blocking(move || Self::embed_sync(&session, &tokenizer, &text_owned))
            .await
            .map_err(|e| MementoError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding - deterministic feature-hashed vectors
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedding using the hashing trick.
///
/// Each lowercase alphanumeric token adds a signed unit to one bucket. The
/// result is L2-normalized, so cosine similarity reflects shared vocabulary
/// and identical texts score exactly 1.0.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MementoError> {
        if !text.chars().any(char::is_alphanumeric) {
            return Err(MementoError::Embedding(
                "Cannot embed text without any tokens".to_string(),
            ));
        }
        Ok(self.vector_for(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
