//! Embedding provider interfaces.
//!
//! The retriever never looks inside an embedding model. It talks to one through
//! [`EmbeddingProvider`], a two-capability interface:
//!
//! - [`EmbeddingProvider::encode_queries`] embeds free-text queries.
//! - [`EmbeddingProvider::encode_corpus`] embeds corpus records; joining title and
//!   body into one input is the provider's job.
//!
//! Both must return one row per input, in input order.
//!
//! Simple single-text models implement [`Embedder`] instead and get the provider
//! capabilities through the blanket impl below, which joins `title + " " + text` and
//! feeds the model in `batch_size` slices.

use crate::model::types::Document;

/// Errors raised by embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedder unavailable: {0}")]
    Unavailable(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("malformed embedding output: {0}")]
    MalformedOutput(String),
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Per-call hints passed to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Preferred number of texts per model invocation.
    pub batch_size: usize,
    /// Whether the provider may draw its own progress output.
    pub show_progress: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            batch_size: 128,
            show_progress: false,
        }
    }
}

/// A text embedding model producing fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;

    /// Stable identifier; embeddings from different ids are never mixed in a cache.
    fn id(&self) -> &str;

    fn is_semantic(&self) -> bool;
}

/// The query/corpus capability pair consumed by the search facade.
pub trait EmbeddingProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    fn output_dimension(&self) -> usize;

    fn encode_queries(
        &self,
        queries: &[&str],
        options: &EncodeOptions,
    ) -> EmbedderResult<Vec<Vec<f32>>>;

    fn encode_corpus(
        &self,
        documents: &[&Document],
        options: &EncodeOptions,
    ) -> EmbedderResult<Vec<Vec<f32>>>;
}

/// Text fed to a single-text model for a corpus record.
pub fn corpus_record_text(doc: &Document) -> String {
    format!("{} {}", doc.title, doc.text)
}

impl<E: Embedder> EmbeddingProvider for E {
    fn provider_id(&self) -> &str {
        self.id()
    }

    fn output_dimension(&self) -> usize {
        self.dimension()
    }

    fn encode_queries(
        &self,
        queries: &[&str],
        options: &EncodeOptions,
    ) -> EmbedderResult<Vec<Vec<f32>>> {
        embed_in_batches(self, queries, options.batch_size)
    }

    fn encode_corpus(
        &self,
        documents: &[&Document],
        options: &EncodeOptions,
    ) -> EmbedderResult<Vec<Vec<f32>>> {
        let texts: Vec<String> = documents.iter().map(|d| corpus_record_text(d)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        embed_in_batches(self, &refs, options.batch_size)
    }
}

fn embed_in_batches<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[&str],
    batch_size: usize,
) -> EmbedderResult<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embedder.embed_batch(batch)?;
        if vectors.len() != batch.len() {
            return Err(EmbedderError::MalformedOutput(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}
