//! Batched corpus encoding.
//!
//! The corpus is fed to the provider in contiguous chunks of at most `chunk_size`
//! documents, one provider call per chunk, and the partial matrices are
//! concatenated in input order. Chunking only bounds peak memory per call; the
//! resulting matrix is identical for every chunk size.
//!
//! Any failing chunk fails the whole encode. Callers must not cache a matrix for
//! a corpus that was only partly encoded, and this function never returns one.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, info};

use super::embedder::{EmbedderError, EmbedderResult, EmbeddingProvider, EncodeOptions};
use super::matrix::EmbeddingMatrix;
use crate::model::types::Document;

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

pub struct BatchedCorpusEncoder<'a> {
    provider: &'a dyn EmbeddingProvider,
    chunk_size: usize,
    options: EncodeOptions,
}

impl<'a> BatchedCorpusEncoder<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider, chunk_size: usize, options: EncodeOptions) -> Self {
        Self {
            provider,
            chunk_size: chunk_size.max(1),
            options,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encode `documents` (already in matrix row order) into one matrix.
    pub fn encode_corpus(&self, documents: &[(&str, &Document)]) -> EmbedderResult<EmbeddingMatrix> {
        let dimension = self.provider.output_dimension();
        let mut matrix = EmbeddingMatrix::empty(dimension)
            .map_err(|e| EmbedderError::MalformedOutput(e.to_string()))?;
        if documents.is_empty() {
            return Ok(matrix);
        }

        let total_batches = documents.len().div_ceil(self.chunk_size);
        info!(
            documents = documents.len(),
            batches = total_batches,
            chunk_size = self.chunk_size,
            "encoding corpus in batches"
        );
        let progress = self.progress_bar(documents.len());

        for (batch_idx, chunk) in documents.chunks(self.chunk_size).enumerate() {
            debug!(batch = batch_idx + 1, of = total_batches, size = chunk.len(), "encoding batch");
            progress.set_message(format!("batch {}/{}", batch_idx + 1, total_batches));

            let docs: Vec<&Document> = chunk.iter().map(|(_, doc)| *doc).collect();
            let vectors = self.provider.encode_corpus(&docs, &self.options)?;
            if vectors.len() != chunk.len() {
                return Err(EmbedderError::MalformedOutput(format!(
                    "batch {}: expected {} vectors, got {}",
                    batch_idx + 1,
                    chunk.len(),
                    vectors.len()
                )));
            }
            let ids = chunk.iter().map(|(id, _)| (*id).to_string()).collect();
            let part = EmbeddingMatrix::from_rows(dimension, ids, vectors).map_err(|e| {
                EmbedderError::MalformedOutput(format!("batch {}: {e}", batch_idx + 1))
            })?;
            matrix
                .append(part)
                .map_err(|e| EmbedderError::MalformedOutput(e.to_string()))?;
            progress.inc(chunk.len() as u64);
        }

        progress.finish_and_clear();
        Ok(matrix)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} {bar:40.cyan/blue} {pos}/{len} docs {msg}")
        {
            pb.set_style(style.progress_chars("██░"));
        }
        pb
    }
}

/// Encode query texts in a single provider call, keeping caller order.
pub fn encode_queries(
    provider: &dyn EmbeddingProvider,
    ids: Vec<String>,
    texts: &[&str],
    options: &EncodeOptions,
) -> EmbedderResult<EmbeddingMatrix> {
    let dimension = provider.output_dimension();
    if texts.is_empty() {
        return EmbeddingMatrix::empty(dimension)
            .map_err(|e| EmbedderError::MalformedOutput(e.to_string()));
    }
    let vectors = provider.encode_queries(texts, options)?;
    if vectors.len() != texts.len() {
        return Err(EmbedderError::MalformedOutput(format!(
            "expected {} query vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    EmbeddingMatrix::from_rows(dimension, ids, vectors)
        .map_err(|e| EmbedderError::MalformedOutput(e.to_string()))
}
