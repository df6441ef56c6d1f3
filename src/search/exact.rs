//! Dense exact search facade.
//!
//! A search call walks a fixed sequence of states:
//!
//! ```text
//! Idle -> QueriesEncoded -> CorpusReady -> Scored -> Done
//! ```
//!
//! Any provider or internal error moves the call to `Failed` and is returned as a
//! [`SearchError`] naming the state it failed in. Cache read problems are misses and
//! cache write problems are logged; neither changes the result of a search.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::cache::{CorpusEmbeddingCache, Quantization};
use super::embedder::{EmbedderError, EmbeddingProvider, EncodeOptions};
use super::encoder::{self, BatchedCorpusEncoder, DEFAULT_CHUNK_SIZE};
use super::fingerprint::{Fingerprint, fingerprint};
use super::matrix::EmbeddingMatrix;
use super::ranker::{self, InvalidScoreFunction, ScoreFunction};
use crate::config::RetrieverConfig;
use crate::model::types::{Corpus, Query, ResultSet, ScoredDocument, corpus_row_order};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    QueriesEncoded,
    CorpusReady,
    Scored,
    Done,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchPhase::Idle => "idle",
            SearchPhase::QueriesEncoded => "queries_encoded",
            SearchPhase::CorpusReady => "corpus_ready",
            SearchPhase::Scored => "scored",
            SearchPhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidScoreFunction(#[from] InvalidScoreFunction),

    #[error("invalid queries: {0}")]
    InvalidQueries(String),

    #[error("embedding provider failed in state {phase}: {source}")]
    ProviderFailure {
        phase: SearchPhase,
        #[source]
        source: EmbedderError,
    },

    #[error("search failed in state {phase}: {cause:#}")]
    Failed {
        phase: SearchPhase,
        cause: anyhow::Error,
    },
}

impl SearchError {
    /// State the search was in when it failed, if it got past validation.
    pub fn phase(&self) -> Option<SearchPhase> {
        match self {
            SearchError::ProviderFailure { phase, .. } | SearchError::Failed { phase, .. } => {
                Some(*phase)
            }
            _ => None,
        }
    }
}

/// Exact nearest-neighbor search over a corpus with a fingerprint-keyed embedding cache.
///
/// The searcher holds no per-corpus state, so one instance can serve any number of
/// corpora; repeated searches of an unchanged corpus are served from the cache.
pub struct DenseExactSearch {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<CorpusEmbeddingCache>,
    batch_size: usize,
    chunk_size: usize,
    show_progress: bool,
}

impl DenseExactSearch {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let defaults = EncodeOptions::default();
        Self {
            provider,
            cache: None,
            batch_size: defaults.batch_size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            show_progress: defaults.show_progress,
        }
    }

    /// Searcher configured from a [`RetrieverConfig`], caching under its cache root.
    pub fn from_config(
        provider: Arc<dyn EmbeddingProvider>,
        config: &RetrieverConfig,
    ) -> Result<Self, crate::config::ConfigError> {
        let root = config.cache_root()?;
        Ok(Self::new(provider)
            .with_cache_dir(root, config.quantization)
            .with_batch_size(config.batch_size)
            .with_chunk_size(config.corpus_chunk_size)
            .with_progress(config.show_progress))
    }

    pub fn with_cache(mut self, cache: CorpusEmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Cache under `root`, namespaced by this searcher's provider id.
    pub fn with_cache_dir(self, root: impl AsRef<Path>, quantization: Quantization) -> Self {
        let cache = CorpusEmbeddingCache::new(root, self.provider.provider_id(), quantization);
        self.with_cache(cache)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn cache(&self) -> Option<&CorpusEmbeddingCache> {
        self.cache.as_ref()
    }

    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            batch_size: self.batch_size,
            show_progress: self.show_progress,
        }
    }

    /// Rank `corpus` against every query and return up to `top_k` hits per query id.
    pub fn search(
        &self,
        corpus: &Corpus,
        queries: &[Query],
        top_k: usize,
        score_function: ScoreFunction,
        return_sorted: bool,
    ) -> Result<ResultSet, SearchError> {
        self.search_inner(corpus, None, queries, top_k, score_function, return_sorted)
    }

    /// Like [`search`](Self::search) with the score function given by name
    /// (`cos_sim` or `dot`). An unknown name fails before any encoding work.
    pub fn search_by_name(
        &self,
        corpus: &Corpus,
        queries: &[Query],
        top_k: usize,
        score_function: &str,
        return_sorted: bool,
    ) -> Result<ResultSet, SearchError> {
        let score_function: ScoreFunction = score_function.parse()?;
        self.search(corpus, queries, top_k, score_function, return_sorted)
    }

    /// Search with a fingerprint the caller already computed for `corpus`.
    pub(crate) fn search_with_fingerprint(
        &self,
        corpus: &Corpus,
        corpus_fingerprint: &Fingerprint,
        queries: &[Query],
        top_k: usize,
        score_function: ScoreFunction,
        return_sorted: bool,
    ) -> Result<ResultSet, SearchError> {
        self.search_inner(
            corpus,
            Some(corpus_fingerprint),
            queries,
            top_k,
            score_function,
            return_sorted,
        )
    }

    fn search_inner(
        &self,
        corpus: &Corpus,
        corpus_fingerprint: Option<&Fingerprint>,
        queries: &[Query],
        top_k: usize,
        score_function: ScoreFunction,
        return_sorted: bool,
    ) -> Result<ResultSet, SearchError> {
        validate_queries(queries)?;
        let mut results: ResultSet = queries
            .iter()
            .map(|q| (q.id.clone(), Vec::new()))
            .collect();
        if queries.is_empty() || top_k == 0 {
            return Ok(results);
        }

        let start = Instant::now();
        let mut phase = SearchPhase::Idle;
        let options = self.encode_options();

        let ids = queries.iter().map(|q| q.id.clone()).collect();
        let texts: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
        let query_matrix = encoder::encode_queries(self.provider.as_ref(), ids, &texts, &options)
            .map_err(|source| SearchError::ProviderFailure { phase, source })?;
        advance(&mut phase, SearchPhase::QueriesEncoded);

        let corpus_matrix = self.corpus_matrix(corpus, corpus_fingerprint, &options, phase)?;
        advance(&mut phase, SearchPhase::CorpusReady);

        let ranked = ranker::rank(
            &query_matrix,
            &corpus_matrix,
            score_function,
            top_k,
            return_sorted,
        )
        .map_err(|cause| SearchError::Failed { phase, cause })?;
        advance(&mut phase, SearchPhase::Scored);

        for (query_id, hits) in query_matrix.ids().iter().zip(ranked) {
            let entry = results.entry(query_id.clone()).or_default();
            for hit in hits {
                let Some(doc_id) = corpus_matrix.id(hit.row) else {
                    return Err(SearchError::Failed {
                        phase,
                        cause: anyhow::anyhow!("ranked row {} outside corpus matrix", hit.row),
                    });
                };
                entry.push(ScoredDocument {
                    id: doc_id.to_string(),
                    score: hit.score,
                });
            }
        }
        advance(&mut phase, SearchPhase::Done);

        info!(
            queries = queries.len(),
            corpus = corpus.len(),
            top_k,
            score_function = %score_function,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(results)
    }

    /// Corpus embeddings from the cache, or freshly encoded and then cached.
    fn corpus_matrix(
        &self,
        corpus: &Corpus,
        corpus_fingerprint: Option<&Fingerprint>,
        options: &EncodeOptions,
        phase: SearchPhase,
    ) -> Result<EmbeddingMatrix, SearchError> {
        let dimension = self.provider.output_dimension();
        let rows = corpus_row_order(corpus);

        let Some(cache) = &self.cache else {
            return self.encode_rows(&rows, options, phase);
        };

        let computed;
        let fp = match corpus_fingerprint {
            Some(fp) => fp,
            None => {
                computed = fingerprint(corpus);
                &computed
            }
        };

        if let Some(matrix) = cache.load(fp, dimension) {
            if matrix.len() == rows.len() {
                info!(fingerprint = fp.short(), rows = matrix.len(), "corpus cache hit");
                return Ok(matrix);
            }
            warn!(
                fingerprint = fp.short(),
                cached = matrix.len(),
                expected = rows.len(),
                "cached corpus matrix has the wrong row count; re-encoding"
            );
        }

        let matrix = self.encode_rows(&rows, options, phase)?;
        if let Err(e) = cache.save(fp, &matrix) {
            warn!(
                fingerprint = fp.short(),
                "failed to save corpus embeddings: {e:#}"
            );
        }
        Ok(matrix)
    }

    fn encode_rows(
        &self,
        rows: &[(&str, &crate::model::types::Document)],
        options: &EncodeOptions,
        phase: SearchPhase,
    ) -> Result<EmbeddingMatrix, SearchError> {
        BatchedCorpusEncoder::new(self.provider.as_ref(), self.chunk_size, *options)
            .encode_corpus(rows)
            .map_err(|source| SearchError::ProviderFailure { phase, source })
    }
}

fn advance(phase: &mut SearchPhase, next: SearchPhase) {
    debug!(from = %phase, to = %next, "search state");
    *phase = next;
}

fn validate_queries(queries: &[Query]) -> Result<(), SearchError> {
    let mut seen = HashSet::with_capacity(queries.len());
    for query in queries {
        if !seen.insert(query.id.as_str()) {
            return Err(SearchError::InvalidQueries(format!(
                "duplicate query id: {}",
                query.id
            )));
        }
    }
    Ok(())
}
