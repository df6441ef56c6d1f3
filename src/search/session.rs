//! Caller-owned search session over one loaded corpus.

use serde::Serialize;

use super::exact::{DenseExactSearch, SearchError};
use super::fingerprint::{Fingerprint, fingerprint};
use super::ranker::ScoreFunction;
use crate::model::types::{Corpus, Document, Query, ResultSet};

/// Query id used by [`SearchSession::retrieve`]. Chosen so it cannot shadow a real
/// document id through self-match exclusion in ordinary corpora.
pub const RETRIEVE_QUERY_ID: &str = "__retrieve__";

/// A hit resolved back to its document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub title: String,
    pub text: String,
    pub score: f32,
}

/// A searcher bound to a corpus. The corpus is immutable for the session's lifetime,
/// so its fingerprint is computed once.
pub struct SearchSession {
    searcher: DenseExactSearch,
    corpus: Corpus,
    fingerprint: Fingerprint,
}

impl SearchSession {
    pub fn new(searcher: DenseExactSearch, corpus: Corpus) -> Self {
        let fingerprint = fingerprint(&corpus);
        Self {
            searcher,
            corpus,
            fingerprint,
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn searcher(&self) -> &DenseExactSearch {
        &self.searcher
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn search(
        &self,
        queries: &[Query],
        top_k: usize,
        score_function: ScoreFunction,
        return_sorted: bool,
    ) -> Result<ResultSet, SearchError> {
        self.searcher.search_with_fingerprint(
            &self.corpus,
            &self.fingerprint,
            queries,
            top_k,
            score_function,
            return_sorted,
        )
    }

    /// Top `top_k` documents for a single free-text query, best first.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        score_function: ScoreFunction,
    ) -> Result<Vec<RetrievedDocument>, SearchError> {
        let queries = [Query::new(RETRIEVE_QUERY_ID, query)];
        let mut results = self.search(&queries, top_k, score_function, true)?;
        let hits = results.remove(RETRIEVE_QUERY_ID).unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let doc = self.corpus.get(&hit.id)?;
                Some(RetrievedDocument {
                    title: doc.title.clone(),
                    text: doc.text.clone(),
                    id: hit.id,
                    score: hit.score,
                })
            })
            .collect())
    }

    pub fn show(&self, id: &str) -> Option<&Document> {
        self.corpus.get(id)
    }
}
