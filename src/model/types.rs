//! Corpus, query, and result entity structs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Identifier of a corpus document, unique within one corpus snapshot.
pub type DocId = String;

/// A corpus record. `title` and `text` may be empty but are never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

impl Document {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }

    /// Character length of `title + text`, used to order corpus rows longest first.
    pub fn combined_len(&self) -> usize {
        self.title.chars().count() + self.text.chars().count()
    }
}

/// Order-irrelevant mapping from document identifier to document.
pub type Corpus = HashMap<DocId, Document>;

/// A caller-supplied query, scoped to one search call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
}

impl Query {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One ranked corpus document for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: DocId,
    pub score: f32,
}

/// Query id → ranked hits. Every query of a search call has an entry, possibly empty.
///
/// Hits keep the order the ranker produced them in: strictly non-increasing scores
/// when sorted output was requested.
pub type ResultSet = BTreeMap<String, Vec<ScoredDocument>>;

/// Corpus documents in the row order used for the corpus embedding matrix:
/// longest `title + text` first, ties broken by identifier.
pub fn corpus_row_order(corpus: &Corpus) -> Vec<(&str, &Document)> {
    let mut ordered: Vec<(&str, &Document)> = corpus
        .iter()
        .map(|(id, doc)| (id.as_str(), doc))
        .collect();
    ordered.sort_by(|(a_id, a), (b_id, b)| {
        b.combined_len()
            .cmp(&a.combined_len())
            .then_with(|| a_id.cmp(b_id))
    });
    ordered
}
