mod util;

use dense_retriever::model::types::{Corpus, Document, Query, corpus_row_order};
use dense_retriever::search::cache::{Quantization, read_matrix, write_matrix};
use dense_retriever::search::embedder::EncodeOptions;
use dense_retriever::search::encoder::BatchedCorpusEncoder;
use dense_retriever::search::exact::DenseExactSearch;
use dense_retriever::search::fingerprint::fingerprint;
use dense_retriever::search::hash_embedder::HashEmbedder;
use dense_retriever::search::matrix::EmbeddingMatrix;
use dense_retriever::search::ranker::ScoreFunction;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use util::VocabProvider;

const WORDS: &str = "(cat|dog|car|engine|mammal|tree|blue) {0,1}";

fn entries() -> impl Strategy<Value = BTreeMap<String, (String, String)>> {
    prop::collection::btree_map(
        "[a-z0-9]{1,4}",
        (
            prop::string::string_regex(&format!("({WORDS}){{0,3}}")).unwrap(),
            prop::string::string_regex(&format!("({WORDS}){{0,6}}")).unwrap(),
        ),
        0..16,
    )
}

fn to_corpus<'a>(items: impl Iterator<Item = (&'a String, &'a (String, String))>) -> Corpus {
    let mut corpus = Corpus::new();
    for (id, (title, text)) in items {
        corpus.insert(id.clone(), Document::new(title.as_str(), text.as_str()));
    }
    corpus
}

proptest! {
    #[test]
    fn fingerprint_ignores_insertion_order(map in entries()) {
        let forward = to_corpus(map.iter());
        let backward = to_corpus(map.iter().rev());
        prop_assert_eq!(fingerprint(&forward), fingerprint(&backward));
    }

    #[test]
    fn fingerprint_tracks_any_text_change(map in entries(), extra in "[a-z]{1,3}") {
        prop_assume!(!map.is_empty());
        let original = to_corpus(map.iter());
        let (id, _) = map.iter().next().unwrap();

        let mut title_changed = original.clone();
        title_changed.get_mut(id).unwrap().title.push_str(&extra);
        prop_assert_ne!(fingerprint(&original), fingerprint(&title_changed));

        let mut text_changed = original.clone();
        text_changed.get_mut(id).unwrap().text.push_str(&extra);
        prop_assert_ne!(fingerprint(&original), fingerprint(&text_changed));

        let mut renamed = original.clone();
        let doc = renamed.remove(id).unwrap();
        let new_id = format!("{id}~");
        prop_assume!(!renamed.contains_key(&new_id));
        renamed.insert(new_id, doc);
        prop_assert_ne!(fingerprint(&original), fingerprint(&renamed));
    }

    #[test]
    fn chunking_never_changes_the_matrix(map in entries(), chunk in 1usize..20) {
        let corpus = to_corpus(map.iter());
        let rows = corpus_row_order(&corpus);
        let provider = HashEmbedder::new(32);
        let whole = BatchedCorpusEncoder::new(&provider, rows.len().max(1), EncodeOptions::default())
            .encode_corpus(&rows)
            .unwrap();
        let chunked = BatchedCorpusEncoder::new(&provider, chunk, EncodeOptions::default())
            .encode_corpus(&rows)
            .unwrap();
        prop_assert_eq!(whole, chunked);
    }

    #[test]
    fn results_respect_bound_self_exclusion_and_order(
        map in entries(),
        k in 0usize..6,
        use_dot in any::<bool>(),
    ) {
        let corpus = to_corpus(map.iter());
        // Reuse some corpus ids as query ids to exercise self-exclusion.
        let mut queries: Vec<Query> = map
            .iter()
            .take(3)
            .map(|(id, (title, _))| Query::new(id.as_str(), format!("{title} cat")))
            .collect();
        queries.push(Query::new("__fresh__", "dog mammal"));
        let score_function = if use_dot { ScoreFunction::Dot } else { ScoreFunction::CosSim };

        let results = DenseExactSearch::new(Arc::new(VocabProvider::animals()))
            .search(&corpus, &queries, k, score_function, true)
            .unwrap();

        prop_assert_eq!(results.len(), queries.len());
        for (query_id, hits) in &results {
            prop_assert!(hits.len() <= k);
            prop_assert!(hits.len() <= corpus.len());
            prop_assert!(hits.iter().all(|h| &h.id != query_id));
            prop_assert!(hits.iter().all(|h| !h.score.is_nan()));
            prop_assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn cached_matrix_reads_back_bit_for_bit(
        rows in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 6), 0..12),
    ) {
        let ids: Vec<String> = (0..rows.len()).map(|i| format!("doc-{i}")).collect();
        let matrix = EmbeddingMatrix::from_rows(6, ids, rows).unwrap();
        let mut bytes = Vec::new();
        write_matrix(&mut bytes, "prop-embedder", Quantization::F32, &matrix).unwrap();
        let (header, decoded) = read_matrix(&bytes).unwrap();
        prop_assert_eq!(header.embedder_id.as_str(), "prop-embedder");
        prop_assert_eq!(decoded, matrix);
    }
}
