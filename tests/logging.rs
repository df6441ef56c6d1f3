mod util;

use dense_retriever::corpus::load_corpus;
use dense_retriever::model::types::Query;
use dense_retriever::search::cache::Quantization;
use dense_retriever::search::exact::DenseExactSearch;
use dense_retriever::search::ranker::ScoreFunction;
use std::sync::Arc;
use tempfile::TempDir;
use util::{TestTracing, VocabProvider, animal_corpus};

#[test]
fn miss_then_hit_is_logged() {
    let dir = TempDir::new().unwrap();
    let searcher = DenseExactSearch::new(Arc::new(VocabProvider::animals()))
        .with_cache_dir(dir.path(), Quantization::F32)
        .with_chunk_size(2);
    let corpus = animal_corpus();
    let queries = [Query::new("q", "cat")];

    let tracing = TestTracing::new();
    let _guard = tracing.install();
    searcher.search(&corpus, &queries, 1, ScoreFunction::Dot, true).unwrap();
    tracing.assert_contains("encoding corpus in batches");
    tracing.assert_contains("batches=2");
    assert!(!tracing.output().contains("corpus cache hit"));

    searcher.search(&corpus, &queries, 1, ScoreFunction::Dot, true).unwrap();
    tracing.assert_contains("corpus cache hit");
    let completions = tracing
        .lines()
        .iter()
        .filter(|l| l.contains("search complete"))
        .count();
    assert_eq!(completions, 2);
}

#[test]
fn search_completion_carries_structured_fields() {
    let searcher = DenseExactSearch::new(Arc::new(VocabProvider::animals()));
    let tracing = TestTracing::new();
    let _guard = tracing.install();
    searcher
        .search(&animal_corpus(), &[Query::new("q", "dog")], 2, ScoreFunction::CosSim, true)
        .unwrap();
    tracing.assert_contains("queries=1");
    tracing.assert_contains("corpus=3");
    tracing.assert_contains("score_function=cos_sim");
}

#[test]
fn corpus_loader_reports_dropped_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corpus.jsonl");
    std::fs::write(
        &path,
        "{\"title\": \"Cat\", \"text\": \"Cats are mammals.\"}\n{\"title\": null}\n",
    )
    .unwrap();

    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let loaded = load_corpus(&path, 1.0).unwrap();

    assert_eq!(loaded.corpus.len(), 1);
    assert_eq!(loaded.dropped, 1);
    tracing.assert_contains("dropped records with neither title nor text");
    tracing.assert_contains("documents=1");
}
