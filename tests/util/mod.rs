use dense_retriever::model::types::{Corpus, Document};
use dense_retriever::search::embedder::{
    EmbedderError, EmbedderResult, EmbeddingProvider, EncodeOptions, corpus_record_text,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }

    pub fn lines(&self) -> Vec<String> {
        self.output()
            .lines()
            .map(std::string::ToString::to_string)
            .collect()
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Bag-of-words provider: component `i` counts the tokens starting with `vocab[i]`.
///
/// `"mammal"` against `"Cats are mammals."` counts 1, so overlap scores are easy to
/// reason about. Texts sharing no vocabulary embed as the zero vector.
#[allow(dead_code)]
pub struct VocabProvider {
    vocab: Vec<&'static str>,
    pub corpus_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub fail_corpus: AtomicBool,
    pub fail_queries: AtomicBool,
}

#[allow(dead_code)]
impl VocabProvider {
    pub fn new(vocab: &[&'static str]) -> Self {
        Self {
            vocab: vocab.to_vec(),
            corpus_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            fail_corpus: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    pub fn animals() -> Self {
        Self::new(&["mammal", "cat", "dog", "car", "engine"])
    }

    pub fn corpus_calls(&self) -> usize {
        self.corpus_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        self.vocab
            .iter()
            .map(|word| tokens.iter().filter(|t| t.starts_with(word)).count() as f32)
            .collect()
    }
}

impl EmbeddingProvider for VocabProvider {
    fn provider_id(&self) -> &str {
        "vocab-test"
    }

    fn output_dimension(&self) -> usize {
        self.vocab.len()
    }

    fn encode_queries(
        &self,
        queries: &[&str],
        _options: &EncodeOptions,
    ) -> EmbedderResult<Vec<Vec<f32>>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(EmbedderError::Unavailable("query model offline".into()));
        }
        Ok(queries.iter().map(|q| self.embed_text(q)).collect())
    }

    fn encode_corpus(
        &self,
        documents: &[&Document],
        _options: &EncodeOptions,
    ) -> EmbedderResult<Vec<Vec<f32>>> {
        self.corpus_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_corpus.load(Ordering::SeqCst) {
            return Err(EmbedderError::EmbeddingFailed("corpus model crashed".into()));
        }
        Ok(documents
            .iter()
            .map(|d| self.embed_text(&corpus_record_text(d)))
            .collect())
    }
}

#[allow(dead_code)]
pub fn corpus_of(entries: &[(&str, &str, &str)]) -> Corpus {
    entries
        .iter()
        .map(|(id, title, text)| (id.to_string(), Document::new(*title, *text)))
        .collect()
}

#[allow(dead_code)]
pub fn animal_corpus() -> Corpus {
    corpus_of(&[
        ("A", "Cat", "Cats are mammals."),
        ("B", "Dog", "Dogs are mammals."),
        ("C", "Car", "Cars have engines."),
    ])
}
