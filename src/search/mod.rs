//! Search layer facade.
//!
//! - **[`embedder`]**: Embedding provider interfaces (`Embedder`, `EmbeddingProvider`).
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic, offline).
//! - **[`fingerprint`]**: Content fingerprints identifying a corpus snapshot.
//! - **[`matrix`]**: Row-major embedding matrix that carries its row order.
//! - **[`cache`]**: Fingerprint-keyed corpus embedding cache (REMB files).
//! - **[`encoder`]**: Chunked corpus encoding and single-call query encoding.
//! - **[`ranker`]**: Score functions and exact top-k with self-match exclusion.
//! - **[`exact`]**: `DenseExactSearch`, the search state machine.
//! - **[`session`]**: A searcher bound to one loaded corpus.

pub mod cache;
pub mod embedder;
pub mod encoder;
pub mod exact;
pub mod fingerprint;
pub mod hash_embedder;
pub mod matrix;
pub mod ranker;
pub mod session;
