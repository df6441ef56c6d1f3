//! Corpus content fingerprints.
//!
//! A fingerprint identifies a corpus snapshot for caching. It is the SHA-256 of a
//! canonical JSON serialization:
//!
//! ```text
//! {"<id>":["<title>","<text>"], ...}
//! ```
//!
//! with ids in ascending byte order and each document as an ordered
//! `[title, text]` pair. Insertion order of the corpus never matters; any change to
//! an id, title, or text changes the digest.
//!
//! Hashing is O(total corpus text). The serialization is streamed into the hasher,
//! so no second copy of the corpus is built. Callers searching the same corpus
//! repeatedly should keep the result (see `search::session`).

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::types::Corpus;

/// Hex-encoded SHA-256 corpus digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Fingerprint(String);

#[derive(Debug, thiserror::Error)]
#[error("not a 64-char lowercase hex digest: {0:?}")]
pub struct InvalidFingerprint(String);

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(InvalidFingerprint(value))
    }
}

impl Fingerprint {
    /// Accepts a 64-char lowercase hex digest, e.g. one recovered from a cache file name.
    pub fn parse(hex_digest: &str) -> Option<Self> {
        let valid = hex_digest.len() == 64
            && hex_digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex_digest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct DigestWriter<'a>(&'a mut Sha256);

impl Write for DigestWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compute the content fingerprint of a corpus.
pub fn fingerprint(corpus: &Corpus) -> Fingerprint {
    let canonical: BTreeMap<&str, [&str; 2]> = corpus
        .iter()
        .map(|(id, doc)| (id.as_str(), [doc.title.as_str(), doc.text.as_str()]))
        .collect();

    let mut hasher = Sha256::new();
    // Serializing string maps into an infallible writer cannot fail.
    let _ = serde_json::to_writer(DigestWriter(&mut hasher), &canonical);
    Fingerprint(hex::encode(hasher.finalize()))
}
