//! Corpus file loading.
//!
//! Three layouts are accepted, chosen by file extension:
//!
//! - `.json`: one object mapping document id to `{"title": .., "text": ..}`.
//! - `.jsonl` / `.ndjson`: one `{"id"?, "title", "text"}` object per line. A record
//!   without an `id` is identified by its zero-based record ordinal.
//! - `.csv`: a header row naming `title` and `text` columns, and optionally `id`. An
//!   empty cell reads as missing, and a row with an empty `id` uses its zero-based
//!   data row ordinal like JSONL does.
//!
//! A missing or `null` title or text loads as an empty string. Records with neither
//! are dropped and counted. Ids may be strings or integers.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::model::types::{Corpus, Document};

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to read corpus file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid corpus JSON at record {record}: {source}")]
    Parse {
        record: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid corpus CSV at row {record}: {source}")]
    Csv {
        record: usize,
        #[source]
        source: csv::Error,
    },

    #[error("unsupported corpus format {0:?} (expected .json, .jsonl, .ndjson or .csv)")]
    UnsupportedFormat(String),

    #[error("document id must be a string or integer, got {0}")]
    InvalidId(String),

    #[error("duplicate document id: {0}")]
    DuplicateId(String),

    #[error("sample ratio {0} must be in (0, 1]")]
    InvalidRatio(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusFormat {
    Json,
    JsonLines,
    Csv,
}

impl CorpusFormat {
    pub fn from_path(path: &Path) -> Result<Self, CorpusError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(CorpusFormat::Json),
            "jsonl" | "ndjson" => Ok(CorpusFormat::JsonLines),
            "csv" => Ok(CorpusFormat::Csv),
            _ => Err(CorpusError::UnsupportedFormat(ext)),
        }
    }
}

/// A parsed corpus and what was left out of it.
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub corpus: Corpus,
    /// Records with neither title nor text.
    pub dropped: usize,
    /// Usable records excluded by ratio sampling.
    pub sampled_out: usize,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Object entries in file order.
struct OrderedRecords(Vec<(String, RawRecord)>);

impl<'de> Deserialize<'de> for OrderedRecords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedRecords;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping document id to {title, text}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, RawRecord>()? {
                    entries.push(entry);
                }
                Ok(OrderedRecords(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Load a corpus file, keeping the first `floor(ratio × N)` usable records.
pub fn load_corpus(path: &Path, ratio: f64) -> Result<LoadedCorpus, CorpusError> {
    let format = CorpusFormat::from_path(path)?;
    let content = fs::read_to_string(path).map_err(|source| CorpusError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = parse_corpus(&content, format, ratio)?;
    if loaded.dropped > 0 {
        warn!(
            path = %path.display(),
            dropped = loaded.dropped,
            "dropped records with neither title nor text"
        );
    }
    info!(
        path = %path.display(),
        documents = loaded.corpus.len(),
        dropped = loaded.dropped,
        sampled_out = loaded.sampled_out,
        "loaded corpus"
    );
    Ok(loaded)
}

pub fn parse_corpus(content: &str, format: CorpusFormat, ratio: f64) -> Result<LoadedCorpus, CorpusError> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(CorpusError::InvalidRatio(ratio));
    }
    let records = match format {
        CorpusFormat::Json => {
            let OrderedRecords(entries) = serde_json::from_str(content)
                .map_err(|source| CorpusError::Parse { record: 0, source })?;
            entries
        }
        CorpusFormat::JsonLines => parse_lines(content)?,
        CorpusFormat::Csv => parse_csv(content)?,
    };

    let mut loaded = LoadedCorpus::default();
    let mut usable = Vec::with_capacity(records.len());
    for (id, raw) in records {
        if raw.title.is_none() && raw.text.is_none() {
            loaded.dropped += 1;
            continue;
        }
        usable.push((id, Document::new(raw.title.unwrap_or_default(), raw.text.unwrap_or_default())));
    }

    let keep = ((usable.len() as f64) * ratio).floor() as usize;
    loaded.sampled_out = usable.len() - keep;
    for (id, doc) in usable.into_iter().take(keep) {
        if loaded.corpus.insert(id.clone(), doc).is_some() {
            return Err(CorpusError::DuplicateId(id));
        }
    }
    Ok(loaded)
}

fn parse_lines(content: &str) -> Result<Vec<(String, RawRecord)>, CorpusError> {
    let mut records = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let ordinal = records.len();
        let raw: RawRecord = serde_json::from_str(line).map_err(|source| CorpusError::Parse {
            record: ordinal + 1,
            source,
        })?;
        let id = match &raw.id {
            None | Some(Value::Null) => ordinal.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
            Some(other) => return Err(CorpusError::InvalidId(other.to_string())),
        };
        records.push((id, raw));
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

fn parse_csv(content: &str) -> Result<Vec<(String, RawRecord)>, CorpusError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut records = Vec::new();
    for (ordinal, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|source| CorpusError::Csv {
            record: ordinal + 1,
            source,
        })?;
        let id = row
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ordinal.to_string());
        records.push((
            id,
            RawRecord {
                id: None,
                title: row.title,
                text: row.text,
            },
        ));
    }
    Ok(records)
}
