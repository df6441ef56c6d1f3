//! Corpus embedding cache and the REMB (Retriever EMBeddings) file format.
//!
//! One file per corpus fingerprint:
//!
//! ```text
//! <cache_dir>/<embedder_id>/corpus_emb_<fingerprint>.remb
//! ```
//!
//! Format overview (little-endian):
//!
//! Header:
//!   Magic: "REMB" (4 bytes)
//!   Version: u16
//!   EmbedderID length: u16
//!   EmbedderID: bytes
//!   Dimension: u32
//!   Quantization: u8 (0=f32, 1=f16)
//!   Count: u32
//!   HeaderCRC32: u32 (CRC32 of header bytes before this field)
//!
//! Row ids (Count entries, matrix row order):
//!   IdLength: u32
//!   Id: UTF-8 bytes
//!
//! Vector slab:
//!   Count × Dimension × bytes_per_quant, row-major
//!
//! Trailer:
//!   PayloadCRC32: u32 (CRC32 of row ids + vector slab)
//!
//! Loading never fails past the cache boundary: a missing, truncated, corrupt, or
//! foreign (other embedder / dimension) file is logged and reported as a miss.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use half::f16;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fingerprint::Fingerprint;
use super::matrix::EmbeddingMatrix;

pub const REMB_MAGIC: [u8; 4] = *b"REMB";
pub const REMB_VERSION: u16 = 1;
pub const CACHE_FILE_PREFIX: &str = "corpus_emb_";
pub const CACHE_FILE_EXT: &str = "remb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    #[default]
    F32,
    F16,
}

impl Quantization {
    pub fn to_u8(self) -> u8 {
        match self {
            Quantization::F32 => 0,
            Quantization::F16 => 1,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Quantization::F32),
            1 => Ok(Quantization::F16),
            other => bail!("unknown quantization value: {other}"),
        }
    }

    pub fn bytes_per_component(self) -> usize {
        match self {
            Quantization::F32 => 4,
            Quantization::F16 => 2,
        }
    }
}

impl std::str::FromStr for Quantization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" => Ok(Quantization::F32),
            "f16" => Ok(Quantization::F16),
            other => bail!("unknown quantization: {other} (expected f32 or f16)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RembHeader {
    pub version: u16,
    pub embedder_id: String,
    pub dimension: u32,
    pub quantization: Quantization,
    pub count: u32,
}

impl RembHeader {
    pub fn new(
        embedder_id: impl Into<String>,
        dimension: u32,
        quantization: Quantization,
        count: u32,
    ) -> Result<Self> {
        let header = Self {
            version: REMB_VERSION,
            embedder_id: embedder_id.into(),
            dimension,
            quantization,
            count,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        let id_len = self.embedder_id.len();
        if id_len > u16::MAX as usize {
            bail!("embedder_id is too long: {id_len}");
        }
        if self.dimension == 0 {
            bail!("dimension must be non-zero");
        }
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        self.validate()?;
        let mut buf = Vec::new();

        buf.extend_from_slice(&REMB_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());

        let id_bytes = self.embedder_id.as_bytes();
        let id_len = u16::try_from(id_bytes.len())
            .map_err(|_| anyhow!("embedder_id length out of range"))?;
        buf.extend_from_slice(&id_len.to_le_bytes());
        buf.extend_from_slice(id_bytes);

        buf.extend_from_slice(&self.dimension.to_le_bytes());
        buf.push(self.quantization.to_u8());
        buf.extend_from_slice(&self.count.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        writer.write_all(&buf)?;
        writer.write_all(&crc.to_le_bytes())?;
        Ok(buf.len() + 4)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut header_bytes = Vec::new();

        let magic =
            read_exact_array::<4, _>(&mut reader, &mut header_bytes).context("read REMB magic")?;
        if magic != REMB_MAGIC {
            bail!("invalid REMB magic: {:?}", magic);
        }

        let version = read_u16_le(&mut reader, &mut header_bytes).context("read REMB version")?;
        if version != REMB_VERSION {
            bail!("unsupported REMB version: {version}");
        }

        let id_len = read_u16_le(&mut reader, &mut header_bytes)
            .context("read embedder id length")? as usize;
        let id_bytes =
            read_exact_vec(&mut reader, id_len, &mut header_bytes).context("read embedder id")?;
        let embedder_id = String::from_utf8(id_bytes).context("embedder id is not valid UTF-8")?;

        let dimension = read_u32_le(&mut reader, &mut header_bytes).context("read dimension")?;
        let quantization_raw = read_exact_array::<1, _>(&mut reader, &mut header_bytes)
            .context("read quantization")?[0];
        let quantization = Quantization::from_u8(quantization_raw)?;
        let count = read_u32_le(&mut reader, &mut header_bytes).context("read count")?;

        let crc_expected = read_u32_le(&mut reader, &mut Vec::new()).context("read header crc")?;
        let crc_actual = crc32fast::hash(&header_bytes);
        if crc_actual != crc_expected {
            bail!("header CRC mismatch (expected {crc_expected:#010x}, got {crc_actual:#010x})");
        }

        let header = Self {
            version,
            embedder_id,
            dimension,
            quantization,
            count,
        };
        header.validate()?;
        Ok(header)
    }
}

/// Serialize a matrix (header, row ids, vector slab, trailer CRC).
pub fn write_matrix<W: Write>(
    mut writer: W,
    embedder_id: &str,
    quantization: Quantization,
    matrix: &EmbeddingMatrix,
) -> Result<()> {
    let dimension =
        u32::try_from(matrix.dimension()).map_err(|_| anyhow!("dimension out of range"))?;
    let count = u32::try_from(matrix.len()).map_err(|_| anyhow!("row count out of range"))?;
    let header = RembHeader::new(embedder_id, dimension, quantization, count)?;
    header.write_to(&mut writer)?;

    let mut payload_crc = crc32fast::Hasher::new();
    let mut emit = |bytes: &[u8]| -> Result<()> {
        payload_crc.update(bytes);
        writer.write_all(bytes)?;
        Ok(())
    };

    for id in matrix.ids() {
        let len = u32::try_from(id.len()).map_err(|_| anyhow!("row id too long"))?;
        emit(&len.to_le_bytes())?;
        emit(id.as_bytes())?;
    }

    let mut slab = Vec::with_capacity(matrix.as_slice().len() * quantization.bytes_per_component());
    match quantization {
        Quantization::F32 => {
            for v in matrix.as_slice() {
                slab.extend_from_slice(&v.to_le_bytes());
            }
        }
        Quantization::F16 => {
            for v in matrix.as_slice() {
                slab.extend_from_slice(&f16::from_f32(*v).to_le_bytes());
            }
        }
    }
    emit(&slab)?;

    let crc = payload_crc.finalize();
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Parse a full REMB image.
pub fn read_matrix(bytes: &[u8]) -> Result<(RembHeader, EmbeddingMatrix)> {
    let mut cursor = Cursor::new(bytes);
    let header = RembHeader::read_from(&mut cursor).context("read REMB header")?;
    let payload_start = cursor.position() as usize;

    if bytes.len() < payload_start + 4 {
        bail!("REMB file truncated before trailer");
    }
    let payload_end = bytes.len() - 4;
    let payload = &bytes[payload_start..payload_end];
    let trailer: [u8; 4] = bytes[payload_end..].try_into()?;
    let crc_expected = u32::from_le_bytes(trailer);
    let crc_actual = crc32fast::hash(payload);
    if crc_actual != crc_expected {
        bail!("payload CRC mismatch (expected {crc_expected:#010x}, got {crc_actual:#010x})");
    }

    let count = header.count as usize;
    let min_payload = count
        .checked_mul(4)
        .and_then(|ids| {
            count
                .checked_mul(header.dimension as usize)?
                .checked_mul(header.quantization.bytes_per_component())?
                .checked_add(ids)
        })
        .ok_or_else(|| anyhow!("row count {count} overflows payload size"))?;
    if min_payload > payload.len() {
        bail!(
            "row count {count} needs at least {min_payload} payload bytes, got {}",
            payload.len()
        );
    }

    let mut offset = 0usize;
    let mut ids = Vec::with_capacity(count);
    for row in 0..header.count {
        let len_bytes = payload
            .get(offset..offset + 4)
            .ok_or_else(|| anyhow!("row {row} id length out of bounds"))?;
        let len = u32::from_le_bytes(len_bytes.try_into()?) as usize;
        offset += 4;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| anyhow!("row {row} id length overflow"))?;
        let id_bytes = payload
            .get(offset..end)
            .ok_or_else(|| anyhow!("row {row} id out of bounds"))?;
        ids.push(
            String::from_utf8(id_bytes.to_vec())
                .with_context(|| format!("row {row} id is not valid UTF-8"))?,
        );
        offset = end;
    }

    let slab = &payload[offset..];
    let components = (header.count as usize)
        .checked_mul(header.dimension as usize)
        .ok_or_else(|| anyhow!("vector slab size overflow"))?;
    let expected_len = components
        .checked_mul(header.quantization.bytes_per_component())
        .ok_or_else(|| anyhow!("vector slab size overflow"))?;
    if slab.len() != expected_len {
        bail!(
            "vector slab size mismatch (expected {expected_len}, got {})",
            slab.len()
        );
    }

    let data: Vec<f32> = match header.quantization {
        Quantization::F32 => slab
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Quantization::F16 => slab
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
    };

    let matrix = EmbeddingMatrix::from_flat(header.dimension as usize, ids, data)?;
    Ok((header, matrix))
}

/// A cached corpus matrix found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Directory of corpus embedding matrices keyed by corpus fingerprint.
///
/// Entries are namespaced per embedder id, so switching providers never serves
/// vectors from a different embedding space.
#[derive(Debug, Clone)]
pub struct CorpusEmbeddingCache {
    dir: PathBuf,
    embedder_id: String,
    quantization: Quantization,
}

impl CorpusEmbeddingCache {
    pub fn new(
        cache_root: impl AsRef<Path>,
        embedder_id: impl Into<String>,
        quantization: Quantization,
    ) -> Self {
        let embedder_id = embedder_id.into();
        let dir = cache_root.as_ref().join(sanitize_component(&embedder_id));
        Self {
            dir,
            embedder_id,
            quantization,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn quantization(&self) -> Quantization {
        self.quantization
    }

    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!(
            "{CACHE_FILE_PREFIX}{}.{CACHE_FILE_EXT}",
            fingerprint.as_str()
        ))
    }

    /// Cached matrix for `fingerprint`, or `None` on any miss.
    pub fn load(&self, fingerprint: &Fingerprint, dimension: usize) -> Option<EmbeddingMatrix> {
        let path = self.entry_path(fingerprint);
        if !path.is_file() {
            debug!(fingerprint = fingerprint.short(), "corpus cache miss");
            return None;
        }
        match self.try_load(&path, dimension) {
            Ok(matrix) => Some(matrix),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "ignoring unreadable corpus cache entry: {e:#}"
                );
                None
            }
        }
    }

    fn try_load(&self, path: &Path, dimension: usize) -> Result<EmbeddingMatrix> {
        let file = File::open(path).with_context(|| format!("open cache file {path:?}"))?;
        if file.metadata().context("read cache metadata")?.len() == 0 {
            bail!("cache file is empty");
        }
        // SAFETY: the mapping is read-only and dropped before this function returns;
        // entries are only ever replaced by rename, never truncated in place.
        let mmap = unsafe { Mmap::map(&file).context("mmap cache file")? };
        let (header, matrix) = read_matrix(&mmap)?;
        if header.embedder_id != self.embedder_id {
            bail!(
                "embedder mismatch (cached {}, expected {})",
                header.embedder_id,
                self.embedder_id
            );
        }
        if matrix.dimension() != dimension {
            bail!(
                "dimension mismatch (cached {}, expected {dimension})",
                matrix.dimension()
            );
        }
        Ok(matrix)
    }

    /// Persist `matrix` under `fingerprint`. Written to a temp file in the cache
    /// directory and renamed into place, so readers never observe a partial entry.
    pub fn save(&self, fingerprint: &Fingerprint, matrix: &EmbeddingMatrix) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir {:?}", self.dir))?;
        let path = self.entry_path(fingerprint);

        let temp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("create temp cache file in {:?}", self.dir))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            write_matrix(&mut writer, &self.embedder_id, self.quantization, matrix)?;
            writer.flush().context("flush cache file")?;
        }
        temp.as_file().sync_all().context("fsync cache file")?;
        temp.persist(&path)
            .map_err(|e| anyhow!("rename cache file into {path:?}: {}", e.error))?;
        debug!(
            fingerprint = fingerprint.short(),
            rows = matrix.len(),
            path = %path.display(),
            "saved corpus embeddings"
        );
        Ok(path)
    }

    /// Cached entries for this embedder, sorted by fingerprint.
    pub fn list(&self) -> Result<Vec<CacheEntryInfo>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("read {:?}", self.dir))? {
            let entry = entry?;
            let path = entry.path();
            let Some(fingerprint) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(CACHE_FILE_PREFIX))
                .and_then(|n| n.strip_suffix(&format!(".{CACHE_FILE_EXT}")))
                .and_then(Fingerprint::parse)
            else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(CacheEntryInfo {
                fingerprint,
                path,
                size_bytes,
            });
        }
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn read_u16_le<R: Read>(reader: &mut R, header_bytes: &mut Vec<u8>) -> Result<u16> {
    let buf = read_exact_array::<2, _>(reader, header_bytes)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(reader: &mut R, header_bytes: &mut Vec<u8>) -> Result<u32> {
    let buf = read_exact_array::<4, _>(reader, header_bytes)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_exact_vec<R: Read>(
    reader: &mut R,
    len: usize,
    header_bytes: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    header_bytes.extend_from_slice(&buf);
    Ok(buf)
}

fn read_exact_array<const N: usize, R: Read>(
    reader: &mut R,
    header_bytes: &mut Vec<u8>,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    header_bytes.extend_from_slice(&buf);
    Ok(buf)
}
