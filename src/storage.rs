//! Binary storage for catalog embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in insertion order):
//! - id_len: u16 (little-endian)
//! - id: [u8; id_len] (UTF-8 item id)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during sidecar file operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Embeddings read back from a sidecar file.
pub struct LoadedVectors {
    pub dimensions: usize,
    /// (item id, embedding) pairs in the order they were written.
    pub entries: Vec<(String, Vec<f32>)>,
}

/// Persistence handle for the vectors sidecar file.
#[derive(Debug)]
pub struct VectorFile {
    path: PathBuf,
}

impl VectorFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load all embeddings from the file.
    ///
    /// The header's dimensionality is authoritative; the caller only
    /// supplies the expected model id (hash of the configured model name),
    /// so loading never requires the model itself.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<LoadedVectors, VectorFileError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorFileError::ModelMismatch);
        }

        let dimensions = header.dimensions as usize;
        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            entries.push(read_entry(&mut reader, dimensions)?);
        }

        Ok(LoadedVectors {
            dimensions,
            entries,
        })
    }

    /// Save embeddings to the file.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save<'a, I>(
        &self,
        entries: I,
        entry_count: usize,
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), VectorFileError>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, entries, entry_count, dimensions, model_id);

        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        // Atomic rename
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the sidecar file if it exists.
    pub fn delete(&self) -> Result<(), VectorFileError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file<'a, I>(
        &self,
        path: &Path,
        entries: I,
        entry_count: usize,
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), VectorFileError>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: dimensions as u16,
            entry_count: entry_count as u64,
        };
        write_header(&mut writer, &header)?;

        let mut written = 0usize;
        for (id, embedding) in entries {
            if embedding.len() != dimensions {
                return Err(VectorFileError::DimensionMismatch {
                    expected: dimensions,
                    got: embedding.len(),
                });
            }
            write_entry(&mut writer, id, embedding)?;
            written += 1;
        }

        if written != entry_count {
            return Err(VectorFileError::InvalidFormat(format!(
                "entry count mismatch: header says {entry_count}, wrote {written}"
            )));
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_header(reader: &mut BufReader<File>) -> Result<Header, VectorFileError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];

    // Version check first
    if version > FORMAT_VERSION {
        return Err(VectorFileError::VersionMismatch(version, FORMAT_VERSION));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);
    let entry_count = u64::from_le_bytes(count_bytes);

    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&header_bytes[43..47]);
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    // Verify checksum (computed over header without checksum field)
    let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
    if stored_checksum != computed_checksum {
        return Err(VectorFileError::ChecksumMismatch);
    }

    Ok(Header {
        version,
        model_id,
        dimensions,
        entry_count,
    })
}

fn write_header(writer: &mut BufWriter<File>, header: &Header) -> Result<(), VectorFileError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_entry(
    reader: &mut BufReader<File>,
    dimensions: usize,
) -> Result<(String, Vec<f32>), VectorFileError> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes)?;
    let id_len = u16::from_le_bytes(len_bytes) as usize;

    let mut id_bytes = vec![0u8; id_len];
    reader.read_exact(&mut id_bytes)?;
    let id = String::from_utf8(id_bytes)
        .map_err(|_| VectorFileError::InvalidFormat("item id is not valid UTF-8".to_string()))?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((id, embedding))
}

fn write_entry(
    writer: &mut BufWriter<File>,
    id: &str,
    embedding: &[f32],
) -> Result<(), VectorFileError> {
    if id.len() > u16::MAX as usize {
        return Err(VectorFileError::InvalidFormat(format!(
            "item id too long: {} bytes",
            id.len()
        )));
    }

    writer.write_all(&(id.len() as u16).to_le_bytes())?;
    writer.write_all(id.as_bytes())?;

    for &value in embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}
