//! Binary storage for the embedding corpus.
//!
//! File format: corpus.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - encoder_id: [u8; 32] (SHA256 hash of encoder name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - identifier_len: u16 (little-endian)
//! - identifier: UTF-8 bytes
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Embeddings are stored exactly as imported; normalization happens when
//! the corpus is built in memory.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + encoder_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Encoder mismatch: file was produced by a different encoder")]
    EncoderMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// Corpus data exactly as persisted, before any validation or
/// normalization.
#[derive(Debug)]
pub struct RawCorpus {
    pub encoder_id: [u8; 32],
    pub dimensions: usize,
    pub identifiers: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Storage manager for the corpus file.
pub struct CorpusArtifact {
    path: PathBuf,
}

impl CorpusArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the whole corpus file.
    ///
    /// When `expected_encoder` is given, the file's encoder id must match
    /// it. Passing `None` accepts a file from any encoder.
    pub fn read(&self, expected_encoder: Option<&[u8; 32]>) -> Result<RawCorpus, ArtifactError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;
        if let Some(expected) = expected_encoder {
            if header.encoder_id != *expected {
                return Err(ArtifactError::EncoderMismatch);
            }
        }

        let dimensions = header.dimensions as usize;
        let mut identifiers = Vec::with_capacity(header.entry_count as usize);
        let mut embeddings = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (identifier, embedding) = self.read_entry(&mut reader, dimensions)?;
            identifiers.push(identifier);
            embeddings.push(embedding);
        }

        Ok(RawCorpus {
            encoder_id: header.encoder_id,
            dimensions,
            identifiers,
            embeddings,
        })
    }

    /// Write a corpus file.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn write(
        &self,
        encoder_id: &[u8; 32],
        identifiers: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<(), ArtifactError> {
        if identifiers.len() != embeddings.len() {
            return Err(ArtifactError::InvalidFormat(format!(
                "{} identifiers vs {} embeddings",
                identifiers.len(),
                embeddings.len()
            )));
        }
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
        if dimensions > u16::MAX as usize {
            return Err(ArtifactError::InvalidFormat(format!(
                "{dimensions} dimensions exceed the format limit"
            )));
        }

        let temp_path = self.path.with_extension("tmp");
        let result = self.write_to_file(&temp_path, encoder_id, dimensions, identifiers, embeddings);

        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        encoder_id: &[u8; 32],
        dimensions: usize,
        identifiers: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<(), ArtifactError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            encoder_id: *encoder_id,
            dimensions: dimensions as u16,
            entry_count: identifiers.len() as u64,
        };
        self.write_header(&mut writer, &header)?;

        for (identifier, embedding) in identifiers.iter().zip(embeddings.iter()) {
            if embedding.len() != dimensions {
                return Err(ArtifactError::InvalidFormat(format!(
                    "embedding for {identifier} has {} components, expected {dimensions}",
                    embedding.len()
                )));
            }
            self.write_entry(&mut writer, identifier, embedding)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, ArtifactError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(ArtifactError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut encoder_id = [0u8; 32];
        encoder_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let entry_count = u64::from_le_bytes([
            header_bytes[35],
            header_bytes[36],
            header_bytes[37],
            header_bytes[38],
            header_bytes[39],
            header_bytes[40],
            header_bytes[41],
            header_bytes[42],
        ]);
        let stored_checksum = u32::from_le_bytes([
            header_bytes[43],
            header_bytes[44],
            header_bytes[45],
            header_bytes[46],
        ]);

        // Checksum covers the header without its own field
        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(ArtifactError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            encoder_id,
            dimensions,
            entry_count,
        })
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        header: &Header,
    ) -> Result<(), ArtifactError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.encoder_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        &self,
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<(String, Vec<f32>), ArtifactError> {
        let mut len_bytes = [0u8; 2];
        reader.read_exact(&mut len_bytes)?;
        let identifier_len = u16::from_le_bytes(len_bytes) as usize;

        let mut identifier_bytes = vec![0u8; identifier_len];
        reader.read_exact(&mut identifier_bytes)?;
        let identifier = String::from_utf8(identifier_bytes)
            .map_err(|_| ArtifactError::InvalidFormat("identifier is not UTF-8".to_string()))?;

        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            embedding.push(f32::from_le_bytes(float_bytes));
        }

        Ok((identifier, embedding))
    }

    fn write_entry(
        &self,
        writer: &mut BufWriter<File>,
        identifier: &str,
        embedding: &[f32],
    ) -> Result<(), ArtifactError> {
        let identifier_len = u16::try_from(identifier.len()).map_err(|_| {
            ArtifactError::InvalidFormat(format!("identifier too long: {identifier}"))
        })?;
        writer.write_all(&identifier_len.to_le_bytes())?;
        writer.write_all(identifier.as_bytes())?;

        for &value in embedding {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }
}

/// SHA256 of an encoder name, as stored in the file header.
pub fn encoder_id(encoder_name: &str) -> [u8; 32] {
    let digest = Sha256::digest(encoder_name.as_bytes());
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest);
    id
}

/// File header structure.
#[derive(Debug)]
struct Header {
    #[allow(dead_code)]
    version: u8,
    encoder_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}
