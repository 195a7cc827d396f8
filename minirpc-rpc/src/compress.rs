//! Body compressors

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use minirpc_core::{Capability, Error, Result};
use std::io::{Read, Write};

/// Compressor identifiers carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressKind {
    None = 0x00,
    Gzip = 0x01,
    Deflate = 0x02,
}

impl CompressKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(CompressKind::None),
            0x01 => Some(CompressKind::Gzip),
            0x02 => Some(CompressKind::Deflate),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CompressKind::None),
            "gzip" => Some(CompressKind::Gzip),
            "deflate" => Some(CompressKind::Deflate),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Extension name the codec resolves for this id
    pub fn name(self) -> &'static str {
        match self {
            CompressKind::None => "none",
            CompressKind::Gzip => "gzip",
            CompressKind::Deflate => "deflate",
        }
    }
}

/// Compresses frame bodies
pub trait Compress: Send + Sync {
    fn kind(&self) -> CompressKind;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress, failing if the output would exceed `limit` bytes
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>>;
}

impl Capability for dyn Compress {
    const NAME: &'static str = "compress";
}

fn read_limited(mut reader: impl Read, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .by_ref()
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(format!("decompression failed: {}", e)))?;
    if out.len() > limit {
        return Err(Error::Compression(format!(
            "decompressed body exceeds {} bytes",
            limit
        )));
    }
    Ok(out)
}

/// Passes bodies through unchanged
#[derive(Debug, Default)]
pub struct NoopCompressor;

impl Compress for NoopCompressor {
    fn kind(&self) -> CompressKind {
        CompressKind::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        read_limited(data, limit)
    }
}

/// Gzip via flate2
#[derive(Debug, Default)]
pub struct GzipCompressor;

impl Compress for GzipCompressor {
    fn kind(&self) -> CompressKind {
        CompressKind::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Compression(format!("gzip failed: {}", e)))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        read_limited(GzDecoder::new(data), limit)
    }
}

/// Raw deflate via flate2
#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compress for DeflateCompressor {
    fn kind(&self) -> CompressKind {
        CompressKind::Deflate
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Compression(format!("deflate failed: {}", e)))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        read_limited(DeflateDecoder::new(data), limit)
    }
}
