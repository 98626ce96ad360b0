//! Pluggable value encoding
//!
//! A `Codec` pairs a `Serializer` with a `Compressor`. Both strategies are
//! type parameters, so the encoding pipeline is resolved at compile time and
//! a collection's wire format is part of its type.

use std::io::{Read, Write};

use datakit_common::{DataKitError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Value serialization strategy
pub trait Serializer: Send + Sync {
    fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Byte-stream compression strategy
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// JSON serialization via serde_json
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| DataKitError::Serialization(format!("JSON encode failed: {}", e)))
    }

    fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| DataKitError::Deserialization(format!("JSON decode failed: {}", e)))
    }
}

/// Pass-through, no compression
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Gzip compression with a configurable level (0-9, default 6)
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| DataKitError::Serialization(format!("Gzip compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DataKitError::Deserialization(format!("Gzip decompression failed: {}", e)))?;
        Ok(out)
    }
}

/// Serializer + compressor pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec<S, C> {
    serializer: S,
    compressor: C,
}

/// JSON without compression, the default collection codec
pub type JsonCodec = Codec<JsonSerializer, NoopCompressor>;

impl<S: Serializer, C: Compressor> Codec<S, C> {
    pub fn new(serializer: S, compressor: C) -> Self {
        Self {
            serializer,
            compressor,
        }
    }

    /// Serialize then compress
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let raw = self.serializer.to_bytes(value)?;
        self.compressor.compress(&raw)
    }

    /// Decompress then deserialize
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let raw = self.compressor.decompress(data)?;
        self.serializer.from_bytes(&raw)
    }
}

impl Codec<JsonSerializer, NoopCompressor> {
    /// Plain JSON codec
    pub fn json() -> Self {
        Self::new(JsonSerializer, NoopCompressor)
    }
}

impl Codec<JsonSerializer, GzipCompressor> {
    /// JSON + gzip codec
    pub fn json_gzip() -> Self {
        Self::new(JsonSerializer, GzipCompressor::default())
    }
}
