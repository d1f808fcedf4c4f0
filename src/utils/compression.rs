//! gzip + base64 helpers for payloads that must travel as a single text field
//! (`GET_RAW_JSON` responses, binary video frames).

use std::io::Read;
use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::ClientError;
use crate::Result;

/// Compresses `text` with gzip and encodes the result as standard base64.
pub fn compress_and_encode(text: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`compress_and_encode`].
pub fn decode_and_decompress(encoded: &str) -> Result<String> {
    let compressed = STANDARD.decode(encoded.trim()).map_err(|e| ClientError::Decode {
        key: String::new(),
        reason: format!("invalid base64: {e}"),
    })?;
    let mut out = String::new();
    GzDecoder::new(compressed.as_slice()).read_to_string(&mut out)?;
    Ok(out)
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}
