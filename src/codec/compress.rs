//! Deflate helpers for the compress and encrypt codecs.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Result, SliceworksError};

pub fn deflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| SliceworksError::Codec(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SliceworksError::Codec(format!("deflate failed: {e}")))
}

pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SliceworksError::Codec(format!("inflate failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let input = b"the same bytes over and over, the same bytes over and over";
        let compressed = deflate(input).unwrap();
        assert_ne!(compressed.as_slice(), input.as_slice());
        assert_eq!(inflate(&compressed).unwrap(), input);
    }

    #[test]
    fn inflate_rejects_garbage() {
        assert!(inflate(b"definitely not zlib").is_err());
    }
}
