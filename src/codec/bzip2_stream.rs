//! Bzip2 stream members for the output-only streamed codecs.
//!
//! Each slice compresses to one complete bzip2 member. Concatenating the
//! members of every slice in a collection, in id order, forms a single valid
//! multi-member stream that an external `bzip2` reader decompresses as one
//! file.

use std::io::Write;

use bzip2::write::BzEncoder;
use bzip2::Compression;

use crate::error::{Result, SliceworksError};

/// Compress one newline-terminated text block into a complete bzip2 member.
pub fn compress_member(text: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(text)
        .map_err(|e| SliceworksError::Codec(format!("bzip2 compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SliceworksError::Codec(format!("bzip2 compress failed: {e}")))
}

/// Decompress a (possibly multi-member) bzip2 stream. Used by consumers and
/// tests; the codec itself never splits a stream back into records.
pub fn decompress_all(stream: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut decoder = bzip2::read::MultiBzDecoder::new(stream);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SliceworksError::Codec(format!("bzip2 decompress failed: {e}")))?;
    Ok(out)
}
