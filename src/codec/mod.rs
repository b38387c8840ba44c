//! # Slice Payload Codecs
//!
//! Encode/decode a slice's record sequence to and from its stored byte blob,
//! one variant per category serializer. The serializer symbol is resolved
//! once, at category/slice-store construction time, into a concrete [`Codec`]
//! value; workers never dispatch dynamically per record.
//!
//! Contract per variant:
//!
//! | serializer       | encode                                   | decode                       |
//! |------------------|------------------------------------------|------------------------------|
//! | none             | pack records                             | unpack records               |
//! | compress         | pack -> deflate                          | inflate -> unpack            |
//! | encrypt          | pack (-> deflate) -> header + ciphertext | header-keyed decrypt -> ...  |
//! | bzip2            | newline-joined text -> bzip2 member      | opaque stored stream         |
//! | encrypted_bzip2  | bzip2 member -> header + ciphertext      | decrypt -> opaque stream     |
//!
//! The bzip2 variants are output-only: each slice encodes to one bzip2
//! stream member, so concatenating every slice's decode output in id order
//! yields one valid multi-member stream an external `bzip2` reader accepts.

mod bzip2_stream;
mod compress;
mod encrypt;

pub use encrypt::CipherKeyring;

use crate::config::CryptoConfig;
use crate::error::{Result, SliceworksError};
use crate::models::category::Serializer;
use crate::models::Record;

/// Result of decoding a slice payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The materialized record sequence (none/compress/encrypt variants).
    Records(Vec<Record>),
    /// An opaque byte stream (bzip2 variants).
    Stream(Vec<u8>),
}

/// Concrete codec bound to one category.
#[derive(Clone)]
pub enum Codec {
    Plain,
    Compress,
    Encrypt {
        keyring: CipherKeyring,
        /// Deflate the packed records before encrypting.
        compress: bool,
    },
    Bzip2,
    EncryptedBzip2 {
        keyring: CipherKeyring,
    },
}

impl Codec {
    /// The pass-through codec.
    pub fn plain() -> Self {
        Self::Plain
    }

    /// Resolve a category serializer into a concrete codec, loading cipher
    /// material when the variant needs it.
    pub fn resolve(serializer: Serializer, crypto: &CryptoConfig) -> Result<Self> {
        Ok(match serializer {
            Serializer::None => Self::Plain,
            Serializer::Compress => Self::Compress,
            Serializer::Encrypt => Self::Encrypt {
                keyring: CipherKeyring::from_config(crypto)?,
                compress: true,
            },
            Serializer::Bzip2 => Self::Bzip2,
            Serializer::EncryptedBzip2 => Self::EncryptedBzip2 {
                keyring: CipherKeyring::from_config(crypto)?,
            },
        })
    }

    /// Encode a record sequence into its stored byte form.
    pub fn encode(&self, records: &[Record]) -> Result<Vec<u8>> {
        match self {
            Self::Plain => pack(records),
            Self::Compress => compress::deflate(&pack(records)?),
            Self::Encrypt { keyring, compress } => {
                let packed = pack(records)?;
                let plaintext = if *compress {
                    compress::deflate(&packed)?
                } else {
                    packed
                };
                keyring.encrypt(&plaintext, *compress)
            }
            Self::Bzip2 => bzip2_stream::compress_member(&join_lines(records)),
            Self::EncryptedBzip2 { keyring } => {
                let member = bzip2_stream::compress_member(&join_lines(records))?;
                // The stream is already bzip2-compressed; never deflate again.
                keyring.encrypt(&member, false)
            }
        }
    }

    /// Decode a stored byte blob. Record variants materialize the sequence;
    /// streamed variants return the (decrypted) bzip2 bytes untouched so
    /// collections concatenate into one valid multi-member stream.
    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded> {
        match self {
            Self::Plain => Ok(Decoded::Records(unpack(bytes)?)),
            Self::Compress => Ok(Decoded::Records(unpack(&compress::inflate(bytes)?)?)),
            Self::Encrypt { keyring, .. } => {
                let (plaintext, compressed) = keyring.decrypt(bytes)?;
                let packed = if compressed {
                    compress::inflate(&plaintext)?
                } else {
                    plaintext
                };
                Ok(Decoded::Records(unpack(&packed)?))
            }
            Self::Bzip2 => Ok(Decoded::Stream(bytes.to_vec())),
            Self::EncryptedBzip2 { keyring } => {
                let (stream, _) = keyring.decrypt(bytes)?;
                Ok(Decoded::Stream(stream))
            }
        }
    }
}

/// Binary-pack the record container (MessagePack).
fn pack(records: &[Record]) -> Result<Vec<u8>> {
    rmp_serde::to_vec(records).map_err(|e| SliceworksError::Codec(format!("pack failed: {e}")))
}

fn unpack(bytes: &[u8]) -> Result<Vec<Record>> {
    rmp_serde::from_slice(bytes).map_err(|e| SliceworksError::Codec(format!("unpack failed: {e}")))
}

/// Join records as newline-terminated text for the streamed variants.
/// String records are written verbatim; anything else as compact JSON.
fn join_lines(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        match record.as_str() {
            Some(s) => out.extend_from_slice(s.as_bytes()),
            None => out.extend_from_slice(record.to_string().as_bytes()),
        }
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
pub(crate) fn test_keyring() -> CipherKeyring {
    CipherKeyring::new(1, [(1, [7u8; 32])].into_iter().collect()).unwrap()
}
