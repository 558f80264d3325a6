//! Payload compression for wrapped message batches.
//!
//! A compressed batch travels as a single wrapper message whose attributes
//! carry the codec and whose value is the compressed bytes of an inner
//! MessageSet.
//!
//! | Codec  | Attribute bits | Implementation |
//! |--------|----------------|----------------|
//! | None   | 0              | passthrough    |
//! | Gzip   | 1              | `flate2`       |
//! | Snappy | 2              | `snap` raw blocks, xerial framing accepted on decode |
//! | Lz4    | 3              | `lz4_flex` frame format |

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::error::{Error, Result};

/// Header written by the Java xerial snappy stream.
const XERIAL_MAGIC: [u8; 8] = [0x82, b'S', b'N', b'A', b'P', b'P', b'Y', 0];

/// Magic + version + compatible version.
const XERIAL_HEADER_LEN: usize = 16;

/// Compression codec carried in the low bits of a message's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CompressionCodec {
    #[default]
    None,
    Gzip,
    Snappy,
    /// Needs magic 1 messages, so brokers from 0.10.0.0 on.
    Lz4,
}

impl CompressionCodec {
    /// Attribute bits for this codec.
    pub fn attribute(self) -> i8 {
        match self {
            CompressionCodec::None => 0,
            CompressionCodec::Gzip => 1,
            CompressionCodec::Snappy => 2,
            CompressionCodec::Lz4 => 3,
        }
    }

    /// Codec for the given attribute bits, if supported.
    pub fn from_attribute(bits: i8) -> Option<Self> {
        match bits {
            0 => Some(CompressionCodec::None),
            1 => Some(CompressionCodec::Gzip),
            2 => Some(CompressionCodec::Snappy),
            3 => Some(CompressionCodec::Lz4),
            _ => None,
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Bytes> {
        match self {
            CompressionCodec::None => Ok(Bytes::copy_from_slice(data)),
            CompressionCodec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| Error::Encode(format!("gzip: {}", e)))?;
                encoder
                    .finish()
                    .map(Bytes::from)
                    .map_err(|e| Error::Encode(format!("gzip: {}", e)))
            }
            CompressionCodec::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map(Bytes::from)
                .map_err(|e| Error::Encode(format!("snappy: {}", e))),
            CompressionCodec::Lz4 => {
                let mut encoder = FrameEncoder::new(Vec::new());
                encoder
                    .write_all(data)
                    .map_err(|e| Error::Encode(format!("lz4: {}", e)))?;
                encoder
                    .finish()
                    .map(Bytes::from)
                    .map_err(|e| Error::Encode(format!("lz4: {}", e)))
            }
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Bytes> {
        match self {
            CompressionCodec::None => Ok(Bytes::copy_from_slice(data)),
            CompressionCodec::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Decode(format!("gzip: {}", e)))?;
                Ok(Bytes::from(out))
            }
            CompressionCodec::Snappy => decompress_snappy(data).map(Bytes::from),
            CompressionCodec::Lz4 => {
                let mut out = Vec::new();
                FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Decode(format!("lz4: {}", e)))?;
                Ok(Bytes::from(out))
            }
        }
    }
}

impl std::fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionCodec::None => write!(f, "none"),
            CompressionCodec::Gzip => write!(f, "gzip"),
            CompressionCodec::Snappy => write!(f, "snappy"),
            CompressionCodec::Lz4 => write!(f, "lz4"),
        }
    }
}

impl std::str::FromStr for CompressionCodec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(CompressionCodec::None),
            "gzip" => Ok(CompressionCodec::Gzip),
            "snappy" => Ok(CompressionCodec::Snappy),
            "lz4" => Ok(CompressionCodec::Lz4),
            other => Err(Error::Config(format!("unsupported compression codec: {}", other))),
        }
    }
}

fn decompress_snappy(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = snap::raw::Decoder::new();
    if !data.starts_with(&XERIAL_MAGIC) {
        return decoder
            .decompress_vec(data)
            .map_err(|e| Error::Decode(format!("snappy: {}", e)));
    }

    // xerial framing: header, then repeated [i32 chunk length][raw block]
    let mut out = Vec::new();
    let mut rest = data.get(XERIAL_HEADER_LEN..).unwrap_or_default();
    while !rest.is_empty() {
        let (len, tail) = rest
            .split_first_chunk::<4>()
            .ok_or_else(|| Error::Decode("snappy: truncated chunk header".to_string()))?;
        let len = i32::from_be_bytes(*len);
        if len < 0 || len as usize > tail.len() {
            return Err(Error::Decode("snappy: chunk exceeds payload".to_string()));
        }
        let (chunk, tail) = tail.split_at(len as usize);
        out.extend(
            decoder
                .decompress_vec(chunk)
                .map_err(|e| Error::Decode(format!("snappy: {}", e)))?,
        );
        rest = tail;
    }
    Ok(out)
}
