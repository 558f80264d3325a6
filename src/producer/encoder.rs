//! Payload encoders for message keys and values.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;

/// Anything that can render itself as a message key or value.
///
/// `encode` runs once, when the message enters its partition buffer. A
/// failure there resolves the message immediately on the error channel.
pub trait Encoder: Send + Sync + fmt::Debug {
    fn encode(&self) -> Result<Bytes>;

    /// Length of what `encode` returns. Checked against
    /// `max_message_bytes` before anything is encoded.
    fn length(&self) -> usize;
}

/// UTF-8 text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEncoder(pub String);

impl Encoder for StringEncoder {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.0.as_bytes()))
    }

    fn length(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for StringEncoder {
    fn from(s: &str) -> Self {
        StringEncoder(s.to_string())
    }
}

impl From<String> for StringEncoder {
    fn from(s: String) -> Self {
        StringEncoder(s)
    }
}

/// Raw byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteEncoder(pub Bytes);

impl Encoder for ByteEncoder {
    fn encode(&self) -> Result<Bytes> {
        Ok(self.0.clone())
    }

    fn length(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<u8>> for ByteEncoder {
    fn from(v: Vec<u8>) -> Self {
        ByteEncoder(Bytes::from(v))
    }
}

impl From<Bytes> for ByteEncoder {
    fn from(b: Bytes) -> Self {
        ByteEncoder(b)
    }
}

/// Serializes a value to JSON when the message is buffered.
///
/// The length is only known after encoding, so [`Encoder::length`] encodes.
#[derive(Debug, Clone)]
pub struct JsonEncoder<T>(pub T);

impl<T> Encoder for JsonEncoder<T>
where
    T: Serialize + Send + Sync + fmt::Debug,
{
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.0)?))
    }

    fn length(&self) -> usize {
        self.encode().map_or(0, |b| b.len())
    }
}
