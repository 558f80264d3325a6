//! Legacy Kafka messages (magic 0 and 1) and the MessageSets that frame them.
//!
//! ```text
//! MessageSet => [Offset MessageSize Message]
//!   Offset      int64
//!   MessageSize int32
//! Message => Crc MagicByte Attributes [Timestamp] Key Value
//!   Crc         int32   (IEEE CRC-32 of everything after this field)
//!   MagicByte   int8    (0, or 1 when a timestamp follows)
//!   Attributes  int8    (low 3 bits: compression codec)
//!   Timestamp   int64   (magic 1 only, -1 when unset)
//!   Key         bytes
//!   Value       bytes
//! ```
//!
//! A compressed batch is one wrapper message whose value is the compressed
//! encoding of an inner MessageSet. Wrappers do not nest: every message in
//! the inner set is uncompressed.

use bytes::Bytes;
use nom::{
    IResult, InputLength,
    bytes::complete::take,
    error::ErrorKind,
    number::complete::{be_i8, be_i32, be_i64, be_u32},
};
use nombytes::NomBytes;

use crate::compression::CompressionCodec;
use crate::constants::{
    COMPRESSION_CODEC_MASK, MESSAGE_BLOCK_HEADER_SIZE, MESSAGE_MAGIC_V0, MESSAGE_MAGIC_V1,
};
use crate::encode::{PacketEncoder, Placeholder};
use crate::error::{Error, Result};
use crate::parser::{failure, parse_all, parse_nullable_bytes};

/// One wire record, possibly wrapping a compressed batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub codec: CompressionCodec,
    /// Magic byte: 0, or 1 for messages carrying a timestamp.
    pub version: i8,
    /// Milliseconds since the epoch; only encoded for magic 1.
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    /// For wrapper messages, the uncompressed encoding of `set`.
    pub value: Option<Bytes>,
    pub set: Option<MessageSet>,
    compressed: Option<Bytes>,
    compressed_size: usize,
}

impl Message {
    /// An uncompressed magic 0 message.
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            key,
            value,
            ..Default::default()
        }
    }

    /// An uncompressed magic 1 message.
    pub fn with_timestamp(key: Option<Bytes>, value: Option<Bytes>, timestamp: i64) -> Self {
        Self {
            version: MESSAGE_MAGIC_V1,
            timestamp: Some(timestamp),
            key,
            value,
            ..Default::default()
        }
    }

    /// Wrap `set` into a single message compressed with `codec`.
    pub fn compressed(
        codec: CompressionCodec,
        version: i8,
        timestamp: Option<i64>,
        set: MessageSet,
    ) -> Result<Self> {
        if codec == CompressionCodec::None {
            return Err(Error::Encode(
                "a wrapper message requires a compression codec".to_string(),
            ));
        }
        if set.messages.iter().any(|b| b.msg.codec != CompressionCodec::None) {
            return Err(Error::Encode(
                "compressed messages cannot be wrapped again".to_string(),
            ));
        }
        let value = set.to_bytes()?;
        let compressed = codec.compress(&value)?;
        Ok(Self {
            codec,
            version,
            timestamp: if version >= MESSAGE_MAGIC_V1 {
                timestamp
            } else {
                None
            },
            key: None,
            value: Some(value),
            set: Some(set),
            compressed_size: compressed.len(),
            compressed: Some(compressed),
        })
    }

    /// Size of the compressed payload, 0 for uncompressed messages.
    pub fn compressed_size(&self) -> usize {
        self.compressed_size
    }

    /// Logical records carried: the inner set size for wrappers, else 1.
    pub fn record_count(&self) -> usize {
        match &self.set {
            Some(set) => set.len(),
            None => 1,
        }
    }

    pub fn encode(&self, encoder: &mut PacketEncoder) -> Result<()> {
        if self.version != MESSAGE_MAGIC_V0 && self.version != MESSAGE_MAGIC_V1 {
            return Err(Error::Encode(format!(
                "unsupported message version {}",
                self.version
            )));
        }

        encoder.push(Placeholder::Crc32);
        encoder.put(&self.version)?;
        encoder.put(&(self.codec.attribute() & COMPRESSION_CODEC_MASK))?;
        if self.version >= MESSAGE_MAGIC_V1 {
            encoder.put(&self.timestamp.unwrap_or(-1))?;
        }
        encoder.put(&self.key)?;

        match (self.codec, &self.compressed) {
            (CompressionCodec::None, _) => encoder.put(&self.value)?,
            (_, Some(compressed)) => encoder.put(compressed)?,
            (codec, None) => {
                let raw = self.value.as_deref().unwrap_or_default();
                encoder.put(&codec.compress(raw)?)?;
            }
        }

        encoder.pop()
    }
}

/// A message with its offset inside a MessageSet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBlock {
    pub offset: i64,
    pub msg: Message,
}

/// Ordered, length-framed sequence of messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageSet {
    /// Set when decoding stopped at a truncated final message.
    pub partial_trailing_message: bool,
    pub messages: Vec<MessageBlock>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, msg: Message) {
        self.messages.push(MessageBlock { offset: 0, msg });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number the blocks 0..n, as required inside magic 1 wrappers.
    pub fn assign_relative_offsets(&mut self) {
        for (i, block) in self.messages.iter_mut().enumerate() {
            block.offset = i as i64;
        }
    }

    /// Logical records carried by all blocks.
    pub fn record_count(&self) -> usize {
        self.messages.iter().map(|b| b.msg.record_count()).sum()
    }

    pub fn encode(&self, encoder: &mut PacketEncoder) -> Result<()> {
        for block in &self.messages {
            encoder.put(&block.offset)?;
            encoder.push(Placeholder::Length);
            block.msg.encode(encoder)?;
            encoder.pop()?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut encoder = PacketEncoder::new();
        self.encode(&mut encoder)?;
        encoder.finish()
    }

    pub fn from_bytes(bytes: Bytes) -> Result<Self> {
        parse_all(bytes, parse_message_set)
    }
}

/// Parse a message occupying the entire input.
pub fn parse_message(s: NomBytes) -> IResult<NomBytes, Message> {
    parse_message_in(s, false)
}

/// `wrapped` is set for messages read out of a wrapper's inner set, which
/// must not be compressed themselves.
fn parse_message_in(s: NomBytes, wrapped: bool) -> IResult<NomBytes, Message> {
    let (s, crc) = be_u32(s)?;
    if crc32fast::hash(s.clone().into_bytes().as_ref()) != crc {
        return failure(s, ErrorKind::Verify);
    }

    let (s, version) = be_i8(s)?;
    if version != MESSAGE_MAGIC_V0 && version != MESSAGE_MAGIC_V1 {
        return failure(s, ErrorKind::Tag);
    }
    let (s, attributes) = be_i8(s)?;
    let Some(codec) = CompressionCodec::from_attribute(attributes & COMPRESSION_CODEC_MASK) else {
        return failure(s, ErrorKind::Tag);
    };
    if wrapped && codec != CompressionCodec::None {
        return failure(s, ErrorKind::Not);
    }
    let (s, timestamp) = if version >= MESSAGE_MAGIC_V1 {
        let (s, ts) = be_i64(s)?;
        (s, (ts >= 0).then_some(ts))
    } else {
        (s, None)
    };
    let (s, key) = parse_nullable_bytes(s)?;
    let (s, value) = parse_nullable_bytes(s)?;

    let mut msg = Message {
        codec,
        version,
        timestamp,
        key,
        value,
        ..Default::default()
    };

    if codec != CompressionCodec::None {
        let Some(compressed) = msg.value.take() else {
            return failure(s, ErrorKind::Verify);
        };
        let Ok(inner) = codec.decompress(&compressed) else {
            return failure(s, ErrorKind::MapRes);
        };
        let (_, set) = parse_blocks(NomBytes::new(inner.clone()), true)?;
        msg.compressed_size = compressed.len();
        msg.compressed = Some(compressed);
        msg.value = Some(inner);
        msg.set = Some(set);
    }

    Ok((s, msg))
}

/// Parse blocks until the input is exhausted.
///
/// A final block whose header or body is cut short marks the set as having
/// a partial trailing message instead of failing.
pub fn parse_message_set(input: NomBytes) -> IResult<NomBytes, MessageSet> {
    parse_blocks(input, false)
}

fn parse_blocks(input: NomBytes, wrapped: bool) -> IResult<NomBytes, MessageSet> {
    let mut set = MessageSet::default();
    let mut s = input;

    while s.input_len() > 0 {
        if s.input_len() < MESSAGE_BLOCK_HEADER_SIZE {
            set.partial_trailing_message = true;
            break;
        }
        let (rest, offset) = be_i64(s)?;
        let (rest, size) = be_i32(rest)?;
        if size < 0 {
            return failure(rest, ErrorKind::LengthValue);
        }
        if size as usize > rest.input_len() {
            set.partial_trailing_message = true;
            s = rest;
            break;
        }
        let (rest, body) = take(size as usize)(rest)?;
        let (leftover, msg) = parse_message_in(body, wrapped)?;
        if leftover.input_len() != 0 {
            return failure(leftover, ErrorKind::NonEmpty);
        }
        set.messages.push(MessageBlock { offset, msg });
        s = rest;
    }

    let len = s.input_len();
    let (s, _) = take(len)(s)?;
    Ok((s, set))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_message(msg: &Message) -> Bytes {
        let mut encoder = PacketEncoder::new();
        msg.encode(&mut encoder).unwrap();
        encoder.finish().unwrap()
    }

    fn decode_message(bytes: Bytes) -> Result<Message> {
        parse_all(bytes, parse_message)
    }

    #[test]
    fn test_empty_v0_message_layout() {
        let bytes = encode_message(&Message::new(None, None));
        // crc(4) magic(1) attributes(1) key(4) value(4)
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[4..], &[0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[0..4], &crc32fast::hash(&bytes[4..]).to_be_bytes());
    }

    #[test]
    fn test_v1_message_carries_timestamp() {
        let msg = Message::with_timestamp(None, Some(Bytes::from_static(b"v")), 1_479_847_795_000);
        let bytes = encode_message(&msg);
        assert_eq!(bytes[4] as i8, MESSAGE_MAGIC_V1);
        assert_eq!(&bytes[6..14], &1_479_847_795_000i64.to_be_bytes());
        assert_eq!(decode_message(bytes).unwrap(), msg);
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = Message::new(Some(Bytes::from_static(b"key")), Some(Bytes::from_static(b"value")));
        assert_eq!(decode_message(encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn test_crc_mismatch_is_rejected() {
        let mut bytes = encode_message(&Message::new(None, Some(Bytes::from_static(b"abc")))).to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode_message(Bytes::from(bytes)).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let mut encoder = PacketEncoder::new();
        encoder.push(Placeholder::Crc32);
        encoder.put(&0i8).unwrap();
        encoder.put(&4i8).unwrap();
        encoder.put(&(-1i32)).unwrap();
        encoder.put(&(-1i32)).unwrap();
        encoder.pop().unwrap();
        let err = decode_message(encoder.finish().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_unsupported_version_fails_to_encode() {
        let msg = Message {
            version: 2,
            ..Default::default()
        };
        let mut encoder = PacketEncoder::new();
        assert!(matches!(msg.encode(&mut encoder), Err(Error::Encode(_))));
    }

    #[test]
    fn test_compressed_wrapper_roundtrip() {
        let mut inner = MessageSet::new();
        for i in 0..10 {
            inner.add_message(Message::new(None, Some(Bytes::from(format!("payload payload {}", i)))));
        }
        let wrapper = Message::compressed(CompressionCodec::Gzip, 0, None, inner.clone()).unwrap();
        assert!(wrapper.compressed_size() > 0);
        assert_eq!(wrapper.record_count(), 10);

        let decoded = decode_message(encode_message(&wrapper)).unwrap();
        assert_eq!(decoded.codec, CompressionCodec::Gzip);
        assert_eq!(decoded.set.as_ref(), Some(&inner));
        assert_eq!(decoded.compressed_size(), wrapper.compressed_size());
        assert_eq!(decoded.value, wrapper.value);
    }

    #[test]
    fn test_lz4_wrapper_roundtrip() {
        let mut inner = MessageSet::new();
        for ts in 0..5 {
            inner.add_message(Message::with_timestamp(None, Some(Bytes::from_static(b"lz4 lz4 lz4")), ts));
        }
        inner.assign_relative_offsets();
        let wrapper = Message::compressed(CompressionCodec::Lz4, 1, Some(4), inner.clone()).unwrap();

        let bytes = encode_message(&wrapper);
        assert_eq!(bytes[5], 3);
        let decoded = decode_message(bytes).unwrap();
        assert_eq!(decoded.codec, CompressionCodec::Lz4);
        assert_eq!(decoded.set.as_ref(), Some(&inner));
    }

    /// A wrapper whose inner set holds `msg`, built without the nesting check.
    fn wrap_unchecked(codec: CompressionCodec, msg: Message) -> Message {
        let mut set = MessageSet::new();
        set.add_message(msg);
        Message {
            codec,
            value: Some(set.to_bytes().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_nested_wrapper_is_decode_error() {
        let inner = wrap_unchecked(CompressionCodec::Snappy, Message::new(None, None));
        let outer = wrap_unchecked(CompressionCodec::Gzip, inner);

        let err = decode_message(encode_message(&outer)).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("nested"), "{}", err);
    }

    #[test]
    fn test_deeply_nested_wrappers_fail_without_recursing() {
        let mut msg = Message::new(None, Some(Bytes::from_static(b"core")));
        for _ in 0..500 {
            msg = wrap_unchecked(CompressionCodec::Snappy, msg);
        }
        let mut set = MessageSet::new();
        set.add_message(msg);

        let err = MessageSet::from_bytes(set.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_wrapping_a_wrapper_fails_to_encode() {
        let mut inner = MessageSet::new();
        inner.add_message(Message::new(None, None));
        let wrapper = Message::compressed(CompressionCodec::Snappy, 0, None, inner).unwrap();

        let mut outer = MessageSet::new();
        outer.add_message(wrapper);
        let err = Message::compressed(CompressionCodec::Gzip, 0, None, outer).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn test_wrapper_requires_codec() {
        let err = Message::compressed(CompressionCodec::None, 0, None, MessageSet::new()).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn test_message_set_roundtrip_and_offsets() {
        let mut set = MessageSet::new();
        set.add_message(Message::new(None, Some(Bytes::from_static(b"a"))));
        set.add_message(Message::new(Some(Bytes::from_static(b"k")), None));
        set.assign_relative_offsets();
        let decoded = MessageSet::from_bytes(set.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, set);
        assert_eq!(decoded.messages[1].offset, 1);
        assert!(!decoded.partial_trailing_message);
    }

    #[test]
    fn test_message_set_partial_trailing_message() {
        let mut set = MessageSet::new();
        set.add_message(Message::new(None, Some(Bytes::from_static(b"complete"))));
        set.add_message(Message::new(None, Some(Bytes::from_static(b"truncated"))));
        let bytes = set.to_bytes().unwrap();
        let cut = bytes.slice(..bytes.len() - 3);

        let decoded = MessageSet::from_bytes(cut).unwrap();
        assert!(decoded.partial_trailing_message);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.messages[0].msg.value, Some(Bytes::from_static(b"complete")));
    }

    #[test]
    fn test_message_set_negative_size_is_error() {
        let mut data = 0i64.to_be_bytes().to_vec();
        data.extend_from_slice(&(-5i32).to_be_bytes());
        assert!(MessageSet::from_bytes(Bytes::from(data)).is_err());
    }

    #[test]
    fn test_record_count_counts_wrapped_records() {
        let mut inner = MessageSet::new();
        inner.add_message(Message::new(None, None));
        inner.add_message(Message::new(None, None));
        let mut outer = MessageSet::new();
        outer.add_message(Message::compressed(CompressionCodec::Snappy, 0, None, inner).unwrap());
        outer.add_message(Message::new(None, None));
        assert_eq!(outer.record_count(), 3);
    }
}
