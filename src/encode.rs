//! Serialize data into the bytecode protocol.
//!
//! Primitives implement [`ToByte`] over any [`BufMut`]. Structures whose
//! framing needs a length or checksum that is only known after the payload
//! has been written go through [`PacketEncoder`], which reserves a placeholder
//! field with [`PacketEncoder::push`] and patches it with
//! [`PacketEncoder::pop`].
use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::PLACEHOLDER_FIELD_SIZE;
use crate::error::{Error, Result};

pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for i8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self);
        Ok(())
    }
}

impl ToByte for i16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i16(*self);
        Ok(())
    }
}

impl ToByte for i32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(*self);
        Ok(())
    }
}

impl ToByte for i64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i64(*self);
        Ok(())
    }
}

impl ToByte for str {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let len = i16::try_from(self.len())
            .map_err(|_| Error::Encode(format!("string of {} bytes is too long", self.len())))?;
        buffer.put_i16(len);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToByte for String {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

impl ToByte for [u8] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let len = i32::try_from(self.len())
            .map_err(|_| Error::Encode(format!("byte array of {} bytes is too long", self.len())))?;
        buffer.put_i32(len);
        buffer.put(self);
        Ok(())
    }
}

impl ToByte for Bytes {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.as_ref().encode(buffer)
    }
}

impl ToByte for Option<Bytes> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match self {
            Some(xs) => xs.encode(buffer),
            None => (-1i32).encode(buffer),
        }
    }
}

/// Write the i32 element count that starts a protocol array.
pub fn put_array_length<W: BufMut>(buffer: &mut W, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| Error::Encode(format!("array of {} elements is too long", len)))?;
    buffer.put_i32(len);
    Ok(())
}

/// A 4-byte field reserved before its value is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Big-endian i32 count of the bytes written after the field.
    Length,
    /// IEEE CRC-32 of the bytes written after the field.
    Crc32,
}

/// Growable byte sink supporting nested placeholder fields.
///
/// ```
/// use kafkaesque_producer::encode::{PacketEncoder, Placeholder};
///
/// let mut encoder = PacketEncoder::new();
/// encoder.push(Placeholder::Length);
/// encoder.put(&7i32).unwrap();
/// encoder.pop().unwrap();
/// let bytes = encoder.finish().unwrap();
/// assert_eq!(&bytes[..], &[0, 0, 0, 4, 0, 0, 0, 7]);
/// ```
#[derive(Debug, Default)]
pub struct PacketEncoder {
    buffer: BytesMut,
    stack: Vec<(Placeholder, usize)>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Number of placeholders pushed but not yet popped.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Encode a value at the current offset.
    pub fn put<T: ToByte + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.encode(&mut self.buffer)
    }

    /// Write the i32 element count that starts a protocol array.
    pub fn put_array_length(&mut self, len: usize) -> Result<()> {
        put_array_length(&mut self.buffer, len)
    }

    /// Append raw bytes with no framing.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    /// Reserve a placeholder at the current offset.
    pub fn push(&mut self, field: Placeholder) {
        self.stack.push((field, self.buffer.len()));
        self.buffer.put_u32(0);
    }

    /// Patch the most recently pushed placeholder from the bytes written since.
    pub fn pop(&mut self) -> Result<()> {
        let (field, start) = self
            .stack
            .pop()
            .ok_or_else(|| Error::Encode("pop without a matching push".to_string()))?;
        let payload = &self.buffer[start + PLACEHOLDER_FIELD_SIZE..];
        let value = match field {
            Placeholder::Length => i32::try_from(payload.len())
                .map_err(|_| {
                    Error::Encode(format!("frame of {} bytes is too long", payload.len()))
                })?
                .to_be_bytes(),
            Placeholder::Crc32 => crc32fast::hash(payload).to_be_bytes(),
        };
        self.buffer[start..start + PLACEHOLDER_FIELD_SIZE].copy_from_slice(&value);
        Ok(())
    }

    /// Consume the encoder, failing if a placeholder was never popped.
    pub fn finish(self) -> Result<Bytes> {
        if !self.stack.is_empty() {
            return Err(Error::Encode(format!(
                "{} placeholder field(s) were never popped",
                self.stack.len()
            )));
        }
        Ok(self.buffer.freeze())
    }
}
