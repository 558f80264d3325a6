//! Deserialize data from the bytecode protocol.
//!
//! Every length-prefixed structure is decoded from a bounded sub-view
//! ([`parse_sized`]) so a corrupt length can never make a nested decoder read
//! past its structural boundary.
use bytes::Bytes;
use nom::{
    IResult, InputLength,
    bytes::complete::take,
    error::{ErrorKind, ParseError},
    multi::many_m_n,
    number::complete::{be_i16, be_i32},
};
use nombytes::NomBytes;

use crate::constants::MAX_PROTOCOL_ARRAY_SIZE;
use crate::error::Error;

/// Build a hard failure at `input` with the given kind.
pub fn failure<O>(input: NomBytes, kind: ErrorKind) -> IResult<NomBytes, O> {
    Err(nom::Err::Failure(nom::error::Error::new(input, kind)))
}

/// Convert bytes to a validated UTF-8 string.
/// Returns an error if the bytes are not valid UTF-8.
pub fn bytes_to_string(bytes: &Bytes) -> Result<String, nom::Err<nom::error::Error<NomBytes>>> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(
                NomBytes::from(bytes.as_ref()),
                ErrorKind::Verify,
            ))
        })
}

/// Parse an i16 length-prefixed string.
pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i16(s)?;
    if length < 0 {
        return failure(s, ErrorKind::LengthValue);
    }
    let (s, string) = take(length as usize)(s)?;
    Ok((s, string.into_bytes()))
}

/// Parse an i32 length-prefixed byte array where -1 means null.
pub fn parse_nullable_bytes(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i32(s)?;

    if length == -1 {
        return Ok((s, None));
    }
    if length < 0 {
        return failure(s, ErrorKind::LengthValue);
    }
    if length as usize > s.input_len() {
        return failure(s, ErrorKind::Eof);
    }

    let (s, bytes) = take(length as usize)(s)?;
    Ok((s, Some(bytes.into_bytes())))
}

pub fn parse_array<O, E, F>(f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E> + Copy,
    E: ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let i = input.clone();
        let (i, length) = be_i32(i)?;

        // Null array
        if length == -1 {
            return Ok((i, vec![]));
        }

        // Validate array size bounds; every element takes at least one byte
        if !(0..=MAX_PROTOCOL_ARRAY_SIZE).contains(&length) || length as usize > i.input_len() {
            return Err(nom::Err::Failure(E::from_error_kind(i, ErrorKind::TooLarge)));
        }

        many_m_n(length as usize, length as usize, f)(i)
    }
}

/// Read an i32 size, then run `f` over exactly that many bytes.
///
/// `f` must consume the whole sub-view.
pub fn parse_sized<O, F>(mut f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, O>
where
    F: FnMut(NomBytes) -> IResult<NomBytes, O>,
{
    move |input: NomBytes| {
        let (s, size) = be_i32(input)?;
        if size < 0 {
            return failure(s, ErrorKind::LengthValue);
        }
        if size as usize > s.input_len() {
            return failure(s, ErrorKind::Eof);
        }
        let (s, view) = take(size as usize)(s)?;
        let (leftover, value) = f(view)?;
        if leftover.input_len() != 0 {
            return failure(leftover, ErrorKind::NonEmpty);
        }
        Ok((s, value))
    }
}

/// Run a top-level parser over `bytes`, requiring it to consume everything.
pub fn parse_all<O, F>(bytes: Bytes, mut f: F) -> Result<O, Error>
where
    F: FnMut(NomBytes) -> IResult<NomBytes, O>,
{
    let (rest, value) = f(NomBytes::new(bytes)).map_err(to_decode_error)?;
    if rest.input_len() != 0 {
        return Err(Error::Decode(format!(
            "{} trailing bytes after message",
            rest.input_len()
        )));
    }
    Ok(value)
}

/// Map a nom error onto [`Error::Decode`].
pub fn to_decode_error(err: nom::Err<nom::error::Error<NomBytes>>) -> Error {
    match err {
        nom::Err::Incomplete(_) => Error::Decode("unexpected end of input".to_string()),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let reason = match e.code {
                ErrorKind::Eof => "unexpected end of input",
                ErrorKind::LengthValue => "negative length",
                ErrorKind::TooLarge => "array length exceeds bounds",
                ErrorKind::NonEmpty => "length-delimited field was not fully consumed",
                ErrorKind::Verify => "checksum or content verification failed",
                ErrorKind::Tag => "unsupported magic byte or codec",
                ErrorKind::MapRes => "compressed payload could not be decoded",
                ErrorKind::Not => "nested compression inside a wrapper message",
                _ => "malformed input",
            };
            Error::Decode(format!(
                "{} ({} bytes remaining)",
                reason,
                e.input.input_len()
            ))
        }
    }
}
