//! Order-preserving byte encoding of tuples.
//!
//! Byte-keyed stores sort keys by unsigned lexicographic byte order. This
//! encoding guarantees `encode(a) < encode(b)` exactly when
//! `compare_tuple(a, b) == Less`, and that `encode(p)` is a byte prefix of
//! `encode(t)` whenever `p` is a tuple prefix of `t`.
//!
//! Layout per element: one tag byte (ordered by element rank, always below
//! [`RANGE_END`]) followed by a payload:
//!
//! | kind   | payload                                                  |
//! |--------|----------------------------------------------------------|
//! | null   | none                                                     |
//! | bool   | `0x00` / `0x01`                                          |
//! | int    | 8 bytes big-endian, sign bit flipped                     |
//! | float  | 8 bytes big-endian, IEEE-754 total-order transform       |
//! | string | UTF-8 with `0x00` escaped as `0x00 0xFF`, then `0x00`    |
//! | bytes  | same escaping as string                                  |

use std::ops::Bound;

use crate::scan::ScanArgs;
use crate::tuple::{Element, Tuple};

const TAG_NULL: u8 = 0x10;
const TAG_BOOL: u8 = 0x20;
const TAG_INT: u8 = 0x30;
const TAG_FLOAT: u8 = 0x40;
const TAG_STRING: u8 = 0x50;
const TAG_BYTES: u8 = 0x60;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;
const SIGN_BIT: u64 = 1 << 63;

/// Sorts after every encoded element, so `encode(p) ++ [RANGE_END]` is an
/// exclusive upper bound for all keys extending `p`.
pub const RANGE_END: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encoded key ended unexpectedly")]
    UnexpectedEnd,
    #[error("unknown element tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("invalid boolean payload 0x{0:02x}")]
    InvalidBool(u8),
    #[error("invalid escape sequence in encoded key")]
    InvalidEscape,
    #[error("encoded string is not valid UTF-8")]
    InvalidUtf8,
}

/// Encodes a tuple into its order-preserving byte form.
#[must_use]
pub fn encode_tuple(tuple: &Tuple) -> Vec<u8> {
    let mut out = Vec::with_capacity(tuple.len() * 9);
    for element in tuple {
        encode_element(element, &mut out);
    }
    out
}

fn encode_element(element: &Element, out: &mut Vec<u8>) {
    match element {
        Element::Null => out.push(TAG_NULL),
        Element::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Element::Int(i) => {
            out.push(TAG_INT);
            let bits = u64::from_be_bytes(i.to_be_bytes()) ^ SIGN_BIT;
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Element::Float(f) => {
            out.push(TAG_FLOAT);
            let bits = f.to_bits();
            let ordered = if bits & SIGN_BIT == 0 {
                bits ^ SIGN_BIT
            } else {
                !bits
            };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        Element::String(s) => {
            out.push(TAG_STRING);
            encode_escaped(s.as_bytes(), out);
        }
        Element::Bytes(b) => {
            out.push(TAG_BYTES);
            encode_escaped(b, out);
        }
    }
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &byte in bytes {
        out.push(byte);
        if byte == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

/// Decodes bytes produced by [`encode_tuple`].
///
/// # Errors
///
/// Returns a [`CodecError`] if the input is truncated or malformed.
pub fn decode_tuple(bytes: &[u8]) -> Result<Tuple, CodecError> {
    let mut elements = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (element, next) = decode_element(bytes, pos)?;
        elements.push(element);
        pos = next;
    }
    Ok(Tuple::new(elements))
}

fn decode_element(bytes: &[u8], pos: usize) -> Result<(Element, usize), CodecError> {
    let tag = bytes[pos];
    let body = pos + 1;
    match tag {
        TAG_NULL => Ok((Element::Null, body)),
        TAG_BOOL => match bytes.get(body) {
            Some(0) => Ok((Element::Bool(false), body + 1)),
            Some(1) => Ok((Element::Bool(true), body + 1)),
            Some(&other) => Err(CodecError::InvalidBool(other)),
            None => Err(CodecError::UnexpectedEnd),
        },
        TAG_INT => {
            let bits = read_u64(bytes, body)? ^ SIGN_BIT;
            Ok((Element::Int(i64::from_be_bytes(bits.to_be_bytes())), body + 8))
        }
        TAG_FLOAT => {
            let ordered = read_u64(bytes, body)?;
            let bits = if ordered & SIGN_BIT == 0 {
                !ordered
            } else {
                ordered ^ SIGN_BIT
            };
            Ok((Element::Float(f64::from_bits(bits)), body + 8))
        }
        TAG_STRING => {
            let (raw, next) = decode_escaped(bytes, body)?;
            let s = String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
            Ok((Element::String(s), next))
        }
        TAG_BYTES => {
            let (raw, next) = decode_escaped(bytes, body)?;
            Ok((Element::Bytes(raw), next))
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

fn read_u64(bytes: &[u8], pos: usize) -> Result<u64, CodecError> {
    let slice = bytes.get(pos..pos + 8).ok_or(CodecError::UnexpectedEnd)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(u64::from_be_bytes(buf))
}

fn decode_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize), CodecError> {
    let mut out = Vec::new();
    loop {
        match bytes.get(pos) {
            None => return Err(CodecError::UnexpectedEnd),
            Some(&TERMINATOR) => {
                if bytes.get(pos + 1) == Some(&ESCAPE) {
                    out.push(TERMINATOR);
                    pos += 2;
                } else {
                    return Ok((out, pos + 1));
                }
            }
            Some(&byte) => {
                out.push(byte);
                pos += 1;
            }
        }
    }
}

/// Byte range `[start, end)` covering exactly the keys selected by the
/// prefix and bounds of `args`.
///
/// Returns `None` when the range is empty.
#[must_use]
pub fn byte_range(args: &ScanArgs) -> Option<(Vec<u8>, Vec<u8>)> {
    let prefix = encode_tuple(&args.prefix);
    let under = |bound: &Tuple, past_extensions: bool| {
        let mut key = prefix.clone();
        for element in bound {
            encode_element(element, &mut key);
        }
        if past_extensions {
            key.push(RANGE_END);
        }
        key
    };

    let start = match &args.lower {
        Bound::Unbounded => prefix.clone(),
        Bound::Included(b) => under(b, false),
        Bound::Excluded(b) => under(b, true),
    };
    let end = match &args.upper {
        Bound::Unbounded => {
            let mut end = prefix.clone();
            end.push(RANGE_END);
            end
        }
        Bound::Excluded(b) => under(b, false),
        Bound::Included(b) => under(b, true),
    };

    (start < end).then_some((start, end))
}
