//! Fixed-width binary encoding for the VMFC container.
//!
//! Every multi-byte integer in a VMFC image (header fields, section words,
//! instruction immediates) is little-endian. The container has no length
//! prefixes: records are laid out back to back and the reader knows each
//! field's width from its type.
//!
//! # Example
//!
//! ```ignore
//! use crate::types::encoding::{Encode, Decode};
//!
//! let bytes = 0x1234u16.to_bytes();
//! assert_eq!(bytes, vec![0x34, 0x12]);
//! assert_eq!(u16::decode(&mut bytes.as_slice()).unwrap(), 0x1234);
//! ```

/// Trait for types that can be serialized into a VMFC byte buffer.
pub trait Encode {
    /// Appends the binary representation to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Serializes to a new byte buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    UnexpectedEof,
}

impl DecodeError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DecodeError::UnexpectedEof => "unexpected end of input",
        }
    }
}

/// Trait for types that can be deserialized from a VMFC byte buffer.
pub trait Decode: Sized {
    /// Reads a value from the front of `input`, advancing the slice.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;
}

/// Reads exactly `n` bytes from the input, advancing the slice.
pub(crate) fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

impl Encode for u8 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(read_bytes(input, 1)?[0])
    }
}

impl Encode for u16 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decode for u16 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

// Fixed-size arrays [T; N], used for the 4-byte tags
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode(&self, out: &mut Vec<u8>) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode + Copy + Default, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut arr = [T::default(); N];
        for slot in arr.iter_mut() {
            *slot = T::decode(input)?;
        }
        Ok(arr)
    }
}
