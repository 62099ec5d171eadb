// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Variable-length unsigned integers as used by length-prefixed headers.
//!
//! The value is split into 7-bit groups written most significant group first. Every byte carries
//! one group in its low seven bits. The high bit is clear on all bytes except the last one, which
//! marks the end of the integer. Zero is written as the single byte `0x80`.

use smallvec::SmallVec;

use crate::{Error, Result};

/// The largest number of bytes a 64-bit value can occupy.
pub const MAX_VARUINT_LEN: usize = 10;

/// The high bit that marks the final byte of a var-uint.
const END_FLAG: u8 = 0x80;

const GROUP_MASK: u64 = 0x7F;
const GROUP_MASK_BYTE: u8 = 0x7F;

/// An encoded var-uint, stored inline.
pub type VarUIntBytes = SmallVec<[u8; MAX_VARUINT_LEN]>;

/// Returns the number of bytes needed to encode `value`. Zero still occupies one byte.
#[must_use]
pub const fn varuint_len(value: u64) -> usize {
    let significant_bits = (u64::BITS - value.leading_zeros()) as usize;

    if significant_bits == 0 { 1 } else { significant_bits.div_ceil(7) }
}

/// Encodes `value` in its shortest form.
///
/// # Example
///
/// ```
/// use blockbuf::encode_varuint;
///
/// assert_eq!(encode_varuint(0).as_slice(), &[0x80]);
/// assert_eq!(encode_varuint(200).as_slice(), &[0x01, 0xC8]);
/// ```
#[must_use]
pub fn encode_varuint(value: u64) -> VarUIntBytes {
    encode_groups(value, varuint_len(value))
}

/// Encodes `value` into exactly `width` bytes, padding with leading zero groups.
///
/// # Errors
///
/// Returns [`Error::VarUIntOverflow`] if `value` needs more than `width` bytes or `width`
/// exceeds [`MAX_VARUINT_LEN`].
pub fn encode_varuint_padded(value: u64, width: usize) -> Result<VarUIntBytes> {
    let needed = varuint_len(value);

    if width < needed || width > MAX_VARUINT_LEN {
        return Err(Error::VarUIntOverflow(format!("value {value} does not fit into {width} var-uint bytes")));
    }

    Ok(encode_groups(value, width))
}

fn encode_groups(value: u64, width: usize) -> VarUIntBytes {
    let mut bytes: VarUIntBytes = (0..width)
        .rev()
        .map(|group| (value >> (group * 7)).to_le_bytes()[0] & GROUP_MASK_BYTE)
        .collect();

    if let Some(last) = bytes.last_mut() {
        *last |= END_FLAG;
    }

    bytes
}

/// Decodes a var-uint from the start of `bytes`, returning the value and the number of bytes used.
///
/// # Errors
///
/// Returns [`Error::UnexpectedEnd`] if `bytes` ends before the terminating byte and
/// [`Error::VarUIntOverflow`] if the value does not fit into 64 bits.
pub fn decode_varuint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut decoder = VarUIntDecoder::default();

    for (index, byte) in bytes.iter().enumerate() {
        if let Some(value) = decoder.push(*byte)? {
            return Ok((value, index + 1));
        }
    }

    Err(Error::UnexpectedEnd { position: bytes.len() })
}

/// Incremental var-uint decoder, fed one byte at a time by cursors that cannot see
/// the whole encoding in one contiguous slice.
#[derive(Debug, Default)]
pub(crate) struct VarUIntDecoder {
    value: u64,
    consumed: usize,
}

impl VarUIntDecoder {
    /// Consumes one byte, returning the value once the terminating byte has been seen.
    pub(crate) fn push(&mut self, byte: u8) -> Result<Option<u64>> {
        self.consumed += 1;

        if self.consumed > MAX_VARUINT_LEN || self.value > (u64::MAX >> 7) {
            return Err(Error::VarUIntOverflow(format!("var-uint longer than {} bytes or above u64::MAX", self.consumed - 1)));
        }

        self.value = (self.value << 7) | (u64::from(byte) & GROUP_MASK);

        Ok((byte & END_FLAG != 0).then_some(self.value))
    }
}
