// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::varuint::varuint_len;
use crate::{Error, Result};

/// Low nibble value meaning "the length follows as a var-uint".
pub const LEN_IS_VAR: u8 = 14;

/// Low nibble value meaning "this is a typed null".
pub const LEN_IS_NULL: u8 = 15;

/// Low nibble value of an ordered struct, whose length also follows as a var-uint.
pub const ORDERED_STRUCT: u8 = 1;

/// The largest value length that fits directly into the low nibble.
pub const MAX_SHORT_LEN: usize = 13;

/// The size of the descriptor byte that starts every header.
pub const DESCRIPTOR_LEN: usize = 1;

/// The type code carried in the high nibble of a header's descriptor byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(u8);

impl TypeTag {
    /// The null type.
    pub const NULL: Self = Self(0);
    /// Booleans.
    pub const BOOL: Self = Self(1);
    /// Non-negative integers.
    pub const POS_INT: Self = Self(2);
    /// Negative integers.
    pub const NEG_INT: Self = Self(3);
    /// Binary floating point numbers.
    pub const FLOAT: Self = Self(4);
    /// Decimal numbers.
    pub const DECIMAL: Self = Self(5);
    /// Timestamps.
    pub const TIMESTAMP: Self = Self(6);
    /// Symbols.
    pub const SYMBOL: Self = Self(7);
    /// UTF-8 strings.
    pub const STRING: Self = Self(8);
    /// Character large objects.
    pub const CLOB: Self = Self(9);
    /// Binary large objects.
    pub const BLOB: Self = Self(10);
    /// Ordered lists.
    pub const LIST: Self = Self(11);
    /// S-expressions.
    pub const SEXP: Self = Self(12);
    /// Structs.
    pub const STRUCT: Self = Self(13);
    /// Annotation wrappers.
    pub const ANNOTATION: Self = Self(14);

    /// Creates a tag from its numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `code` does not fit into a nibble.
    pub fn new(code: u8) -> Result<Self> {
        if code > 0x0F {
            return Err(Error::IllegalArgument(format!("type tag {code} does not fit into a nibble")));
        }

        Ok(Self(code))
    }

    /// The numeric code of the tag.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single byte that starts a header: type tag in the high nibble, length code in the low one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    tag: TypeTag,
    low_nibble: u8,
}

impl Descriptor {
    /// Creates a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `low_nibble` does not fit into a nibble.
    pub fn new(tag: TypeTag, low_nibble: u8) -> Result<Self> {
        if low_nibble > 0x0F {
            return Err(Error::IllegalArgument(format!("low nibble {low_nibble} does not fit into a nibble")));
        }

        Ok(Self { tag, low_nibble })
    }

    /// Splits an encoded descriptor byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            tag: TypeTag(byte >> 4),
            low_nibble: byte & 0x0F,
        }
    }

    /// The type tag.
    #[must_use]
    pub const fn tag(self) -> TypeTag {
        self.tag
    }

    /// The length code.
    #[must_use]
    pub const fn low_nibble(self) -> u8 {
        self.low_nibble
    }

    /// The encoded byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        (self.tag.0 << 4) | self.low_nibble
    }
}

/// A decoded header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// The type of the value that follows.
    pub tag: TypeTag,

    /// The length of the value in bytes, or `None` for a typed null.
    pub length: Option<usize>,

    /// The number of bytes the header itself occupies.
    pub header_len: usize,
}

/// Returns the number of bytes the length field occupies after the descriptor byte for a value
/// of `value_len` bytes written in its shortest form.
#[must_use]
pub const fn length_field_len(value_len: usize) -> usize {
    if value_len <= MAX_SHORT_LEN { 0 } else { varuint_len(value_len as u64) }
}

/// Returns the total header size for a value of `value_len` bytes written in its shortest form.
#[must_use]
pub const fn header_len(value_len: usize) -> usize {
    DESCRIPTOR_LEN + length_field_len(value_len)
}
