// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A segmented, mutable byte buffer for encoders that patch length prefixes after the fact.
//!
//! A [`BlockBuffer`] stores one logical sequence of bytes in a run of fixed-capacity blocks. Bytes
//! can be written, overwritten, inserted and removed at any position. An insert or removal in the
//! middle of the sequence only moves bytes within the one or two blocks around the edit point,
//! never the whole tail of the sequence as a `Vec<u8>` would.
//!
//! # Cursors
//!
//! The buffer is read through a [`Reader`] and written through a [`Writer`]. Cursors remember
//! their position and the block it falls into, but they do not borrow the buffer. Every cursor call
//! takes the buffer as a parameter instead, so any number of cursors can be open at once.
//!
//! Every mutation advances the version of the buffer. A cursor that notices the buffer has been
//! changed by someone else since it last looked fails with [`Error::ConcurrentModification`] until
//! it is told to accept the new state via `sync()`.
//!
//! ```
//! use blockbuf::{BlockBuffer, Error};
//!
//! let mut buffer = BlockBuffer::new();
//! let mut writer = buffer.writer();
//! let mut reader = buffer.reader();
//!
//! writer.write(&mut buffer, b"hello").unwrap();
//!
//! assert!(matches!(reader.read_byte(&buffer), Err(Error::ConcurrentModification { .. })));
//!
//! reader.sync(&buffer).unwrap();
//! assert_eq!(reader.read_byte(&buffer).unwrap(), Some(b'h'));
//! ```
//!
//! # Backpatching
//!
//! The [`Encoder`] writes values that are prefixed with their length without knowing the length
//! up front. It writes a one-byte placeholder header, lets the caller write the value and then
//! patches the header, growing it in place when the length does not fit into the descriptor byte.
//!
//! ```
//! use blockbuf::{Encoder, TypeTag};
//!
//! let mut encoder = Encoder::new();
//!
//! let header = encoder.open_placeholder_header(TypeTag::STRING).unwrap();
//! encoder.write(&[b'x'; 200]).unwrap();
//! encoder.close_patched_header(header, None).unwrap();
//!
//! let buffer = encoder.finish().unwrap();
//! assert_eq!(buffer.size(), 203);
//! assert_eq!(buffer.to_vec()[..3], [0x8E, 0x01, 0xC8]);
//! ```
//!
//! # Position monitors
//!
//! Code that remembers positions in the buffer can register a monitor, which the buffer keeps
//! pointing at the same logical byte across inserts and removals. See
//! [`BlockBuffer::register_monitor()`] and [`BlockBuffer::track_position()`].
//!
//! # Memory
//!
//! Blocks start at [`BufferConfig::min_block_size()`] and double up to
//! [`BufferConfig::max_block_size()`]. Blocks released by removals are kept in a free pool and
//! reused before new memory is allocated.

mod block;
mod buffer;
mod config;
mod cursor;
mod descriptor;
mod encoder;
mod error;
mod guard;
mod io_adapters;
mod monitor;
mod reader;
mod splice;
mod validate;
mod varuint;
mod writer;

pub use buffer::BlockBuffer;
pub use config::{BufferConfig, DEFAULT_BLOCK_SIZE, Validation};
pub use descriptor::{
    DESCRIPTOR_LEN, Descriptor, Header, LEN_IS_NULL, LEN_IS_VAR, MAX_SHORT_LEN, ORDERED_STRUCT, TypeTag, header_len,
    length_field_len,
};
pub use encoder::{Encoder, MarkerHandle};
pub use error::{Error, Result};
pub use guard::CallerId;
pub use io_adapters::{BufferReader, BufferWriter};
pub use monitor::{Edit, MonitorAction, MonitorCallback, MonitorHandle};
pub use reader::Reader;
pub use varuint::{MAX_VARUINT_LEN, VarUIntBytes, decode_varuint, encode_varuint, encode_varuint_padded, varuint_len};
pub use writer::Writer;

#[cfg(test)]
mod testing;
