// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use smallvec::SmallVec;
use tracing::{Level, event};

use crate::descriptor::{
    DESCRIPTOR_LEN, Descriptor, LEN_IS_NULL, LEN_IS_VAR, MAX_SHORT_LEN, ORDERED_STRUCT, TypeTag, length_field_len,
};
use crate::guard::next_token;
use crate::varuint::{MAX_VARUINT_LEN, encode_varuint, encode_varuint_padded, varuint_len};
use crate::{BlockBuffer, BufferConfig, Edit, Error, MonitorAction, MonitorHandle, Reader, Result, Writer};

/// Most documents nest only a few containers deep.
const INLINE_MARKERS: usize = 8;

/// Longest header the encoder ever writes: descriptor byte plus the longest var-uint.
const MAX_HEADER_LEN: usize = DESCRIPTOR_LEN + MAX_VARUINT_LEN;

type HeaderBytes = SmallVec<[u8; MAX_HEADER_LEN]>;

/// An open header waiting for the length of its value.
#[derive(Clone, Copy, Debug)]
struct Marker {
    id: u64,
    position: usize,
    tag: TypeTag,

    /// The number of bytes currently reserved for the header.
    header_len: usize,
}

impl Marker {
    const fn header_end(&self) -> usize {
        self.position + self.header_len
    }
}

/// Proof of an open placeholder header, redeemed by
/// [`Encoder::close_patched_header()`].
#[derive(Debug)]
#[must_use = "an open header must be closed with close_patched_header()"]
pub struct MarkerHandle {
    id: u64,
    depth: usize,
}

impl MarkerHandle {
    /// How many headers were already open when this one was opened.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }
}

/// Writes length-prefixed values into a [`BlockBuffer`] without knowing their lengths up front.
///
/// A value is written by opening a placeholder header, writing the body and closing the header.
/// Closing computes the length of the body, grows or shrinks the header in place to the size the
/// length needs and fills it in. Because the buffer is segmented, growing a header only moves the
/// bytes of the block it sits in.
///
/// Headers nest. They must be closed innermost first.
///
/// # Example
///
/// ```
/// use blockbuf::{Encoder, TypeTag};
///
/// let mut encoder = Encoder::new();
///
/// let list = encoder.open_placeholder_header(TypeTag::LIST).unwrap();
/// let string = encoder.open_placeholder_header(TypeTag::STRING).unwrap();
/// encoder.write(b"hi").unwrap();
/// encoder.close_patched_header(string, None).unwrap();
/// encoder.close_patched_header(list, None).unwrap();
///
/// let buffer = encoder.finish().unwrap();
/// assert_eq!(buffer.to_vec(), [0xB3, 0x82, b'h', b'i']);
/// ```
#[derive(Debug)]
pub struct Encoder {
    buffer: BlockBuffer,
    writer: Writer,
    markers: SmallVec<[Marker; INLINE_MARKERS]>,
}

impl Encoder {
    /// Creates an encoder writing into a new buffer with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::on(BlockBuffer::new())
    }

    /// Creates an encoder writing into a new buffer with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if the configuration is invalid.
    pub fn with_config(config: BufferConfig) -> Result<Self> {
        Ok(Self::on(BlockBuffer::with_config(config)?))
    }

    /// Creates an encoder appending to an existing buffer.
    #[must_use]
    pub fn on(buffer: BlockBuffer) -> Self {
        let writer = buffer.writer();

        Self {
            buffer,
            writer,
            markers: SmallVec::new(),
        }
    }

    /// Writes a descriptor byte with a zero length and returns the handle to close it with.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn open_placeholder_header(&mut self, tag: TypeTag) -> Result<MarkerHandle> {
        self.open_marker(tag, DESCRIPTOR_LEN)
    }

    /// Like [`open_placeholder_header()`][Self::open_placeholder_header], but reserves room
    /// for the length of a value of `expected_len` bytes, so that closing does not need to move
    /// the body if the guess is right. A wrong guess costs one insert or remove on close.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn open_placeholder_header_sized(&mut self, tag: TypeTag, expected_len: usize) -> Result<MarkerHandle> {
        self.open_marker(tag, DESCRIPTOR_LEN + length_field_len(expected_len))
    }

    fn open_marker(&mut self, tag: TypeTag, header_len: usize) -> Result<MarkerHandle> {
        let position = self.writer.position();

        let mut placeholder = HeaderBytes::new();
        if header_len == DESCRIPTOR_LEN {
            placeholder.push(Descriptor::new(tag, 0)?.to_byte());
        } else {
            placeholder.push(Descriptor::new(tag, LEN_IS_VAR)?.to_byte());
            placeholder.extend_from_slice(&encode_varuint_padded(0, header_len - DESCRIPTOR_LEN)?);
        }

        self.writer.write(&mut self.buffer, &placeholder)?;

        let marker = Marker {
            id: next_token(),
            position,
            tag,
            header_len,
        };

        let handle = MarkerHandle {
            id: marker.id,
            depth: self.markers.len(),
        };

        self.markers.push(marker);

        Ok(handle)
    }

    /// Fills in the header opened as `handle` with the length of everything written after it up
    /// to the current position, then moves back to the current position.
    ///
    /// Without `explicit_low_nibble`, a length of up to 13 bytes goes into the low nibble of the
    /// descriptor and longer lengths follow as a var-uint. With it, the descriptor carries the
    /// given nibble and the length always follows as a var-uint. Only nibbles that announce a
    /// following length are accepted: 14 for any tag, and 1 for an ordered struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if no header is open or the writer was moved back into
    /// the header, and [`Error::IllegalArgument`] if `handle` is not the innermost open header or
    /// the nibble does not announce a following length.
    pub fn close_patched_header(&mut self, handle: MarkerHandle, explicit_low_nibble: Option<u8>) -> Result<()> {
        let Some(marker) = self.markers.last().copied() else {
            return Err(Error::IllegalState("no header is open".to_string()));
        };

        if marker.id != handle.id {
            return Err(Error::IllegalArgument(format!(
                "header opened at depth {} is not the innermost of {} open headers",
                handle.depth,
                self.markers.len()
            )));
        }

        if let Some(nibble) = explicit_low_nibble.filter(|nibble| !announces_length(marker.tag, *nibble)) {
            return Err(Error::IllegalArgument(format!(
                "low nibble {nibble} does not announce a length for tag {}",
                marker.tag
            )));
        }

        let current = self.writer.position();
        let Some(value_len) = current.checked_sub(marker.header_end()) else {
            return Err(Error::IllegalState(format!(
                "writer at {current} is inside the header at {}",
                marker.position
            )));
        };

        let header = patched_header(marker.tag, value_len, explicit_low_nibble)?;
        let body_start = marker.position + DESCRIPTOR_LEN;

        let restored = if header.len() > marker.header_len {
            let grow = header.len() - marker.header_len;

            self.writer.set_position(&self.buffer, body_start)?;
            self.writer.insert(&mut self.buffer, grow)?;

            event!(
                Level::DEBUG,
                message = "header grown",
                tag = %marker.tag,
                value_len,
                header_len = header.len(),
                grown_by = grow
            );

            current + grow
        } else {
            let shrink = marker.header_len - header.len();

            if shrink > 0 {
                self.writer.set_position(&self.buffer, body_start)?;
                self.writer.remove(&mut self.buffer, shrink)?;
            }

            current - shrink
        };

        self.writer.set_position(&self.buffer, marker.position)?;
        self.writer.write(&mut self.buffer, &header)?;
        self.writer.set_position(&self.buffer, restored)?;

        self.markers.pop();

        Ok(())
    }

    /// Writes `bytes` at the current position.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write(&mut self.buffer, bytes)
    }

    /// Writes one byte at the current position.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.writer.write_byte(&mut self.buffer, byte)
    }

    /// Writes `value` as a var-uint.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn write_varuint(&mut self, value: u64) -> Result<()> {
        self.writer.write_varuint(&mut self.buffer, value)
    }

    /// Writes the header of a value whose length is known up front.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn write_header(&mut self, tag: TypeTag, len: usize) -> Result<()> {
        let header = patched_header(tag, len, None)?;
        self.writer.write(&mut self.buffer, &header)
    }

    /// Writes a typed null.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn write_null(&mut self, tag: TypeTag) -> Result<()> {
        self.writer.write_byte(&mut self.buffer, Descriptor::new(tag, LEN_IS_NULL)?.to_byte())
    }

    /// Writes a list of annotation ids: the number of bytes the ids occupy, then every id, all
    /// as var-uints.
    ///
    /// # Errors
    ///
    /// Returns a cursor or locking error if the buffer cannot be written.
    pub fn write_annotations(&mut self, ids: &[u32]) -> Result<()> {
        let ids_len: usize = ids.iter().map(|id| varuint_len(u64::from(*id))).sum();

        let mut bytes = Vec::with_capacity(varuint_len(ids_len as u64) + ids_len);
        bytes.extend_from_slice(&encode_varuint(ids_len as u64));
        for id in ids {
            bytes.extend_from_slice(&encode_varuint(u64::from(*id)));
        }

        self.writer.write(&mut self.buffer, &bytes)
    }

    /// Opens up `len` bytes at the current position without moving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if the position is inside an open header, or a cursor
    /// or locking error if the buffer cannot be written.
    pub fn insert(&mut self, len: usize) -> Result<()> {
        let position = self.writer.position();

        if let Some(marker) = self
            .markers
            .iter()
            .find(|marker| marker.position < position && position < marker.header_end())
        {
            return Err(inside_header(marker));
        }

        self.writer.insert(&mut self.buffer, len)?;
        self.shift_markers(Edit::Insert { position, len });

        Ok(())
    }

    /// Removes `len` bytes at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if the range touches an open header or runs past the
    /// end, or a cursor or locking error if the buffer cannot be written.
    pub fn remove(&mut self, len: usize) -> Result<()> {
        let position = self.writer.position();
        self.check_clear_of_headers(position, position.saturating_add(len))?;

        self.writer.remove(&mut self.buffer, len)?;
        self.shift_markers(Edit::Remove { position, len });

        Ok(())
    }

    /// Discards everything at or after the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if that would cut into an open header, or a cursor or
    /// locking error if the buffer cannot be written.
    pub fn truncate(&mut self) -> Result<()> {
        let position = self.writer.position();
        self.check_clear_of_headers(position, self.buffer.size())?;

        self.writer.truncate(&mut self.buffer)
    }

    fn check_clear_of_headers(&self, start: usize, end: usize) -> Result<()> {
        match self
            .markers
            .iter()
            .find(|marker| start < marker.header_end() && marker.position < end)
        {
            Some(marker) => Err(inside_header(marker)),
            None => Ok(()),
        }
    }

    fn shift_markers(&mut self, edit: Edit) {
        for marker in &mut self.markers {
            marker.position = edit.adjust(marker.position);
        }
    }

    /// The position at which the next byte is written.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.writer.position()
    }

    /// Moves the write position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.writer.set_position(&self.buffer, position)
    }

    /// The number of bytes written so far, including placeholder headers.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer.size()
    }

    /// The number of headers opened but not yet closed.
    #[must_use]
    pub fn open_markers(&self) -> usize {
        self.markers.len()
    }

    /// See [`BlockBuffer::register_monitor()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn register_monitor<F>(&mut self, position: usize, callback: F) -> Result<MonitorHandle>
    where
        F: FnMut(Edit, usize) -> MonitorAction + Send + Sync + 'static,
    {
        self.buffer.register_monitor(position, callback)
    }

    /// See [`BlockBuffer::track_position()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn track_position(&mut self, position: usize) -> Result<MonitorHandle> {
        self.buffer.track_position(position)
    }

    /// See [`BlockBuffer::monitor_position()`].
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn monitor_position(&self, handle: MonitorHandle) -> Option<usize> {
        self.buffer.monitor_position(handle)
    }

    /// See [`BlockBuffer::unregister_monitor()`].
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn unregister_monitor(&mut self, handle: MonitorHandle) -> bool {
        self.buffer.unregister_monitor(handle)
    }

    /// The buffer being written, including any placeholder headers still open.
    #[must_use]
    pub const fn buffer(&self) -> &BlockBuffer {
        &self.buffer
    }

    /// A reader over the current content.
    #[must_use]
    pub fn reader(&self) -> Reader {
        self.buffer.reader()
    }

    /// Hands back the buffer once every header is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if headers are still open.
    pub fn finish(self) -> Result<BlockBuffer> {
        if !self.markers.is_empty() {
            return Err(Error::IllegalState(format!("{} headers are still open", self.markers.len())));
        }

        Ok(self.buffer)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The shortest header for a value of `value_len` bytes, or the explicit form with the given
/// nibble and a var-uint length.
fn patched_header(tag: TypeTag, value_len: usize, explicit_low_nibble: Option<u8>) -> Result<HeaderBytes> {
    let mut header = HeaderBytes::new();

    match explicit_low_nibble {
        Some(nibble) => {
            header.push(Descriptor::new(tag, nibble)?.to_byte());
            header.extend_from_slice(&encode_varuint(value_len as u64));
        }
        None if value_len <= MAX_SHORT_LEN => {
            #[expect(clippy::cast_possible_truncation, reason = "short lengths fit into a nibble")]
            let nibble = value_len as u8;
            header.push(Descriptor::new(tag, nibble)?.to_byte());
        }
        None => {
            header.push(Descriptor::new(tag, LEN_IS_VAR)?.to_byte());
            header.extend_from_slice(&encode_varuint(value_len as u64));
        }
    }

    Ok(header)
}

/// Whether a descriptor with this tag and nibble is followed by a var-uint length.
fn announces_length(tag: TypeTag, nibble: u8) -> bool {
    nibble == LEN_IS_VAR || (tag == TypeTag::STRUCT && nibble == ORDERED_STRUCT)
}

fn inside_header(marker: &Marker) -> Error {
    Error::IllegalArgument(format!(
        "edit touches the open header at {}..{}",
        marker.position,
        marker.header_end()
    ))
}
