// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;

use crate::cursor::CursorState;
use crate::descriptor::{Descriptor, Header, LEN_IS_NULL, LEN_IS_VAR, ORDERED_STRUCT, TypeTag};
use crate::varuint::VarUIntDecoder;
use crate::{BlockBuffer, Error, Result};

/// A read cursor over a [`BlockBuffer`].
///
/// The reader remembers its position and the block it was last in, so sequential reads do not
/// search for the block again. Reading at the end of the buffer yields end-of-data, not an error.
///
/// The reader does not borrow the buffer between calls. Every call takes the buffer as a
/// parameter and fails with [`Error::ConcurrentModification`] if the buffer was mutated since
/// the reader was created or last synchronized via [`sync()`][Self::sync].
///
/// # Example
///
/// ```
/// use blockbuf::BlockBuffer;
///
/// let buffer = BlockBuffer::from(b"hello".to_vec());
/// let mut reader = buffer.reader();
///
/// let mut word = [0; 4];
/// assert_eq!(reader.read(&buffer, &mut word).unwrap(), 4);
/// assert_eq!(&word, b"hell");
/// assert_eq!(reader.read_byte(&buffer).unwrap(), Some(b'o'));
/// assert_eq!(reader.read_byte(&buffer).unwrap(), None);
/// ```
#[derive(Clone, Debug)]
pub struct Reader {
    cursor: CursorState,
    mark: Option<usize>,
}

impl BlockBuffer {
    /// Creates a reader positioned at the start of the buffer.
    #[must_use]
    pub fn reader(&self) -> Reader {
        Reader {
            cursor: CursorState::open(self, 0),
            mark: None,
        }
    }

    /// Creates a reader positioned at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    pub fn reader_at(&self, position: usize) -> Result<Reader> {
        Ok(Reader {
            cursor: CursorState::new(self, position)?,
            mark: None,
        })
    }
}

impl Reader {
    /// The position of the next byte to read.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor.position
    }

    /// Moves the reader to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer, or a cursor
    /// error if the reader is closed, stale or belongs to a different buffer.
    pub fn set_position(&mut self, buffer: &BlockBuffer, position: usize) -> Result<()> {
        self.cursor.seek(buffer, position)
    }

    /// The bytes from the current position to the end of the current block. Empty at the end of
    /// the buffer.
    pub(crate) fn chunk<'b>(&mut self, buffer: &'b BlockBuffer) -> Result<&'b [u8]> {
        self.cursor.check(buffer)?;

        if self.cursor.position == buffer.size() {
            return Ok(&[]);
        }

        let handle = buffer.find_block(self.cursor.block, self.cursor.position)?;
        self.cursor.block = Some(handle);

        Ok(buffer.chunk_at(handle, self.cursor.position))
    }

    /// Marks `count` bytes of the current chunk as read.
    pub(crate) fn advance(&mut self, count: usize) {
        self.cursor.position += count;
    }

    /// Reads one byte, or returns `None` at the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns a cursor error if the reader is closed, stale or belongs to a different buffer.
    pub fn read_byte(&mut self, buffer: &BlockBuffer) -> Result<Option<u8>> {
        let byte = self.chunk(buffer)?.first().copied();

        if byte.is_some() {
            self.advance(1);
        }

        Ok(byte)
    }

    /// Reads as many bytes as are available, up to the length of `dst`, and returns the count.
    /// Zero means the end of the buffer was reached (or `dst` is empty).
    ///
    /// # Errors
    ///
    /// Returns a cursor error if the reader is closed, stale or belongs to a different buffer.
    pub fn read(&mut self, buffer: &BlockBuffer, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < dst.len() {
            let chunk = self.chunk(buffer)?;
            if chunk.is_empty() {
                break;
            }

            let count = chunk.len().min(dst.len() - filled);
            dst[filled..filled + count].copy_from_slice(&chunk[..count]);
            self.advance(count);
            filled += count;
        }

        Ok(filled)
    }

    /// Fills `dst` completely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEnd`] if the buffer ends first (the bytes up to the end are
    /// consumed), or a cursor error if the reader is closed, stale or belongs to a different buffer.
    pub fn read_exact(&mut self, buffer: &BlockBuffer, dst: &mut [u8]) -> Result<()> {
        if self.read(buffer, dst)? < dst.len() {
            return Err(Error::UnexpectedEnd {
                position: self.cursor.position,
            });
        }

        Ok(())
    }

    /// Skips up to `count` bytes and returns how many were skipped.
    ///
    /// # Errors
    ///
    /// Returns a cursor error if the reader is closed, stale or belongs to a different buffer.
    pub fn skip(&mut self, buffer: &BlockBuffer, count: usize) -> Result<usize> {
        self.cursor.check(buffer)?;

        let target = self.cursor.position.saturating_add(count).min(buffer.size());
        let skipped = target - self.cursor.position;
        self.cursor.seek(buffer, target)?;

        Ok(skipped)
    }

    /// Copies up to `len` bytes straight from the blocks of the buffer into `out` and returns
    /// how many were copied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `out` fails (the bytes written before the failure count as read),
    /// or a cursor error if the reader is closed, stale or belongs to a different buffer.
    pub fn copy_to<W: Write + ?Sized>(&mut self, buffer: &BlockBuffer, out: &mut W, len: usize) -> Result<usize> {
        let mut copied = 0;

        while copied < len {
            let chunk = self.chunk(buffer)?;
            if chunk.is_empty() {
                break;
            }

            let count = chunk.len().min(len - copied);
            out.write_all(&chunk[..count])?;
            self.advance(count);
            copied += count;
        }

        Ok(copied)
    }

    /// Remembers the current position for a later [`reset()`][Self::reset]. Only the most recent
    /// mark is kept.
    pub fn mark(&mut self) {
        self.mark = Some(self.cursor.position);
    }

    /// Returns to the most recently marked position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if no mark was set, or a cursor error if the reader is
    /// closed, stale or belongs to a different buffer.
    pub fn reset(&mut self, buffer: &BlockBuffer) -> Result<()> {
        let Some(mark) = self.mark else {
            return Err(Error::IllegalState("reset without a mark".to_string()));
        };

        self.cursor.seek(buffer, mark)
    }

    /// Reads a variable-length unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEnd`] if the buffer ends inside the integer,
    /// [`Error::VarUIntOverflow`] if it does not fit into 64 bits, or a cursor error.
    pub fn read_varuint(&mut self, buffer: &BlockBuffer) -> Result<u64> {
        let mut decoder = VarUIntDecoder::default();

        loop {
            let Some(byte) = self.read_byte(buffer)? else {
                return Err(Error::UnexpectedEnd {
                    position: self.cursor.position,
                });
            };

            if let Some(value) = decoder.push(byte)? {
                return Ok(value);
            }
        }
    }

    /// Reads a value header, or returns `None` at the end of the buffer.
    ///
    /// The length is taken from the low nibble, or from the var-uint that follows when the nibble
    /// says so. A sorted struct (struct with low nibble 1) also carries its length as a var-uint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEnd`] if the buffer ends inside the header,
    /// [`Error::VarUIntOverflow`] if the length does not fit, or a cursor error.
    pub fn read_header(&mut self, buffer: &BlockBuffer) -> Result<Option<Header>> {
        let start = self.cursor.position;

        let Some(byte) = self.read_byte(buffer)? else {
            return Ok(None);
        };

        let descriptor = Descriptor::from_byte(byte);

        let length = match (descriptor.tag(), descriptor.low_nibble()) {
            (_, LEN_IS_NULL) => None,
            (_, LEN_IS_VAR) | (TypeTag::STRUCT, ORDERED_STRUCT) => {
                let length = self.read_varuint(buffer)?;
                Some(usize::try_from(length).map_err(|error| Error::VarUIntOverflow(error.to_string()))?)
            }
            (_, short) => Some(usize::from(short)),
        };

        Ok(Some(Header {
            tag: descriptor.tag(),
            length,
            header_len: self.cursor.position - start,
        }))
    }

    /// Accepts the current version of the buffer and moves back to the start.
    ///
    /// This makes a reader usable again after the buffer was mutated through another cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader was closed and [`Error::ForeignBuffer`] if it
    /// belongs to a different buffer.
    pub fn sync(&mut self, buffer: &BlockBuffer) -> Result<()> {
        self.mark = None;
        self.cursor.sync(buffer)
    }

    /// Closes the reader. Every further call fails with [`Error::Closed`].
    pub fn close(&mut self) {
        self.cursor.close();
    }

    /// Whether the reader was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::testing::tiny_buffer;

    assert_impl_all!(Reader: Send, Sync);

    fn spread(content: &[u8]) -> BlockBuffer {
        let mut buffer = tiny_buffer(3, 3);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, content).unwrap();
        buffer
    }

    #[test]
    fn reads_across_blocks() {
        let buffer = spread(b"abcdefghij");
        let mut reader = buffer.reader();

        let mut out = [0; 10];
        assert_eq!(reader.read(&buffer, &mut out).unwrap(), 10);
        assert_eq!(&out, b"abcdefghij");
        assert_eq!(reader.read(&buffer, &mut out).unwrap(), 0);
        assert_eq!(reader.position(), 10);
    }

    #[test]
    fn reads_bytes_one_by_one() {
        let buffer = spread(b"abcd");
        let mut reader = buffer.reader();

        let mut collected = Vec::new();
        while let Some(byte) = reader.read_byte(&buffer).unwrap() {
            collected.push(byte);
        }

        assert_eq!(collected, b"abcd");
    }

    #[test]
    fn read_exact_reports_short_data() {
        let buffer = spread(b"abc");
        let mut reader = buffer.reader_at(1).unwrap();

        let mut out = [0; 4];
        assert!(matches!(reader.read_exact(&buffer, &mut out), Err(Error::UnexpectedEnd { position: 3 })));
    }

    #[test]
    fn random_access() {
        let buffer = spread(b"abcdefghij");
        let mut reader = buffer.reader();

        reader.set_position(&buffer, 7).unwrap();
        assert_eq!(reader.read_byte(&buffer).unwrap(), Some(b'h'));

        reader.set_position(&buffer, 1).unwrap();
        assert_eq!(reader.read_byte(&buffer).unwrap(), Some(b'b'));

        assert!(matches!(reader.set_position(&buffer, 11), Err(Error::IllegalArgument(_))));
        assert!(matches!(buffer.reader_at(11), Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn skip_stops_at_end() {
        let buffer = spread(b"abcdef");
        let mut reader = buffer.reader();

        assert_eq!(reader.skip(&buffer, 4).unwrap(), 4);
        assert_eq!(reader.skip(&buffer, 4).unwrap(), 2);
        assert_eq!(reader.position(), 6);
        assert_eq!(reader.skip(&buffer, usize::MAX).unwrap(), 0);
    }

    #[test]
    fn mark_and_reset() {
        let buffer = spread(b"abcdef");
        let mut reader = buffer.reader();

        assert!(matches!(reader.reset(&buffer), Err(Error::IllegalState(_))));

        reader.skip(&buffer, 2).unwrap();
        reader.mark();
        reader.skip(&buffer, 3).unwrap();
        reader.reset(&buffer).unwrap();

        assert_eq!(reader.read_byte(&buffer).unwrap(), Some(b'c'));
    }

    #[test]
    fn copy_to_sink() {
        let buffer = spread(b"abcdefghij");
        let mut reader = buffer.reader_at(2).unwrap();
        let mut out = Vec::new();

        assert_eq!(reader.copy_to(&buffer, &mut out, 5).unwrap(), 5);
        assert_eq!(out, b"cdefg");
        assert_eq!(reader.copy_to(&buffer, &mut out, 100).unwrap(), 3);
        assert_eq!(out, b"cdefghij");
    }

    #[test]
    fn stale_reader_fails_until_synced() {
        let mut buffer = spread(b"abcdef");
        let mut reader = buffer.reader();
        reader.skip(&buffer, 3).unwrap();

        buffer.truncate(4).unwrap();

        assert!(matches!(reader.read_byte(&buffer), Err(Error::ConcurrentModification { .. })));
        assert!(matches!(reader.read_byte(&buffer), Err(Error::ConcurrentModification { .. })));

        reader.sync(&buffer).unwrap();
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_byte(&buffer).unwrap(), Some(b'a'));
    }

    #[test]
    fn closed_reader_fails() {
        let buffer = spread(b"abc");
        let mut reader = buffer.reader();

        reader.close();

        assert!(reader.is_closed());
        assert!(matches!(reader.read_byte(&buffer), Err(Error::Closed)));
        assert!(matches!(reader.sync(&buffer), Err(Error::Closed)));
    }

    #[test]
    fn foreign_buffer_is_rejected() {
        let buffer = spread(b"abc");
        let other = spread(b"abc");
        let mut reader = buffer.reader();

        assert!(matches!(reader.read_byte(&other), Err(Error::ForeignBuffer)));
    }

    #[test]
    fn reads_varuints_across_blocks() {
        let buffer = spread(&[0x00, 0x01, 0xC8, 0x80, 0x01]);
        let mut reader = buffer.reader();

        assert_eq!(reader.read_varuint(&buffer).unwrap(), 200);
        assert_eq!(reader.read_varuint(&buffer).unwrap(), 0);
        assert!(matches!(reader.read_varuint(&buffer), Err(Error::UnexpectedEnd { position: 5 })));
    }

    #[test]
    fn reads_headers() {
        let buffer = spread(&[0x85, 1, 2, 3, 4, 5, 0x8E, 0x01, 0xC8, 0x0F, 0xD1, 0x82]);
        let mut reader = buffer.reader();

        let short = reader.read_header(&buffer).unwrap().unwrap();
        assert_eq!(short.tag, TypeTag::STRING);
        assert_eq!(short.length, Some(5));
        assert_eq!(short.header_len, 1);
        reader.skip(&buffer, 5).unwrap();

        let long = reader.read_header(&buffer).unwrap().unwrap();
        assert_eq!(long.length, Some(200));
        assert_eq!(long.header_len, 3);

        let null = reader.read_header(&buffer).unwrap().unwrap();
        assert_eq!(null.tag, TypeTag::NULL);
        assert_eq!(null.length, None);

        let sorted = reader.read_header(&buffer).unwrap().unwrap();
        assert_eq!(sorted.tag, TypeTag::STRUCT);
        assert_eq!(sorted.length, Some(2));
        assert_eq!(sorted.header_len, 2);

        assert_eq!(reader.read_header(&buffer).unwrap(), None);
    }
}
