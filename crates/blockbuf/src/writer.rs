// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{ErrorKind, Read};

use crate::cursor::CursorState;
use crate::varuint::encode_varuint;
use crate::{BlockBuffer, Error, Result};

/// Size of the scratch buffer used when streaming from a `std::io::Read`.
const COPY_CHUNK_LEN: usize = 4096;

/// A write cursor over a [`BlockBuffer`].
///
/// Writing below the end of the buffer overwrites existing bytes, writing at the end appends.
/// The writer can also open up space at its position ([`insert()`][Self::insert]), remove bytes
/// ([`remove()`][Self::remove]) and cut the buffer off ([`truncate()`][Self::truncate]).
///
/// Every mutating call runs as one guarded mutation of the buffer under the writer's own
/// identity and advances the buffer version by one. Other cursors created earlier become stale
/// and must be synchronized before they can be used again. The writer itself stays in step.
///
/// # Example
///
/// ```
/// use blockbuf::BlockBuffer;
///
/// let mut buffer = BlockBuffer::new();
/// let mut writer = buffer.writer();
///
/// writer.write(&mut buffer, b"world").unwrap();
/// writer.set_position(&buffer, 0).unwrap();
/// writer.insert_bytes(&mut buffer, b"hello ").unwrap();
///
/// assert_eq!(buffer.to_vec(), b"hello world");
/// assert_eq!(writer.position(), 6);
/// ```
#[derive(Clone, Debug)]
pub struct Writer {
    cursor: CursorState,
}

impl BlockBuffer {
    /// Creates a writer positioned at the end of the buffer.
    #[must_use]
    pub fn writer(&self) -> Writer {
        Writer {
            cursor: CursorState::open(self, self.size()),
        }
    }

    /// Creates a writer positioned at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    pub fn writer_at(&self, position: usize) -> Result<Writer> {
        Ok(Writer {
            cursor: CursorState::new(self, position)?,
        })
    }
}

impl Writer {
    /// The position at which the next byte is written.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor.position
    }

    /// Moves the writer to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer, or a cursor
    /// error if the writer is closed, stale or belongs to a different buffer.
    pub fn set_position(&mut self, buffer: &BlockBuffer, position: usize) -> Result<()> {
        self.cursor.seek(buffer, position)
    }

    /// Runs `body` as one guarded mutation under this writer's identity.
    fn guarded<T>(&mut self, buffer: &mut BlockBuffer, body: impl FnOnce(&mut CursorState, &mut BlockBuffer) -> Result<T>) -> Result<T> {
        self.cursor.check(buffer)?;

        let (caller, version) = (self.cursor.caller, self.cursor.version);
        let cursor = &mut self.cursor;
        let (value, version) = buffer.mutate(caller, version, |buffer| body(cursor, buffer))?;

        self.cursor.version = version;
        Ok(value)
    }

    /// Writes `src` at the current position, overwriting existing bytes and appending past the end.
    ///
    /// # Errors
    ///
    /// Returns a locking error if another caller holds the mutation lock, or a cursor error if the
    /// writer is closed, stale or belongs to a different buffer.
    pub fn write(&mut self, buffer: &mut BlockBuffer, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return self.cursor.check(buffer);
        }

        self.guarded(buffer, |cursor, buffer| put(cursor, buffer, src))
    }

    /// Writes one byte at the current position.
    ///
    /// # Errors
    ///
    /// See [`write()`][Self::write].
    pub fn write_byte(&mut self, buffer: &mut BlockBuffer, byte: u8) -> Result<()> {
        self.write(buffer, &[byte])
    }

    /// Writes `value` as a variable-length unsigned integer.
    ///
    /// # Errors
    ///
    /// See [`write()`][Self::write].
    pub fn write_varuint(&mut self, buffer: &mut BlockBuffer, value: u64) -> Result<()> {
        self.write(buffer, &encode_varuint(value))
    }

    /// Streams bytes from `src` into the buffer at the current position until `src` is exhausted
    /// or `limit` bytes were copied. Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `src` fails. The bytes copied before the failure stay in the
    /// buffer and the writer is positioned after them. Otherwise see [`write()`][Self::write].
    pub fn write_from<R: Read + ?Sized>(&mut self, buffer: &mut BlockBuffer, src: &mut R, limit: Option<usize>) -> Result<usize> {
        let (copied, failure) = self.guarded(buffer, |cursor, buffer| {
            let mut scratch = [0_u8; COPY_CHUNK_LEN];
            let mut remaining = limit.unwrap_or(usize::MAX);
            let mut copied = 0;

            while remaining > 0 {
                let wanted = remaining.min(scratch.len());

                match src.read(&mut scratch[..wanted]) {
                    Ok(0) => break,
                    Ok(count) => {
                        put(cursor, buffer, &scratch[..count])?;
                        copied += count;
                        remaining -= count;
                    }
                    Err(error) if error.kind() == ErrorKind::Interrupted => {}
                    Err(error) => return Ok((copied, Some(error))),
                }
            }

            Ok((copied, None))
        })?;

        match failure {
            Some(error) => Err(Error::Io(error)),
            None => Ok(copied),
        }
    }

    /// Opens up `len` bytes of unspecified content at the current position, shifting everything
    /// after it. The writer stays where it is, ready to overwrite the new space.
    ///
    /// # Errors
    ///
    /// See [`write()`][Self::write].
    pub fn insert(&mut self, buffer: &mut BlockBuffer, len: usize) -> Result<()> {
        if len == 0 {
            return self.cursor.check(buffer);
        }

        self.guarded(buffer, |cursor, buffer| {
            buffer.insert_space(cursor.block, cursor.position, len)?;
            Ok(())
        })
    }

    /// Inserts `bytes` at the current position, shifting everything after it, and moves the
    /// writer past them.
    ///
    /// # Errors
    ///
    /// See [`write()`][Self::write].
    pub fn insert_bytes(&mut self, buffer: &mut BlockBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return self.cursor.check(buffer);
        }

        self.guarded(buffer, |cursor, buffer| {
            buffer.insert_space(cursor.block, cursor.position, bytes.len())?;
            put(cursor, buffer, bytes)
        })
    }

    /// Inserts one byte at the current position and moves the writer past it.
    ///
    /// # Errors
    ///
    /// See [`write()`][Self::write].
    pub fn insert_byte(&mut self, buffer: &mut BlockBuffer, byte: u8) -> Result<()> {
        self.insert_bytes(buffer, &[byte])
    }

    /// Removes `len` bytes starting at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if fewer than `len` bytes follow the current position.
    /// Otherwise see [`write()`][Self::write].
    pub fn remove(&mut self, buffer: &mut BlockBuffer, len: usize) -> Result<()> {
        if len == 0 {
            return self.cursor.check(buffer);
        }

        self.guarded(buffer, |cursor, buffer| buffer.remove_range(cursor.block, cursor.position, len))
    }

    /// Discards everything at or after the current position.
    ///
    /// # Errors
    ///
    /// See [`write()`][Self::write].
    pub fn truncate(&mut self, buffer: &mut BlockBuffer) -> Result<()> {
        self.guarded(buffer, |cursor, buffer| buffer.truncate_blocks(cursor.position))
    }

    /// Accepts the current version of the buffer and moves back to the start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the writer was closed and [`Error::ForeignBuffer`] if it
    /// belongs to a different buffer.
    pub fn sync(&mut self, buffer: &BlockBuffer) -> Result<()> {
        self.cursor.sync(buffer)
    }

    /// Closes the writer. Every further call fails with [`Error::Closed`].
    pub fn close(&mut self) {
        self.cursor.close();
    }

    /// Whether the writer was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }
}

/// Copies `src` into the buffer at the cursor, block by block.
fn put(cursor: &mut CursorState, buffer: &mut BlockBuffer, mut src: &[u8]) -> Result<()> {
    while !src.is_empty() {
        let handle = buffer.block_for_write(cursor.block, cursor.position)?;
        let written = buffer.put_chunk(handle, cursor.position, src);

        cursor.block = Some(handle);
        cursor.position += written;
        src = &src[written..];
    }

    Ok(())
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::CallerId;
    use crate::testing::tiny_buffer;

    assert_impl_all!(Writer: Send, Sync);

    #[test]
    fn appends_and_overwrites() {
        let mut buffer = tiny_buffer(3, 3);
        let mut writer = buffer.writer();

        writer.write(&mut buffer, b"abcdefgh").unwrap();
        writer.set_position(&buffer, 2).unwrap();
        writer.write(&mut buffer, b"XYZW").unwrap();

        assert_eq!(buffer.to_vec(), b"abXYZWgh");
        assert_eq!(writer.position(), 6);

        writer.write(&mut buffer, b"123").unwrap();
        assert_eq!(buffer.to_vec(), b"abXYZW123");
        buffer.validate().unwrap();
    }

    #[test]
    fn every_write_is_one_version() {
        let mut buffer = BlockBuffer::new();
        let mut writer = buffer.writer();

        writer.write_byte(&mut buffer, 1).unwrap();
        writer.write(&mut buffer, &[2, 3]).unwrap();
        writer.write(&mut buffer, &[]).unwrap();

        assert_eq!(buffer.version(), 2);
    }

    #[test]
    fn other_cursors_go_stale() {
        let mut buffer = BlockBuffer::new();
        let mut first = buffer.writer();
        let mut second = buffer.writer();

        first.write(&mut buffer, b"a").unwrap();

        assert!(matches!(second.write(&mut buffer, b"b"), Err(Error::ConcurrentModification { .. })));
        second.sync(&buffer).unwrap();
        second.write(&mut buffer, b"b").unwrap();

        assert_eq!(buffer.to_vec(), b"b");
    }

    #[test]
    fn foreign_lock_blocks_writes() {
        let mut buffer = BlockBuffer::new();
        let mut writer = buffer.writer();
        let caller = CallerId::new();

        buffer.begin_mutation(caller, 0).unwrap();

        assert!(matches!(writer.write(&mut buffer, b"a"), Err(Error::LockConflict { .. })));
        assert!(buffer.is_empty());

        buffer.abandon_mutation(caller);
        writer.write(&mut buffer, b"a").unwrap();
    }

    #[test]
    fn clone_is_an_independent_cursor() {
        let mut buffer = BlockBuffer::from(b"abc".to_vec());
        let mut writer = buffer.writer();
        let mut clone = writer.clone();

        clone.write(&mut buffer, b"d").unwrap();
        assert_eq!(clone.position(), 4);
        assert_eq!(writer.position(), 3);
        assert!(matches!(writer.write(&mut buffer, b"x"), Err(Error::ConcurrentModification { .. })));

        writer.sync(&buffer).unwrap();
        writer.write(&mut buffer, b"A").unwrap();
        assert_eq!(buffer.to_vec(), b"Abcd");
    }

    #[test]
    fn insert_keeps_position() {
        let mut buffer = BlockBuffer::from(b"held".to_vec());
        let mut writer = buffer.writer_at(2).unwrap();

        writer.insert(&mut buffer, 3).unwrap();
        assert_eq!(writer.position(), 2);
        writer.write(&mut buffer, b"llo").unwrap();

        assert_eq!(buffer.to_vec(), b"hellold");
    }

    #[test]
    fn insert_bytes_across_blocks() {
        let mut buffer = tiny_buffer(2, 4);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, b"abcdefghij").unwrap();

        writer.set_position(&buffer, 3).unwrap();
        writer.insert_bytes(&mut buffer, b"0123456789").unwrap();
        writer.insert_byte(&mut buffer, b'!').unwrap();

        assert_eq!(buffer.to_vec(), b"abc0123456789!defghij");
        assert_eq!(writer.position(), 14);
        buffer.validate().unwrap();
    }

    #[test]
    fn remove_and_truncate() {
        let mut buffer = tiny_buffer(3, 3);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, b"abcdefghij").unwrap();

        writer.set_position(&buffer, 2).unwrap();
        writer.remove(&mut buffer, 5).unwrap();
        assert_eq!(buffer.to_vec(), b"abhij");

        assert!(matches!(writer.remove(&mut buffer, 4), Err(Error::IllegalArgument(_))));
        assert_eq!(buffer.to_vec(), b"abhij");

        writer.set_position(&buffer, 3).unwrap();
        writer.truncate(&mut buffer).unwrap();
        assert_eq!(buffer.to_vec(), b"abh");
        buffer.validate().unwrap();
    }

    #[test]
    fn failed_mutation_keeps_writer_usable() {
        let mut buffer = BlockBuffer::from(b"abc".to_vec());
        let mut writer = buffer.writer_at(1).unwrap();
        let version = buffer.version();

        assert!(writer.remove(&mut buffer, 10).is_err());
        assert_eq!(buffer.version(), version);

        writer.remove(&mut buffer, 1).unwrap();
        assert_eq!(buffer.to_vec(), b"ac");
    }

    #[test]
    fn write_from_reader_with_limit() {
        let mut buffer = tiny_buffer(4, 8);
        let mut writer = buffer.writer();
        let mut source = Cursor::new(vec![7_u8; 10_000]);

        assert_eq!(writer.write_from(&mut buffer, &mut source, Some(6000)).unwrap(), 6000);
        assert_eq!(buffer.size(), 6000);

        assert_eq!(writer.write_from(&mut buffer, &mut source, None).unwrap(), 4000);
        assert_eq!(buffer.size(), 10_000);
        assert!(buffer.to_vec().iter().all(|byte| *byte == 7));
    }

    #[test]
    fn write_from_failing_reader_keeps_prefix() {
        struct Failing {
            served: bool,
        }

        impl Read for Failing {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.served {
                    return Err(std::io::Error::new(ErrorKind::BrokenPipe, "gone"));
                }

                self.served = true;
                buf[..3].copy_from_slice(b"abc");
                Ok(3)
            }
        }

        let mut buffer = BlockBuffer::new();
        let mut writer = buffer.writer();

        let result = writer.write_from(&mut buffer, &mut Failing { served: false }, None);

        assert!(matches!(result, Err(Error::Io(error)) if error.kind() == ErrorKind::BrokenPipe));
        assert_eq!(buffer.to_vec(), b"abc");
        assert_eq!(writer.position(), 3);
        writer.write(&mut buffer, b"d").unwrap();
    }

    #[test]
    fn closed_writer_fails() {
        let mut buffer = BlockBuffer::new();
        let mut writer = buffer.writer();

        writer.close();

        assert!(writer.is_closed());
        assert!(matches!(writer.write(&mut buffer, b"a"), Err(Error::Closed)));
        assert!(matches!(writer.insert(&mut buffer, 0), Err(Error::Closed)));
    }

    #[test]
    fn writes_varuints() {
        let mut buffer = BlockBuffer::new();
        let mut writer = buffer.writer();

        writer.write_varuint(&mut buffer, 200).unwrap();
        writer.write_varuint(&mut buffer, 0).unwrap();

        assert_eq!(buffer.to_vec(), &[0x01, 0xC8, 0x80]);
    }
}
