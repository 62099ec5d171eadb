// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, BufRead, Read, Write};

use crate::{BlockBuffer, Reader, Writer};

/// Adapter that implements [`Read`] and [`BufRead`] over the content of a [`BlockBuffer`].
///
/// Create an instance via [`BlockBuffer::read_adapter()`]. The blocks of the buffer already are
/// buffers, so [`BufRead`] hands them out directly. There is no point in wrapping this in a
/// [`std::io::BufReader`].
#[derive(Debug)]
pub struct BufferReader<'b> {
    buffer: &'b BlockBuffer,
    reader: Reader,
}

/// Adapter that implements [`Write`] by appending to a [`BlockBuffer`].
///
/// Create an instance via [`BlockBuffer::write_adapter()`].
#[derive(Debug)]
pub struct BufferWriter<'b> {
    buffer: &'b mut BlockBuffer,
    writer: Writer,
}

impl BlockBuffer {
    /// Returns a `std::io` reader over the content, starting at the beginning.
    #[must_use]
    pub fn read_adapter(&self) -> BufferReader<'_> {
        BufferReader {
            buffer: self,
            reader: self.reader(),
        }
    }

    /// Returns a `std::io` writer that appends to the buffer.
    #[must_use]
    pub fn write_adapter(&mut self) -> BufferWriter<'_> {
        let writer = self.writer();

        BufferWriter { buffer: self, writer }
    }
}

impl Read for BufferReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.reader.read(self.buffer, buf)?)
    }
}

impl BufRead for BufferReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.reader.chunk(self.buffer)?)
    }

    fn consume(&mut self, amount: usize) {
        self.reader.advance(amount);
    }
}

impl Write for BufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(self.buffer, buf)?;
        Ok(buf.len())
    }

    #[cfg_attr(test, mutants::skip)] // No-op, nothing to test.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
