// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::{Level, event};

use crate::block::BlockHandle;
use crate::{BlockBuffer, CallerId, Error, Result};

/// The state shared by readers and writers: which buffer they belong to, where they are and
/// which version of the buffer they last saw.
#[derive(Debug)]
pub(crate) struct CursorState {
    buffer_id: u64,
    pub(crate) caller: CallerId,
    pub(crate) position: usize,

    /// The block that held `position` when last resolved. Only ever used as a lookup hint.
    pub(crate) block: Option<BlockHandle>,

    pub(crate) version: u64,
    closed: bool,
}

/// A clone starts at the same place but mutates under an identity of its own.
impl Clone for CursorState {
    fn clone(&self) -> Self {
        Self {
            buffer_id: self.buffer_id,
            caller: CallerId::new(),
            position: self.position,
            block: self.block,
            version: self.version,
            closed: self.closed,
        }
    }
}

impl CursorState {
    pub(crate) fn new(buffer: &BlockBuffer, position: usize) -> Result<Self> {
        buffer.check_position(position)?;

        Ok(Self::open(buffer, position))
    }

    /// Creates a cursor at a position the caller knows to be valid, e.g. the start or the end.
    pub(crate) fn open(buffer: &BlockBuffer, position: usize) -> Self {
        debug_assert!(position <= buffer.size());

        Self {
            buffer_id: buffer.id(),
            caller: CallerId::new(),
            position,
            block: None,
            version: buffer.version(),
            closed: false,
        }
    }

    /// Fails unless the cursor is open, belongs to `buffer` and has seen its current version.
    ///
    /// A version mismatch keeps failing on every call until the cursor is synchronized.
    pub(crate) fn check(&self, buffer: &BlockBuffer) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        if buffer.id() != self.buffer_id {
            return Err(Error::ForeignBuffer);
        }

        if buffer.version() != self.version {
            event!(
                Level::DEBUG,
                message = "stale cursor rejected",
                caller = %self.caller,
                cursor_version = self.version,
                buffer_version = buffer.version()
            );

            return Err(Error::ConcurrentModification {
                cursor: self.version,
                buffer: buffer.version(),
            });
        }

        Ok(())
    }

    pub(crate) fn seek(&mut self, buffer: &BlockBuffer, position: usize) -> Result<()> {
        self.check(buffer)?;

        let handle = buffer.find_block(self.block, position)?;
        self.block = Some(handle);
        self.position = position;

        Ok(())
    }

    pub(crate) fn sync(&mut self, buffer: &BlockBuffer) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        if buffer.id() != self.buffer_id {
            return Err(Error::ForeignBuffer);
        }

        self.version = buffer.version();
        self.position = 0;
        self.block = None;

        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.block = None;
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.closed
    }
}
