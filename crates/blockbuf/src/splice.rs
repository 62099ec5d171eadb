// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! We separate out the structural edits of the buffer for ease of maintenance.
//!
//! Everything here runs inside a guarded mutation and validates its arguments before touching
//! any block, so a failed call leaves the buffer as it was.

use nm::{Event, Magnitude};
use smallvec::SmallVec;
use tracing::{Level, event};

use crate::block::BlockHandle;
use crate::{BlockBuffer, Edit, Error, Result};

/// Which of the insertion strategies handled an insert, cheapest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InsertCase {
    /// The block at the insertion point had enough spare capacity.
    Local,

    /// The spare capacity of the block and its successor covered the insertion.
    SpillToNext,

    /// One new block was spliced in after the block at the insertion point.
    NewBlock,

    /// A run of new blocks was spliced in and the tail of the block moved to the last of them.
    NewBlocks,
}

impl BlockBuffer {
    /// Makes `len` bytes of unspecified content available at `position`, shifting everything
    /// from `position` onward by `len`.
    pub(crate) fn insert_space(&mut self, hint: Option<BlockHandle>, position: usize, len: usize) -> Result<Option<InsertCase>> {
        debug_assert!(self.guard.is_active());

        let current = self.find_block(hint, position)?;

        if len == 0 {
            return Ok(None);
        }

        self.size.checked_add(len).ok_or_else(|| {
            Error::IllegalArgument(format!("inserting {len} bytes would overflow the buffer size"))
        })?;

        let block = self.block(current);
        let spare = block.spare();
        let tail = block.end() - position;
        let index = block.index.unwrap_or_default();

        let case = if len <= spare {
            self.insert_local(current, position, len);
            InsertCase::Local
        } else if let Some(next) = self.active.get(index + 1).copied()
            && len - spare <= self.block(next).spare()
        {
            self.insert_spill(current, next, position, len);
            InsertCase::SpillToNext
        } else {
            let shortfall = len - spare;
            INSERT_SHORTFALL.with(|e| e.observe(shortfall));

            if shortfall > self.config().max_block_size() && tail <= shortfall {
                self.insert_new_blocks(current, position, len);
                InsertCase::NewBlocks
            } else {
                let fresh = self.acquire_block(shortfall);
                self.link_blocks(index + 1, &[fresh]);
                self.insert_spill(current, fresh, position, len);
                InsertCase::NewBlock
            }
        };

        self.size += len;
        debug_assert_eq!(self.size, self.block(self.last_handle()).end());

        event!(Level::TRACE, message = "space inserted", position, len, case = ?case);

        self.monitors.notify(Edit::Insert { position, len });

        Ok(Some(case))
    }

    fn insert_local(&mut self, current: BlockHandle, position: usize, len: usize) {
        let block = self.block_mut(current);
        let local = position - block.offset;

        block.data.copy_within(local..block.limit, local + len);
        block.limit += len;

        let index = block.index.unwrap_or_default();
        self.reflow_from(index + 1);
    }

    /// Fills `current` to capacity and pushes the overflow into the head of `next`.
    fn insert_spill(&mut self, current: BlockHandle, next: BlockHandle, position: usize, len: usize) {
        let (block, successor) = self.two_blocks_mut(current, next);

        let local = position - block.offset;
        let tail = block.limit - local;
        let into_next = len - block.spare();
        let moved = into_next.min(tail);

        // Make room at the head of the successor, then hand it the end of our tail.
        successor.data.copy_within(..successor.limit, into_next);
        successor.limit += into_next;
        successor.data[into_next - moved..into_next].copy_from_slice(&block.data[block.limit - moved..block.limit]);

        let kept = tail - moved;
        if kept > 0 {
            block.data.copy_within(local..local + kept, local + len);
        }
        block.limit = block.capacity();

        let index = block.index.unwrap_or_default();
        self.reflow_from(index + 1);
    }

    /// Splices full blocks plus one tail block after `current` and moves the whole tail of
    /// `current` into that tail block.
    fn insert_new_blocks(&mut self, current: BlockHandle, position: usize, len: usize) {
        let max = self.config().max_block_size();
        let block = self.block(current);
        let local = position - block.offset;
        let tail = block.limit - local;
        let shortfall = len - block.spare();
        let index = block.index.unwrap_or_default();

        let tail_block_len = match (shortfall % max).max(tail) {
            0 => max,
            size => size,
        };

        let tail_block = self.acquire_block(tail_block_len);
        {
            let (block, tail_target) = self.two_blocks_mut(current, tail_block);
            tail_target.data[tail_block_len - tail..tail_block_len].copy_from_slice(&block.data[local..block.limit]);
            tail_target.limit = tail_block_len;
            block.limit = block.capacity();
        }

        let mut run: SmallVec<[BlockHandle; 8]> = SmallVec::new();
        let mut remaining = shortfall - tail_block_len;

        while remaining > 0 {
            let handle = self.acquire_block(remaining.min(max));
            let block = self.block_mut(handle);
            block.limit = block.capacity().min(remaining);
            remaining -= block.limit;
            run.push(handle);
        }

        run.push(tail_block);
        self.link_blocks(index + 1, &run);
    }

    /// Removes `len` bytes starting at `position`, releasing every block that becomes empty.
    pub(crate) fn remove_range(&mut self, hint: Option<BlockHandle>, position: usize, len: usize) -> Result<()> {
        debug_assert!(self.guard.is_active());

        let end = position
            .checked_add(len)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                Error::IllegalArgument(format!(
                    "cannot remove {len} bytes at {position} from a buffer of {} bytes",
                    self.size
                ))
            })?;

        if len == 0 {
            return Ok(());
        }

        if position == 0 && end == self.size {
            self.clear_blocks();
            return Ok(());
        }

        let current = self.find_block(hint, position)?;
        let first_index = self.block(current).index.unwrap_or_default();

        let mut remaining = len;
        let mut index = first_index + 1;

        let release_start = {
            let block = self.block_mut(current);
            let local = position - block.offset;
            let taken = remaining.min(block.limit - local);
            remaining -= taken;

            if taken == block.limit {
                first_index
            } else {
                block.data.copy_within(local + taken..block.limit, local);
                block.limit -= taken;
                first_index + 1
            }
        };
        let mut release_end = index;

        // Whole blocks go back to the pool, the last touched block loses its head.
        while remaining > 0 {
            let handle = *self
                .active
                .get(index)
                .ok_or_else(|| Error::InvariantViolation(format!("ran out of blocks removing {len} bytes at {position}")))?;
            let block = self.block_mut(handle);

            if remaining >= block.limit {
                remaining -= block.limit;
                index += 1;
                release_end = index;
            } else {
                block.data.copy_within(remaining..block.limit, 0);
                block.limit -= remaining;
                remaining = 0;
            }
        }

        let released_count = release_end - release_start;
        self.unlink_blocks(release_start..release_end);
        self.reflow_from(first_index);
        self.size -= len;
        debug_assert_eq!(self.size, self.block(self.last_handle()).end());

        event!(Level::TRACE, message = "range removed", position, len, released_blocks = released_count);

        self.monitors.notify(Edit::Remove { position, len });

        Ok(())
    }

    /// Discards everything at or after `position`.
    pub(crate) fn truncate_blocks(&mut self, position: usize) -> Result<()> {
        debug_assert!(self.guard.is_active());

        self.check_position(position)?;

        let removed = self.size - position;
        if removed == 0 {
            return Ok(());
        }

        let mut keep = self
            .active
            .partition_point(|handle| self.block(*handle).offset <= position)
            .saturating_sub(1);

        // A block starting exactly at the cut would be left empty; its predecessor ends there too.
        if keep > 0 && self.block(self.active[keep]).offset == position {
            keep -= 1;
        }

        let handle = self.active[keep];
        let block = self.block_mut(handle);
        block.limit = position - block.offset;

        self.unlink_blocks(keep + 1..self.active.len());
        self.size = position;

        event!(Level::DEBUG, message = "buffer truncated", position, removed);

        self.monitors.notify(Edit::Remove { position, len: removed });

        Ok(())
    }

    /// Empties the buffer, keeping only the first block.
    pub(crate) fn clear_blocks(&mut self) {
        debug_assert!(self.guard.is_active());

        let removed = self.size;

        self.unlink_blocks(1..self.active.len());
        let first = self.active[0];
        self.block_mut(first).limit = 0;
        self.reflow_from(0);
        self.size = 0;

        event!(Level::DEBUG, message = "buffer cleared", removed);

        self.monitors.notify(Edit::Remove { position: 0, len: removed });
    }
}

const SHORTFALL_BUCKETS: &[Magnitude] = &[1, 16, 256, 4096, 32_768, 262_144];

thread_local! {
    static INSERT_SHORTFALL: Event = Event::builder()
        .name("blockbuf_insert_shortfall")
        .histogram(SHORTFALL_BUCKETS)
        .build();
}
