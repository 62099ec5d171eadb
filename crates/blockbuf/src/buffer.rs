// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io::Write;

use nm::{Event, Magnitude};
use tracing::{Level, event};

use crate::block::{Block, BlockHandle};
use crate::guard::{MutationGuard, next_token};
use crate::monitor::MonitorRegistry;
use crate::{BufferConfig, CallerId, Edit, Error, MonitorAction, MonitorHandle, Result, Validation};

/// Spans of this many blocks or fewer are searched linearly instead of by bisection.
const LINEAR_SEARCH_SPAN: usize = 3;

/// A logically contiguous, mutable byte sequence stored as an ordered run of fixed-capacity blocks.
///
/// Unlike a `Vec<u8>`, inserting or removing bytes in the middle of a `BlockBuffer` only moves the
/// bytes of the one or two blocks around the edit point instead of the whole tail of the sequence.
/// This makes it suitable for encoders that must go back and grow a header after the value it
/// describes has been written.
///
/// The buffer is accessed through cursors: a [`Reader`][crate::Reader] for reading and a
/// [`Writer`][crate::Writer] for writing, inserting and removing. Cursors do not borrow the
/// buffer between calls. Instead, every cursor call takes the buffer as a parameter and the
/// cursor checks that the buffer has not been changed by anyone else since it last looked.
///
/// Blocks released by `remove()`, `truncate()` or `clear()` are kept in a free pool and recycled
/// before new memory is allocated.
///
/// # Example
///
/// ```
/// use blockbuf::BlockBuffer;
///
/// let mut buffer = BlockBuffer::new();
/// let mut writer = buffer.writer();
///
/// writer.write(&mut buffer, b"held").unwrap();
/// writer.set_position(&buffer, 2).unwrap();
/// writer.insert_bytes(&mut buffer, b"llo wor").unwrap();
///
/// assert_eq!(buffer.to_vec(), b"hello world");
/// ```
pub struct BlockBuffer {
    /// Distinguishes this buffer from all others, so cursors can detect being handed the wrong one.
    id: u64,

    /// The identity used for mutations the buffer performs on its own behalf, e.g. `clear()`.
    owner: CallerId,

    /// Every block ever allocated by this buffer, active or free, addressed by `BlockHandle`.
    pub(crate) blocks: Vec<Block>,

    /// The blocks holding the logical byte sequence, in order. Never empty.
    pub(crate) active: Vec<BlockHandle>,

    /// Released blocks available for recycling.
    pub(crate) free: Vec<BlockHandle>,

    pub(crate) size: usize,

    /// Capacity of the most recently allocated regular block, drives the doubling schedule.
    last_block_size: usize,

    config: BufferConfig,

    pub(crate) guard: MutationGuard,

    pub(crate) monitors: MonitorRegistry,

    mutations_since_check: u32,
}

impl BlockBuffer {
    /// Creates an empty buffer with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_first_block(BufferConfig::new())
    }

    /// Creates an empty buffer with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if the configuration is invalid.
    pub fn with_config(config: BufferConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self::with_first_block(config))
    }

    /// Creates an empty buffer with the default configuration that can hold at least `capacity`
    /// bytes before allocating more memory.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Self::new();
        buffer.preallocate(capacity);
        buffer
    }

    /// Creates an empty buffer with the given configuration that can hold at least `capacity`
    /// bytes before allocating more memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if the configuration is invalid.
    pub fn with_config_and_capacity(config: BufferConfig, capacity: usize) -> Result<Self> {
        let mut buffer = Self::with_config(config)?;
        buffer.preallocate(capacity);
        Ok(buffer)
    }

    fn empty(config: BufferConfig) -> Self {
        Self {
            id: next_token(),
            owner: CallerId::new(),
            blocks: Vec::new(),
            active: Vec::new(),
            free: Vec::new(),
            size: 0,
            last_block_size: 0,
            config,
            guard: MutationGuard::default(),
            monitors: MonitorRegistry::default(),
            mutations_since_check: 0,
        }
    }

    fn with_first_block(config: BufferConfig) -> Self {
        let mut buffer = Self::empty(config);
        let capacity = buffer.next_block_size();
        let first = buffer.allocate_block(capacity);
        buffer.link_blocks(0, &[first]);
        buffer
    }

    /// Fills the free pool until the buffer can hold `capacity` bytes without allocating.
    #[cfg_attr(test, mutants::skip)] // Mutating the loop condition can cause infinite loops.
    fn preallocate(&mut self, capacity: usize) {
        let mut total = self.capacity();

        while total < capacity {
            let size = self.next_block_size();
            let handle = self.allocate_block(size);
            self.free.push(handle);
            total += size;
        }
    }

    /// The number of bytes in the buffer.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The number of completed mutations. Cursors compare this against their own snapshot.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.guard.version()
    }

    /// The configuration the buffer was created with.
    #[must_use]
    pub const fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// The number of blocks currently holding the byte sequence.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.active.len()
    }

    /// The number of released blocks waiting to be recycled.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.free.len()
    }

    /// The number of bytes the active blocks can hold without acquiring another block.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.active.iter().map(|handle| self.block(*handle).capacity()).sum()
    }

    /// Iterates over the contents of the buffer block by block.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.active
            .iter()
            .map(|handle| self.block(*handle).bytes())
            .filter(|chunk| !chunk.is_empty())
    }

    /// Copies the contents of the buffer into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.size);
        self.chunks().for_each(|chunk| vec.extend_from_slice(chunk));
        vec
    }

    /// Writes the entire contents of the buffer to `out`, one block at a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `out` fails.
    pub fn write_all_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        for chunk in self.chunks() {
            out.write_all(chunk)?;
        }

        Ok(())
    }

    /// Removes all bytes, releasing every block but the first to the free pool.
    ///
    /// Monitors are notified of the removal of the whole content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if another caller is in the middle of a mutation.
    pub fn clear(&mut self) -> Result<()> {
        let (owner, version) = (self.owner, self.version());

        self.mutate(owner, version, |buffer| {
            buffer.clear_blocks();
            Ok(())
        })
        .map(|_| ())
    }

    /// Discards every byte at or after `position`, releasing blocks that become unused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer and
    /// [`Error::LockConflict`] if another caller is in the middle of a mutation.
    pub fn truncate(&mut self, position: usize) -> Result<()> {
        let (owner, version) = (self.owner, self.version());

        self.mutate(owner, version, |buffer| buffer.truncate_blocks(position)).map(|_| ())
    }

    /// Starts a mutation on behalf of `caller`, who last saw the buffer at `version`.
    ///
    /// Cursors do this internally. Code that edits the buffer through several calls and wants other
    /// cursors to stay out of the way in the meantime can hold the lock explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if a mutation is already in progress and
    /// [`Error::VersionConflict`] if `version` is not the current version.
    pub fn begin_mutation(&mut self, caller: CallerId, version: u64) -> Result<()> {
        self.guard.begin(caller, version)
    }

    /// Completes the mutation started by `caller` and returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionMismatch`] if no mutation is in progress and
    /// [`Error::CallerMismatch`] if the mutation was started by someone else.
    pub fn end_mutation(&mut self, caller: CallerId) -> Result<u64> {
        self.guard.end(caller)
    }

    /// Releases a mutation lock held by `caller` without advancing the version.
    pub fn abandon_mutation(&mut self, caller: CallerId) {
        self.guard.abandon(caller);
    }

    /// Whether some caller currently holds the mutation lock.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.guard.is_active()
    }

    /// Registers a callback that is told about every insert and remove at or before `position`
    /// together with the adjusted position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    pub fn register_monitor<F>(&mut self, position: usize, callback: F) -> Result<MonitorHandle>
    where
        F: FnMut(Edit, usize) -> MonitorAction + Send + Sync + 'static,
    {
        self.check_position(position)?;

        Ok(self.monitors.register(position, Some(Box::new(callback))))
    }

    /// Registers a monitor without a callback, whose adjusted position can be queried via
    /// [`monitor_position()`][Self::monitor_position].
    ///
    /// # Example
    ///
    /// ```
    /// use blockbuf::BlockBuffer;
    ///
    /// let mut buffer = BlockBuffer::from(vec![0; 20]);
    /// let tracked = buffer.track_position(10).unwrap();
    ///
    /// let mut writer = buffer.writer_at(5).unwrap();
    /// writer.insert(&mut buffer, 4).unwrap();
    ///
    /// assert_eq!(buffer.monitor_position(tracked), Some(14));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `position` is past the end of the buffer.
    pub fn track_position(&mut self, position: usize) -> Result<MonitorHandle> {
        self.check_position(position)?;

        Ok(self.monitors.register(position, None))
    }

    /// Removes a monitor. Returns `false` if it was not registered (any more).
    pub fn unregister_monitor(&mut self, handle: MonitorHandle) -> bool {
        self.monitors.unregister(handle)
    }

    /// The current position tracked by a monitor, or `None` if it is not registered.
    #[must_use]
    pub fn monitor_position(&self, handle: MonitorHandle) -> Option<usize> {
        self.monitors.position(handle)
    }

    /// The number of registered monitors.
    #[must_use]
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn check_position(&self, position: usize) -> Result<()> {
        if position > self.size {
            return Err(Error::IllegalArgument(format!(
                "position {position} is past the end of the buffer ({})",
                self.size
            )));
        }

        Ok(())
    }

    /// Runs `body` as one guarded mutation and returns its result with the new buffer version.
    ///
    /// If `body` fails, the mutation is abandoned and the version does not change. Bodies must
    /// therefore fail before touching the buffer.
    pub(crate) fn mutate<T>(&mut self, caller: CallerId, version: u64, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<(T, u64)> {
        self.guard.begin(caller, version)?;

        let value = match body(self) {
            Ok(value) => value,
            Err(error) => {
                self.guard.abandon(caller);
                return Err(error);
            }
        };

        let checked = self.check_after_mutation();
        let version = self.guard.end(caller)?;
        checked?;

        Ok((value, version))
    }

    fn check_after_mutation(&mut self) -> Result<()> {
        let due = match self.config.validation() {
            Validation::Off => false,
            Validation::Always => true,
            Validation::Sampled(every) => {
                self.mutations_since_check += 1;

                if self.mutations_since_check >= every.get() {
                    self.mutations_since_check = 0;
                    true
                } else {
                    false
                }
            }
        };

        if due { self.validate() } else { Ok(()) }
    }

    pub(crate) fn block(&self, handle: BlockHandle) -> &Block {
        &self.blocks[handle.slot()]
    }

    pub(crate) fn block_mut(&mut self, handle: BlockHandle) -> &mut Block {
        &mut self.blocks[handle.slot()]
    }

    /// Borrows two distinct blocks mutably at the same time.
    pub(crate) fn two_blocks_mut(&mut self, first: BlockHandle, second: BlockHandle) -> (&mut Block, &mut Block) {
        debug_assert_ne!(first, second);

        if first.slot() < second.slot() {
            let (low, high) = self.blocks.split_at_mut(second.slot());
            (&mut low[first.slot()], &mut high[0])
        } else {
            let (low, high) = self.blocks.split_at_mut(first.slot());
            (&mut high[0], &mut low[second.slot()])
        }
    }

    pub(crate) fn last_handle(&self) -> BlockHandle {
        self.active[self.active.len() - 1]
    }

    pub(crate) fn is_last(&self, block: &Block) -> bool {
        block.index == Some(self.active.len() - 1)
    }

    /// The capacity of the next regular block: the minimum first, then doubling up to the cap.
    fn next_block_size(&mut self) -> usize {
        let size = if self.last_block_size == 0 {
            self.config.min_block_size()
        } else {
            self.last_block_size.saturating_mul(2).min(self.config.max_block_size())
        };

        self.last_block_size = size;
        size
    }

    fn allocate_block(&mut self, capacity: usize) -> BlockHandle {
        let handle = BlockHandle::new(self.blocks.len());
        self.blocks.push(Block::with_capacity(capacity));

        BLOCK_ALLOCATED_SIZE.with(|e| e.observe(capacity));
        event!(Level::TRACE, message = "block allocated", capacity, blocks = self.blocks.len());

        handle
    }

    /// Takes a free block able to hold `needed` bytes, or allocates one following the size policy.
    ///
    /// The returned block is detached: it is in neither the active sequence nor the free pool.
    #[cfg_attr(test, mutants::skip)] // Mutating the growth loop can cause infinite loops.
    pub(crate) fn acquire_block(&mut self, needed: usize) -> BlockHandle {
        if let Some(index) = self.free.iter().rposition(|handle| self.blocks[handle.slot()].capacity() >= needed) {
            let handle = self.free.remove(index);
            let capacity = self.block(handle).capacity();

            BLOCK_RECYCLED_SIZE.with(|e| e.observe(capacity));
            event!(Level::TRACE, message = "block recycled", capacity, needed);

            return handle;
        }

        let capacity = if needed > self.config.max_block_size() {
            needed
        } else {
            loop {
                let size = self.next_block_size();
                if size >= needed {
                    break size;
                }
            }
        };

        self.allocate_block(capacity)
    }

    /// Inserts detached blocks into the active sequence at `index` and renumbers what follows.
    pub(crate) fn link_blocks(&mut self, index: usize, handles: &[BlockHandle]) {
        self.active.splice(index..index, handles.iter().copied());
        self.reflow_from(index);
    }

    /// Returns the active blocks in `range` to the free pool and renumbers what follows.
    pub(crate) fn unlink_blocks(&mut self, range: std::ops::Range<usize>) {
        let start = range.start;
        let released: Vec<BlockHandle> = self.active.drain(range).collect();

        for handle in released {
            self.block_mut(handle).release();
            self.free.push(handle);
        }

        self.reflow_from(start);
    }

    /// Recomputes index and offset of every active block from `start` onward.
    pub(crate) fn reflow_from(&mut self, start: usize) {
        let mut offset = match start.checked_sub(1) {
            Some(previous) => self.block(self.active[previous]).end(),
            None => 0,
        };

        for index in start..self.active.len() {
            let handle = self.active[index];
            let block = &mut self.blocks[handle.slot()];

            block.index = Some(index);
            block.offset = offset;
            offset += block.limit;
        }
    }

    /// Finds the block holding the byte at `position`, or the last block if `position` is the end.
    ///
    /// `hint` is checked first, which makes sequential access cheap.
    pub(crate) fn find_block(&self, hint: Option<BlockHandle>, position: usize) -> Result<BlockHandle> {
        self.check_position(position)?;

        if let Some(hint) = hint {
            let block = self.block(hint);

            if !block.is_free() && (block.contains(position) || (position == self.size && self.is_last(block))) {
                return Ok(hint);
            }
        }

        if position == self.size {
            return Ok(self.last_handle());
        }

        self.search(position, 0, self.active.len())
            .ok_or_else(|| Error::InvariantViolation(format!("no active block contains position {position}")))
    }

    /// Bisects the active sequence down to a few blocks, then scans them.
    fn search(&self, position: usize, low: usize, high: usize) -> Option<BlockHandle> {
        if high - low <= LINEAR_SEARCH_SPAN {
            return self.active[low..high]
                .iter()
                .copied()
                .find(|handle| self.block(*handle).contains(position));
        }

        let middle = low + (high - low) / 2;

        if self.block(self.active[middle]).offset > position {
            self.search(position, low, middle)
        } else {
            self.search(position, middle, high)
        }
    }

    /// How many bytes can be written into the block at `position` without leaving it.
    ///
    /// Only the last block may grow. Inner blocks can only have their existing bytes overwritten.
    pub(crate) fn write_room(&self, handle: BlockHandle, position: usize) -> usize {
        let block = self.block(handle);
        let local = position - block.offset;

        if self.is_last(block) {
            block.capacity() - local
        } else {
            block.limit - local
        }
    }

    /// Resolves the block that receives a write at `position`, appending a block if the
    /// buffer's last block is full.
    pub(crate) fn block_for_write(&mut self, hint: Option<BlockHandle>, position: usize) -> Result<BlockHandle> {
        let handle = self.find_block(hint, position)?;

        if self.write_room(handle, position) > 0 {
            return Ok(handle);
        }

        let fresh = self.acquire_block(1);
        self.link_blocks(self.active.len(), &[fresh]);

        Ok(fresh)
    }

    /// Copies as much of `src` as fits into the block at `position`, growing the buffer when
    /// the write goes past the end. Returns the number of bytes copied.
    pub(crate) fn put_chunk(&mut self, handle: BlockHandle, position: usize, src: &[u8]) -> usize {
        let count = self.write_room(handle, position).min(src.len());
        let block = &mut self.blocks[handle.slot()];
        let local = position - block.offset;

        block.data[local..local + count].copy_from_slice(&src[..count]);

        if local + count > block.limit {
            self.size += local + count - block.limit;
            block.limit = local + count;
        }

        count
    }

    /// The bytes from `position` to the end of the block that holds it.
    pub(crate) fn chunk_at(&self, handle: BlockHandle, position: usize) -> &[u8] {
        let block = self.block(handle);

        &block.bytes()[position - block.offset..]
    }
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockBuffer")
            .field("size", &self.size)
            .field("version", &self.version())
            .field("blocks", &self.active.len())
            .field("free_blocks", &self.free.len())
            .field("monitors", &self.monitors)
            .finish_non_exhaustive()
    }
}

/// Cloning copies the content into a single block. Monitors and cursor state are not cloned
/// and the clone starts at version 0.
impl Clone for BlockBuffer {
    fn clone(&self) -> Self {
        let mut clone = Self::empty(self.config);
        let capacity = self.size.max(self.config.min_block_size());

        let mut block = Block::with_capacity(capacity);
        for chunk in self.chunks() {
            block.data[block.limit..block.limit + chunk.len()].copy_from_slice(chunk);
            block.limit += chunk.len();
        }

        let handle = BlockHandle::new(0);
        clone.blocks.push(block);
        clone.link_blocks(0, &[handle]);
        clone.size = self.size;
        clone.last_block_size = capacity.min(self.config.max_block_size());

        clone
    }
}

/// Adopts the vector as the first block of a buffer with the default configuration, without
/// copying its contents.
impl From<Vec<u8>> for BlockBuffer {
    fn from(value: Vec<u8>) -> Self {
        if value.capacity() == 0 {
            return Self::new();
        }

        let mut buffer = Self::empty(BufferConfig::new());
        let block = Block::from_vec(value);
        let (size, capacity) = (block.limit, block.capacity());

        buffer.blocks.push(block);
        buffer.link_blocks(0, &[BlockHandle::new(0)]);
        buffer.size = size;
        buffer.last_block_size = capacity.min(buffer.config.max_block_size());

        buffer
    }
}

impl From<&[u8]> for BlockBuffer {
    fn from(value: &[u8]) -> Self {
        Self::from(value.to_vec())
    }
}

const BLOCK_SIZE_BUCKETS: &[Magnitude] = &[64, 256, 1024, 4096, 16_384, 32_768, 65_536, 262_144];

thread_local! {
    static BLOCK_ALLOCATED_SIZE: Event = Event::builder()
        .name("blockbuf_block_allocated_size")
        .histogram(BLOCK_SIZE_BUCKETS)
        .build();

    static BLOCK_RECYCLED_SIZE: Event = Event::builder()
        .name("blockbuf_block_recycled_size")
        .histogram(BLOCK_SIZE_BUCKETS)
        .build();
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::testing::{layout, tiny_buffer};

    assert_impl_all!(BlockBuffer: Send, Sync);

    #[test]
    fn new_buffer_has_one_empty_block() {
        let buffer = BlockBuffer::new();

        assert_eq!(buffer.size(), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.block_count(), 1);
        assert_eq!(buffer.free_block_count(), 0);
        assert_eq!(buffer.capacity(), 32 * 1024);
        assert_eq!(buffer.version(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BufferConfig::new().with_block_sizes(nz!(64), nz!(8));

        assert!(matches!(BlockBuffer::with_config(config), Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn block_sizes_double_up_to_cap() {
        let mut buffer = tiny_buffer(4, 16);

        assert_eq!(buffer.capacity(), 4);
        let sizes: Vec<usize> = (0..4).map(|_| buffer.next_block_size()).collect();

        assert_eq!(sizes, vec![8, 16, 16, 16]);
    }

    #[test]
    fn oversized_request_gets_exact_block() {
        let mut buffer = tiny_buffer(4, 16);

        let handle = buffer.acquire_block(100);

        assert_eq!(buffer.block(handle).capacity(), 100);
    }

    #[test]
    fn acquire_prefers_free_blocks() {
        let mut buffer = tiny_buffer(4, 16);
        let handle = buffer.acquire_block(16);
        buffer.free.push(handle);
        let allocated = buffer.blocks.len();

        let recycled = buffer.acquire_block(10);

        assert_eq!(recycled, handle);
        assert_eq!(buffer.blocks.len(), allocated);
        assert_eq!(buffer.free_block_count(), 0);
    }

    #[test]
    fn acquire_skips_free_blocks_that_are_too_small() {
        let mut buffer = tiny_buffer(4, 16);
        let small = buffer.acquire_block(4);
        buffer.free.push(small);

        let handle = buffer.acquire_block(12);

        assert_ne!(handle, small);
        assert_eq!(buffer.free_block_count(), 1);
    }

    #[test]
    fn with_capacity_preallocates_free_blocks() {
        let config = BufferConfig::new().with_block_sizes(nz!(8), nz!(32));
        let buffer = BlockBuffer::with_config_and_capacity(config, 50).unwrap();

        assert_eq!(buffer.block_count(), 1);
        // 8 active + 16 + 32 free.
        assert_eq!(buffer.free_block_count(), 2);

        let default = BlockBuffer::with_capacity(10);
        assert_eq!(default.free_block_count(), 0);
    }

    #[test]
    fn from_vec_adopts_contents() {
        let buffer = BlockBuffer::from(b"hello".to_vec());

        assert_eq!(buffer.size(), 5);
        assert_eq!(buffer.block_count(), 1);
        assert_eq!(buffer.to_vec(), b"hello");
        buffer.validate().unwrap();

        let empty = BlockBuffer::from(Vec::new());
        assert_eq!(empty.capacity(), 32 * 1024);

        let sliced = BlockBuffer::from(&b"abc"[..]);
        assert_eq!(sliced.to_vec(), b"abc");
    }

    #[test]
    fn appends_across_blocks() {
        let mut buffer = tiny_buffer(4, 8);
        let mut writer = buffer.writer();

        writer.write(&mut buffer, b"0123456789abcdefghij").unwrap();

        assert_eq!(buffer.to_vec(), b"0123456789abcdefghij");
        assert_eq!(layout(&buffer), vec![(0, 4, 4), (4, 8, 8), (12, 8, 8)]);
        buffer.validate().unwrap();
    }

    #[test]
    fn find_block_uses_bisection_and_hint() {
        let mut buffer = tiny_buffer(2, 2);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, &[7; 40]).unwrap();
        assert_eq!(buffer.block_count(), 20);

        for position in [0, 1, 2, 17, 38, 39] {
            let handle = buffer.find_block(None, position).unwrap();
            assert!(buffer.block(handle).contains(position), "position {position}");
        }

        let end = buffer.find_block(None, 40).unwrap();
        assert_eq!(end, buffer.last_handle());

        let hint = buffer.find_block(None, 10).unwrap();
        assert_eq!(buffer.find_block(Some(hint), 11).unwrap(), hint);
        assert_ne!(buffer.find_block(Some(hint), 12).unwrap(), hint);

        assert!(matches!(buffer.find_block(None, 41), Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn truncate_releases_blocks() {
        let mut buffer = tiny_buffer(4, 4);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, b"abcdefghij").unwrap();
        assert_eq!(buffer.block_count(), 3);

        buffer.truncate(6).unwrap();

        assert_eq!(buffer.to_vec(), b"abcdef");
        assert_eq!(buffer.block_count(), 2);
        assert_eq!(buffer.free_block_count(), 1);

        buffer.truncate(4).unwrap();
        assert_eq!(buffer.to_vec(), b"abcd");
        assert_eq!(buffer.block_count(), 1);
        buffer.validate().unwrap();

        assert!(matches!(buffer.truncate(5), Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn clear_keeps_first_block() {
        let mut buffer = tiny_buffer(4, 4);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, b"abcdefghij").unwrap();
        let version = buffer.version();

        buffer.clear().unwrap();

        assert!(buffer.is_empty());
        assert_eq!(buffer.block_count(), 1);
        assert_eq!(buffer.free_block_count(), 2);
        assert_eq!(buffer.version(), version + 1);
        buffer.validate().unwrap();
    }

    #[test]
    fn clear_conflicts_with_foreign_mutation() {
        let mut buffer = BlockBuffer::new();
        let caller = CallerId::new();
        buffer.begin_mutation(caller, 0).unwrap();
        assert!(buffer.is_mutating());

        assert!(matches!(buffer.clear(), Err(Error::LockConflict { holder }) if holder == caller));

        assert_eq!(buffer.end_mutation(caller).unwrap(), 1);
        buffer.clear().unwrap();
        assert_eq!(buffer.version(), 2);
    }

    #[test]
    fn abandoned_mutation_keeps_version() {
        let mut buffer = BlockBuffer::new();
        let caller = CallerId::new();

        buffer.begin_mutation(caller, 0).unwrap();
        buffer.abandon_mutation(caller);

        assert!(!buffer.is_mutating());
        assert_eq!(buffer.version(), 0);
    }

    #[test]
    fn failed_body_does_not_advance_version() {
        let mut buffer = BlockBuffer::new();
        let caller = CallerId::new();

        let result = buffer.mutate(caller, 0, |_| -> Result<()> { Err(Error::IllegalArgument("no".to_string())) });

        assert!(result.is_err());
        assert_eq!(buffer.version(), 0);
        assert!(!buffer.is_mutating());
    }

    #[test]
    fn clone_is_single_block() {
        let mut buffer = tiny_buffer(4, 4);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, b"abcdefghij").unwrap();
        buffer.track_position(3).unwrap();

        let clone = buffer.clone();

        assert_eq!(clone.to_vec(), b"abcdefghij");
        assert_eq!(clone.block_count(), 1);
        assert_eq!(clone.version(), 0);
        assert_eq!(clone.monitor_count(), 0);
        clone.validate().unwrap();
    }

    #[test]
    fn write_all_to_streams_blocks() {
        let mut buffer = tiny_buffer(4, 4);
        let mut writer = buffer.writer();
        writer.write(&mut buffer, b"abcdefghij").unwrap();

        let mut out = Vec::new();
        buffer.write_all_to(&mut out).unwrap();

        assert_eq!(out, b"abcdefghij");
        assert_eq!(buffer.chunks().count(), 3);
    }

    #[test]
    fn monitors_are_registered_within_bounds() {
        let mut buffer = BlockBuffer::from(vec![0; 4]);

        assert!(matches!(buffer.track_position(5), Err(Error::IllegalArgument(_))));

        let handle = buffer.register_monitor(4, |_, _| MonitorAction::Keep).unwrap();
        assert_eq!(buffer.monitor_position(handle), Some(4));
        assert_eq!(buffer.monitor_count(), 1);
        assert!(buffer.unregister_monitor(handle));
        assert_eq!(buffer.monitor_position(handle), None);
    }

    #[test]
    fn debug_output() {
        let buffer = BlockBuffer::new();

        let debug = format!("{buffer:?}");

        assert!(debug.contains("BlockBuffer"));
        assert!(debug.contains("size: 0"));
    }
}
