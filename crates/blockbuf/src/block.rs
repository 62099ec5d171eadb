// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Identifies a block within the block arena of a buffer.
///
/// Handles stay valid for the lifetime of the buffer. A block that was released to the free pool
/// keeps its handle and gets it back into use when it is recycled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BlockHandle(usize);

impl BlockHandle {
    pub(crate) const fn new(slot: usize) -> Self {
        Self(slot)
    }

    pub(crate) const fn slot(self) -> usize {
        self.0
    }
}

/// A fixed-capacity chunk of storage holding a contiguous run of the buffer's logical bytes.
///
/// While the block is part of the active sequence, `data[..limit]` holds the logical bytes
/// `offset..offset + limit`. A free block has no index, no offset and no content.
#[derive(Debug)]
pub(crate) struct Block {
    pub(crate) data: Box<[u8]>,

    /// Number of valid bytes at the start of `data`.
    pub(crate) limit: usize,

    /// Logical position of `data[0]` within the buffer.
    pub(crate) offset: usize,

    /// Position in the active sequence, `None` while in the free pool.
    pub(crate) index: Option<usize>,
}

impl Block {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            limit: 0,
            offset: 0,
            index: None,
        }
    }

    /// Adopts the contents of `vec` without copying. Spare capacity of the vector becomes spare
    /// capacity of the block.
    pub(crate) fn from_vec(mut vec: Vec<u8>) -> Self {
        let limit = vec.len();
        vec.resize(vec.capacity(), 0);

        Self {
            data: vec.into_boxed_slice(),
            limit,
            offset: 0,
            index: None,
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) const fn spare(&self) -> usize {
        self.capacity() - self.limit
    }

    pub(crate) const fn end(&self) -> usize {
        self.offset + self.limit
    }

    pub(crate) const fn is_free(&self) -> bool {
        self.index.is_none()
    }

    /// Whether the byte at `position` is stored in this block.
    pub(crate) const fn contains(&self, position: usize) -> bool {
        position >= self.offset && position < self.end()
    }

    /// The valid bytes of the block.
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    /// Returns the block to its pristine free state.
    pub(crate) fn release(&mut self) {
        self.limit = 0;
        self.offset = 0;
        self.index = None;
    }
}
