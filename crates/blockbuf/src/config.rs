// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZero;

use new_zealand::nz;

use crate::{Error, Result};

/// The default size of the first block and the default growth cap, 32 KiB.
pub const DEFAULT_BLOCK_SIZE: NonZero<usize> = nz!(32 * 1024);

/// Controls when a buffer runs its structural self-check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Validation {
    /// Never validate automatically. [`BlockBuffer::validate()`][crate::BlockBuffer::validate]
    /// can still be called explicitly.
    #[default]
    Off,

    /// Validate after every n-th completed mutation.
    Sampled(NonZero<u32>),

    /// Validate after every completed mutation.
    Always,
}

/// Configuration of a [`BlockBuffer`][crate::BlockBuffer].
///
/// The first block of a buffer is `min_block_size` bytes. Every further block doubles the size of
/// the previous one until `max_block_size` is reached. A single request larger than
/// `max_block_size` is satisfied by a block of exactly the requested size.
///
/// # Example
///
/// ```
/// use blockbuf::{BlockBuffer, BufferConfig, Validation};
/// use new_zealand::nz;
///
/// let config = BufferConfig::new()
///     .with_block_sizes(nz!(1024), nz!(64 * 1024))
///     .with_validation(Validation::Always);
///
/// let buffer = BlockBuffer::with_config(config).unwrap();
/// assert_eq!(buffer.capacity(), 1024);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    min_block_size: NonZero<usize>,
    max_block_size: NonZero<usize>,
    validation: Validation,
}

impl BufferConfig {
    /// Creates the default configuration: 32 KiB blocks, no automatic validation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_block_size: DEFAULT_BLOCK_SIZE,
            max_block_size: DEFAULT_BLOCK_SIZE,
            validation: Validation::Off,
        }
    }

    /// Sets the size of the first block and the cap on block growth.
    ///
    /// The values are checked when the configuration is used to create a buffer.
    #[must_use]
    pub const fn with_block_sizes(mut self, min: NonZero<usize>, max: NonZero<usize>) -> Self {
        self.min_block_size = min;
        self.max_block_size = max;
        self
    }

    /// Sets when the buffer validates its own structure.
    #[must_use]
    pub const fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// The size of the first block.
    #[must_use]
    pub const fn min_block_size(&self) -> usize {
        self.min_block_size.get()
    }

    /// The cap on block growth.
    #[must_use]
    pub const fn max_block_size(&self) -> usize {
        self.max_block_size.get()
    }

    /// The automatic validation mode.
    #[must_use]
    pub const fn validation(&self) -> Validation {
        self.validation
    }

    /// Checks that the configuration describes a usable block size policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if the minimum block size exceeds the maximum.
    pub fn validate(&self) -> Result<()> {
        if self.min_block_size > self.max_block_size {
            return Err(Error::IllegalArgument(format!(
                "minimum block size {} exceeds maximum block size {}",
                self.min_block_size, self.max_block_size
            )));
        }

        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new()
    }
}
