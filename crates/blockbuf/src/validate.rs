// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::{Level, event};

use crate::{BlockBuffer, Error, Result};

impl BlockBuffer {
    /// Walks every block and checks that the structure of the buffer is consistent.
    ///
    /// This is a development aid. It runs automatically after mutations when the buffer is
    /// configured with [`Validation::Always`][crate::Validation::Always] or
    /// [`Validation::Sampled`][crate::Validation::Sampled].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        self.check_structure().inspect_err(|error| {
            event!(Level::ERROR, message = "buffer validation failed", error = %error, size = self.size);
        })
    }

    fn check_structure(&self) -> Result<()> {
        let violation = |detail: String| Err(Error::InvariantViolation(detail));

        if self.active.is_empty() {
            return violation("no active blocks".to_string());
        }

        let mut seen = vec![false; self.blocks.len()];
        let mut expected_offset = 0;

        for (index, handle) in self.active.iter().enumerate() {
            let Some(slot_seen) = seen.get_mut(handle.slot()) else {
                return violation(format!("active block {index} has unknown slot {}", handle.slot()));
            };

            if std::mem::replace(slot_seen, true) {
                return violation(format!("block slot {} appears twice", handle.slot()));
            }

            let block = self.block(*handle);

            if block.index != Some(index) {
                return violation(format!("block at {index} records index {:?}", block.index));
            }

            if block.offset != expected_offset {
                return violation(format!("block {index} starts at {} instead of {expected_offset}", block.offset));
            }

            if block.limit > block.capacity() {
                return violation(format!("block {index} limit {} exceeds capacity {}", block.limit, block.capacity()));
            }

            if block.limit == 0 && index + 1 != self.active.len() {
                return violation(format!("inner block {index} is empty"));
            }

            expected_offset += block.limit;
        }

        if expected_offset != self.size {
            return violation(format!("blocks hold {expected_offset} bytes but size is {}", self.size));
        }

        for handle in &self.free {
            let Some(slot_seen) = seen.get_mut(handle.slot()) else {
                return violation(format!("free block has unknown slot {}", handle.slot()));
            };

            if std::mem::replace(slot_seen, true) {
                return violation(format!("block slot {} is both active and free", handle.slot()));
            }

            let block = self.block(*handle);
            if !block.is_free() || block.limit != 0 || block.offset != 0 {
                return violation(format!("free block slot {} is not reset", handle.slot()));
            }
        }

        if let Some(orphan) = seen.iter().position(|seen| !seen) {
            return violation(format!("block slot {orphan} is neither active nor free"));
        }

        Ok(())
    }
}
