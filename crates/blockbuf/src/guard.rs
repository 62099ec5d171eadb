// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

/// Hands out process-unique identities for callers and buffers.
pub(crate) fn next_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);

    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// The identity under which a cursor or other client mutates a buffer.
///
/// Every [`Reader`][crate::Reader] and [`Writer`][crate::Writer] carries its own identity. Code that
/// drives [`BlockBuffer::begin_mutation()`][crate::BlockBuffer::begin_mutation] directly obtains one
/// from [`CallerId::new()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

impl CallerId {
    /// Creates a new identity, distinct from every other identity in the process.
    #[must_use]
    pub fn new() -> Self {
        Self(next_token())
    }
}

impl Default for CallerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Single-writer lock plus version counter of a buffer.
///
/// Only one caller may mutate at a time and only if it has seen the current version. Completing a
/// mutation advances the version by one, which is how cursors detect that the buffer changed
/// underneath them.
#[derive(Debug, Default)]
pub(crate) struct MutationGuard {
    version: u64,

    /// The caller holding the lock and the version at which it started.
    in_flight: Option<(CallerId, u64)>,
}

impl MutationGuard {
    pub(crate) const fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn holder(&self) -> Option<CallerId> {
        self.in_flight.map(|(caller, _)| caller)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn begin(&mut self, caller: CallerId, version: u64) -> Result<()> {
        if let Some((holder, _)) = self.in_flight {
            return Err(Error::LockConflict { holder });
        }

        if version != self.version {
            return Err(Error::VersionConflict {
                expected: self.version,
                actual: version,
            });
        }

        self.in_flight = Some((caller, version));
        Ok(())
    }

    /// Completes the mutation and returns the new version.
    pub(crate) fn end(&mut self, caller: CallerId) -> Result<u64> {
        let pending = self.in_flight.map(|(_, pending)| pending);

        if pending != Some(self.version) {
            return Err(Error::VersionMismatch {
                version: self.version,
                pending,
            });
        }

        if self.holder() != Some(caller) {
            return Err(Error::CallerMismatch {
                caller,
                holder: self.holder(),
            });
        }

        self.version += 1;
        self.in_flight = None;
        Ok(self.version)
    }

    /// Releases the lock without advancing the version. Does nothing unless `caller` holds the lock.
    pub(crate) fn abandon(&mut self, caller: CallerId) {
        if self.holder() == Some(caller) {
            self.in_flight = None;
        }
    }
}
