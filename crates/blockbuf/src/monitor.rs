// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// A structural edit applied to a buffer, as reported to position monitors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edit {
    /// `len` bytes were inserted at `position`.
    Insert {
        /// Where the bytes were inserted.
        position: usize,
        /// How many bytes were inserted.
        len: usize,
    },

    /// `len` bytes were removed starting at `position`.
    Remove {
        /// Where the removed range started.
        position: usize,
        /// How many bytes were removed.
        len: usize,
    },
}

impl Edit {
    /// The position at which the edit took place.
    #[must_use]
    pub const fn position(&self) -> usize {
        match self {
            Self::Insert { position, .. } | Self::Remove { position, .. } => *position,
        }
    }

    /// The number of bytes inserted or removed.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Insert { len, .. } | Self::Remove { len, .. } => *len,
        }
    }

    /// Whether the edit did not change anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The signed change in buffer size, negative for removals.
    #[must_use]
    #[expect(clippy::cast_possible_wrap, reason = "buffer sizes are bounded by isize::MAX")]
    pub const fn delta(&self) -> isize {
        match self {
            Self::Insert { len, .. } => *len as isize,
            Self::Remove { len, .. } => -(*len as isize),
        }
    }

    /// Maps a position from before the edit to the same logical place after it.
    ///
    /// Positions before the edit are unaffected. An insertion pushes positions at or after its start
    /// forward. A removal collapses positions inside the removed range onto its start and pulls later
    /// positions back.
    ///
    /// # Example
    ///
    /// ```
    /// use blockbuf::Edit;
    ///
    /// let insert = Edit::Insert { position: 5, len: 4 };
    /// assert_eq!(insert.adjust(10), 14);
    /// assert_eq!(insert.adjust(3), 3);
    ///
    /// let remove = Edit::Remove { position: 5, len: 4 };
    /// assert_eq!(remove.adjust(7), 5);
    /// assert_eq!(remove.adjust(10), 6);
    /// ```
    #[must_use]
    pub const fn adjust(&self, tracked: usize) -> usize {
        match *self {
            Self::Insert { position, len } => {
                if tracked >= position {
                    tracked + len
                } else {
                    tracked
                }
            }
            Self::Remove { position, len } => {
                if tracked >= position + len {
                    tracked - len
                } else if tracked > position {
                    position
                } else {
                    tracked
                }
            }
        }
    }
}

/// What a monitor wants to happen after it has been notified of an edit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MonitorAction {
    /// Keep tracking.
    #[default]
    Keep,

    /// Stop tracking and remove the monitor from the buffer.
    Unregister,
}

/// Identifies a registered monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorHandle(u64);

/// Callback invoked with every edit at or before a monitored position, together with the
/// adjusted position.
pub type MonitorCallback = Box<dyn FnMut(Edit, usize) -> MonitorAction + Send + Sync>;

struct MonitorEntry {
    handle: MonitorHandle,
    position: usize,
    callback: Option<MonitorCallback>,
}

/// The monitors registered on one buffer, kept sorted by tracked position.
#[derive(Default)]
pub(crate) struct MonitorRegistry {
    entries: Vec<MonitorEntry>,
    next_handle: u64,
}

impl MonitorRegistry {
    pub(crate) fn register(&mut self, position: usize, callback: Option<MonitorCallback>) -> MonitorHandle {
        let handle = MonitorHandle(self.next_handle);
        self.next_handle += 1;

        let index = self.entries.partition_point(|entry| entry.position <= position);
        self.entries.insert(index, MonitorEntry { handle, position, callback });

        handle
    }

    pub(crate) fn unregister(&mut self, handle: MonitorHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.handle != handle);
        self.entries.len() != before
    }

    pub(crate) fn position(&self, handle: MonitorHandle) -> Option<usize> {
        self.entries.iter().find(|entry| entry.handle == handle).map(|entry| entry.position)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Moves every affected tracked position and runs the callbacks of the moved monitors.
    pub(crate) fn notify(&mut self, edit: Edit) {
        if edit.is_empty() {
            return;
        }

        // Monitors strictly before the edit are never affected.
        let first_affected = self.entries.partition_point(|entry| entry.position < edit.position());
        let mut retired = Vec::new();

        for entry in &mut self.entries[first_affected..] {
            entry.position = edit.adjust(entry.position);

            if let Some(callback) = entry.callback.as_mut()
                && callback(edit, entry.position) == MonitorAction::Unregister
            {
                retired.push(entry.handle);
            }
        }

        if !retired.is_empty() {
            self.entries.retain(|entry| !retired.contains(&entry.handle));
        }
    }
}

impl fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| (entry.handle, entry.position)))
            .finish()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn edit_accessors() {
        let insert = Edit::Insert { position: 3, len: 2 };
        let remove = Edit::Remove { position: 3, len: 2 };

        assert_eq!(insert.position(), 3);
        assert_eq!(insert.len(), 2);
        assert_eq!(insert.delta(), 2);
        assert_eq!(remove.delta(), -2);
        assert!(!remove.is_empty());
        assert!(Edit::Insert { position: 0, len: 0 }.is_empty());
    }

    #[test]
    fn adjust_insert_at_tracked_position_pushes_forward() {
        assert_eq!(Edit::Insert { position: 10, len: 3 }.adjust(10), 13);
    }

    #[test]
    fn adjust_remove_edges() {
        let remove = Edit::Remove { position: 4, len: 4 };

        assert_eq!(remove.adjust(4), 4);
        assert_eq!(remove.adjust(8), 4);
        assert_eq!(remove.adjust(9), 5);
        assert_eq!(remove.adjust(2), 2);
    }

    #[test]
    fn registry_tracks_positions() {
        let mut registry = MonitorRegistry::default();
        let early = registry.register(2, None);
        let late = registry.register(10, None);

        registry.notify(Edit::Insert { position: 5, len: 4 });

        assert_eq!(registry.position(early), Some(2));
        assert_eq!(registry.position(late), Some(14));
    }

    #[test]
    fn callbacks_see_edits_and_can_unregister() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut registry = MonitorRegistry::default();
        let handle = registry.register(
            8,
            Some(Box::new(move |edit, position| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                assert_eq!(edit, Edit::Remove { position: 0, len: 2 });
                assert_eq!(position, 6);
                MonitorAction::Unregister
            })),
        );

        registry.notify(Edit::Remove { position: 0, len: 2 });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.position(handle), None);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn callbacks_before_edit_are_not_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut registry = MonitorRegistry::default();
        registry.register(
            1,
            Some(Box::new(move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                MonitorAction::Keep
            })),
        );

        registry.notify(Edit::Insert { position: 2, len: 5 });
        registry.notify(Edit::Insert { position: 0, len: 0 });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregister_reports_presence() {
        let mut registry = MonitorRegistry::default();
        let handle = registry.register(0, None);

        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle));
    }

    #[test]
    fn debug_lists_positions() {
        let mut registry = MonitorRegistry::default();
        registry.register(37, None);

        assert!(format!("{registry:?}").contains("37"));
    }
}
