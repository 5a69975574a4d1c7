// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Software translation table with hardware-style accessed/dirty tracking.

extern crate alloc;

use alloc::collections::BTreeMap;

use bitflags::bitflags;
use thiserror::Error;

use super::{FrameAddr, PageMapper};
use crate::config::PAGE_SIZE;

/// Highest virtual page number representable in an entry (Sv39 range).
const MAX_VA: usize = 1 << 39;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored alongside each translation.
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const USER = 1 << 4;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

/// Error returned when manipulating translations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MapError {
    /// Virtual or physical address was not page aligned.
    #[error("unaligned address")]
    Unaligned,
    /// Mapping extends beyond the translatable range.
    #[error("address out of range")]
    OutOfRange,
    /// Mapping collides with an existing entry.
    #[error("address already mapped")]
    Overlap,
    /// Flags do not describe a valid leaf entry.
    #[error("invalid flags")]
    InvalidFlags,
}

/// Flat user translation table keyed by virtual page.
///
/// Entries encode `ppn << 10 | flags` like a Sv39 leaf.
#[derive(Debug, Default)]
pub struct SoftPageTable {
    entries: BTreeMap<usize, usize>,
}

impl SoftPageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Installs a leaf mapping from `va` to `pa` using `flags`.
    pub fn map(&mut self, va: usize, pa: usize, flags: PageFlags) -> Result<(), MapError> {
        if va % PAGE_SIZE != 0 || pa % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if va >= MAX_VA {
            return Err(MapError::OutOfRange);
        }
        if !flags.contains(PageFlags::VALID | PageFlags::READ) {
            return Err(MapError::InvalidFlags);
        }
        if self.entries.contains_key(&va) {
            return Err(MapError::Overlap);
        }
        let ppn = pa / PAGE_SIZE;
        self.entries.insert(va, (ppn << 10) | flags.bits());
        Ok(())
    }

    /// Returns the raw entry mapped at `va` if it exists.
    pub fn lookup(&self, va: usize) -> Option<usize> {
        if va % PAGE_SIZE != 0 {
            return None;
        }
        self.entries.get(&va).copied()
    }

    /// Number of installed translations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flags(&self, va: usize) -> PageFlags {
        self.lookup(va).map(PageFlags::from_bits_truncate).unwrap_or(PageFlags::empty())
    }

    fn update(&mut self, va: usize, set: PageFlags, clear: PageFlags) {
        if let Some(entry) = self.entries.get_mut(&va) {
            *entry = (*entry | set.bits()) & !clear.bits();
        }
    }
}

impl PageMapper for SoftPageTable {
    fn get_mapping(&self, va: usize) -> Option<FrameAddr> {
        self.lookup(va).map(|entry| (entry >> 10) * PAGE_SIZE)
    }

    fn set_mapping(&mut self, va: usize, frame: FrameAddr, writable: bool) -> Result<(), MapError> {
        let mut flags = PageFlags::VALID | PageFlags::READ | PageFlags::USER;
        if writable {
            flags |= PageFlags::WRITE;
        }
        self.map(va, frame, flags)
    }

    fn clear_mapping(&mut self, va: usize) {
        self.entries.remove(&va);
    }

    fn is_dirty(&self, va: usize) -> bool {
        self.flags(va).contains(PageFlags::DIRTY)
    }

    fn clear_dirty(&mut self, va: usize) {
        self.update(va, PageFlags::empty(), PageFlags::DIRTY);
    }

    fn is_accessed(&self, va: usize) -> bool {
        self.flags(va).contains(PageFlags::ACCESSED)
    }

    fn clear_accessed(&mut self, va: usize) {
        self.update(va, PageFlags::empty(), PageFlags::ACCESSED);
    }

    fn is_writable(&self, va: usize) -> bool {
        self.flags(va).contains(PageFlags::WRITE)
    }

    fn record_access(&mut self, va: usize, write: bool) {
        let mut set = PageFlags::ACCESSED;
        if write {
            set |= PageFlags::DIRTY;
        }
        self.update(va, set, PageFlags::empty());
    }
}
