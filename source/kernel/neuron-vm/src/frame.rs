// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Global arena of resident frames and clock victim selection
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameTable::{insert, remove, pin, unpin, select_victim}
//! INVARIANTS:
//!   - only frames owned by a page live in the arena; free frames are back in the pool
//!   - pinned frames are never chosen as victims
//!   - the clock hand sweeps at most twice per selection

extern crate alloc;

use alloc::vec::Vec;

use crate::error::VmError;
use crate::hal::FrameAddr;
use crate::space::SpaceId;
use crate::spt::PageId;

/// Index of a resident frame inside the global frame arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

/// Page currently using a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner {
    pub space: SpaceId,
    pub page: PageId,
}

/// Resident frame descriptor.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    pub addr: FrameAddr,
    pub owner: Owner,
    pinned: bool,
}

impl Frame {
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

/// Arena of frames currently backing a page.
#[derive(Default)]
pub struct FrameTable {
    slots: Vec<Option<Frame>>,
    vacant: Vec<usize>,
    hand: usize,
    resident: usize,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `addr` now backs `owner`.
    pub fn insert(&mut self, addr: FrameAddr, owner: Owner) -> Result<FrameId, VmError> {
        let frame = Frame { addr, owner, pinned: false };
        let id = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(frame);
                FrameId(slot)
            }
            None => {
                self.slots.try_reserve(1).map_err(|_| VmError::AllocationFailure)?;
                self.slots.push(Some(frame));
                FrameId(self.slots.len() - 1)
            }
        };
        self.resident += 1;
        Ok(id)
    }

    /// Unlinks `id`; the caller returns the frame to the pool.
    pub fn remove(&mut self, id: FrameId) -> Option<Frame> {
        let frame = self.slots.get_mut(id.0)?.take()?;
        self.vacant.push(id.0);
        self.resident -= 1;
        Some(frame)
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Excludes `id` from victim selection.
    pub fn pin(&mut self, id: FrameId) {
        if let Some(frame) = self.slots.get_mut(id.0).and_then(|slot| slot.as_mut()) {
            frame.pinned = true;
        }
    }

    pub fn unpin(&mut self, id: FrameId) {
        if let Some(frame) = self.slots.get_mut(id.0).and_then(|slot| slot.as_mut()) {
            frame.pinned = false;
        }
    }

    /// Number of resident frames.
    pub fn resident(&self) -> usize {
        self.resident
    }

    /// Iterates `(id, frame)` over resident frames.
    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &Frame)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|frame| (FrameId(index), frame)))
    }

    /// Picks a victim with the clock (second-chance) policy.
    ///
    /// `referenced` reports whether the frame's page was accessed since the
    /// last sweep and clears that bit.
    pub fn select_victim(&mut self, mut referenced: impl FnMut(&Frame) -> bool) -> Option<FrameId> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }
        for _ in 0..2 * len {
            let index = self.hand % len;
            self.hand = (index + 1) % len;
            let Some(frame) = self.slots[index].as_ref() else {
                continue;
            };
            if frame.pinned {
                continue;
            }
            if referenced(frame) {
                continue;
            }
            return Some(FrameId(index));
        }
        None
    }
}
