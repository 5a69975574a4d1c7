// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Swap slot allocator over a dedicated block device
//! OWNERS: @kernel-mm-team
//! PUBLIC API: SwapSpace::{new, swap_out, swap_in, release}
//! DEPENDS_ON: hal::BlockDevice, spin::Mutex
//! INVARIANTS:
//!   - slot `n` covers sectors `[n * SECTORS_PER_SLOT, (n + 1) * SECTORS_PER_SLOT)`
//!   - one lock spans the bitmap search and the device transfer
//!   - a slot is marked used from `swap_out` until `swap_in` or `release`

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{PAGE_SIZE, SECTORS_PER_SLOT};
use crate::error::VmError;
use crate::hal::BlockDevice;

const WORD_BITS: usize = u64::BITS as usize;

/// Index of one page-sized slot on the swap device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Returns the slot index.
    pub fn index(self) -> usize {
        self.0
    }

    /// First device sector covered by this slot.
    pub fn first_sector(self) -> u64 {
        (self.0 * SECTORS_PER_SLOT) as u64
    }
}

struct SwapInner {
    device: Box<dyn BlockDevice>,
    bitmap: Vec<u64>,
    slots: usize,
    used: usize,
}

impl SwapInner {
    fn allocate(&mut self) -> Option<SwapSlot> {
        for (word_index, word) in self.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = word_index * WORD_BITS + bit;
            if index >= self.slots {
                return None;
            }
            *word |= 1 << bit;
            self.used += 1;
            return Some(SwapSlot(index));
        }
        None
    }

    fn free(&mut self, slot: SwapSlot) {
        let (word, bit) = (slot.0 / WORD_BITS, slot.0 % WORD_BITS);
        debug_assert!(self.bitmap[word] & (1 << bit) != 0, "slot {} freed twice", slot.0);
        if self.bitmap[word] & (1 << bit) != 0 {
            self.bitmap[word] &= !(1 << bit);
            self.used -= 1;
        }
    }

    fn is_used(&self, slot: SwapSlot) -> bool {
        slot.0 < self.slots && self.bitmap[slot.0 / WORD_BITS] & (1 << (slot.0 % WORD_BITS)) != 0
    }
}

/// System-wide swap space, created once at boot and shared by every address space.
pub struct SwapSpace {
    inner: Mutex<SwapInner>,
}

impl SwapSpace {
    /// Partitions `device` into page-sized slots; trailing partial slots are unused.
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let slots = (device.sector_count() / SECTORS_PER_SLOT as u64) as usize;
        let words = slots.div_ceil(WORD_BITS);
        log_info!(target: "swap", "swap: {} slots of {} bytes", slots, PAGE_SIZE);
        Self { inner: Mutex::new(SwapInner { device, bitmap: vec![0; words], slots, used: 0 }) }
    }

    /// Total number of slots.
    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots
    }

    /// Number of slots currently holding a page.
    pub fn used_slots(&self) -> usize {
        self.inner.lock().used
    }

    /// Returns true when `slot` currently holds a page.
    pub fn is_used(&self, slot: SwapSlot) -> bool {
        self.inner.lock().is_used(slot)
    }

    /// Writes one page to the first free slot and returns it.
    pub fn swap_out(&self, page: &[u8]) -> Result<SwapSlot, VmError> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();
        let Some(slot) = inner.allocate() else {
            log_error!(target: "swap", "swap: no free slot ({} in use)", inner.used);
            return Err(VmError::SwapExhausted);
        };
        if let Err(err) = inner.device.write_sectors(slot.first_sector(), page) {
            inner.free(slot);
            log_error!(target: "swap", "swap: write of slot {} failed: {}", slot.0, err);
            return Err(err.into());
        }
        log_trace!(target: "swap", "swap: out -> slot {}", slot.0);
        Ok(slot)
    }

    /// Reads `slot` into `page` and frees the slot.
    ///
    /// On a device error the slot stays allocated so the content is not lost.
    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8]) -> Result<(), VmError> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();
        if !inner.is_used(slot) {
            return Err(VmError::InvalidArgs);
        }
        if let Err(err) = inner.device.read_sectors(slot.first_sector(), page) {
            log_error!(target: "swap", "swap: read of slot {} failed: {}", slot.0, err);
            return Err(err.into());
        }
        inner.free(slot);
        log_trace!(target: "swap", "swap: in <- slot {}", slot.0);
        Ok(())
    }

    /// Frees `slot` without reading it back.
    pub fn release(&self, slot: SwapSlot) {
        let mut inner = self.inner.lock();
        if inner.is_used(slot) {
            inner.free(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ram::RamDisk;

    fn swap(slots: usize) -> SwapSpace {
        SwapSpace::new(Box::new(RamDisk::new(slots * SECTORS_PER_SLOT)))
    }

    #[test]
    fn slots_cover_whole_pages() {
        let space = SwapSpace::new(Box::new(RamDisk::new(3 * SECTORS_PER_SLOT + 5)));
        assert_eq!(space.slot_count(), 3);
        assert_eq!(SwapSlot(2).first_sector(), 2 * SECTORS_PER_SLOT as u64);
    }

    #[test]
    fn round_trip_restores_content_and_frees_slot() {
        let space = swap(4);
        let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        let slot = space.swap_out(&page).expect("swap out");
        assert!(space.is_used(slot));
        let mut back = vec![0u8; PAGE_SIZE];
        space.swap_in(slot, &mut back).expect("swap in");
        assert_eq!(back, page);
        assert!(!space.is_used(slot));
        assert_eq!(space.used_slots(), 0);
    }

    #[test]
    fn first_fit_reuses_lowest_free_slot() {
        let space = swap(4);
        let page = vec![0u8; PAGE_SIZE];
        let a = space.swap_out(&page).expect("a");
        let b = space.swap_out(&page).expect("b");
        assert_eq!((a.index(), b.index()), (0, 1));
        space.release(a);
        assert_eq!(space.swap_out(&page).expect("c").index(), 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let space = swap(1);
        let page = vec![0u8; PAGE_SIZE];
        space.swap_out(&page).expect("only slot");
        assert_eq!(space.swap_out(&page), Err(VmError::SwapExhausted));
    }

    #[test]
    fn device_failure_releases_the_slot() {
        let disk = RamDisk::new(2 * SECTORS_PER_SLOT);
        let fail = disk.fail_switch();
        let space = SwapSpace::new(Box::new(disk));
        fail.store(true, core::sync::atomic::Ordering::Relaxed);
        let page = vec![0u8; PAGE_SIZE];
        assert!(matches!(space.swap_out(&page), Err(VmError::Io(_))));
        assert_eq!(space.used_slots(), 0);
    }
}
