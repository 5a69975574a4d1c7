// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator traits consumed by the VM manager.
//!
//! The kernel provides the real implementations (physical page pool, virtio
//! swap disk, VFS file objects, Sv39 tables); `ram` and `page_table` carry
//! in-memory versions for host tests and simulations.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::IoError;
use crate::hal::page_table::MapError;

pub mod page_table;
pub mod ram;

/// Kernel-addressable location of one physical frame.
pub type FrameAddr = usize;

/// Primitive physical frame pool.
pub trait FramePool {
    /// Allocates one frame; `None` when the pool is exhausted.
    fn alloc_frame(&mut self) -> Option<FrameAddr>;
    /// Returns `frame` to the pool.
    fn free_frame(&mut self, frame: FrameAddr);
    /// Borrows the `PAGE_SIZE` bytes backing `frame`.
    fn frame(&self, frame: FrameAddr) -> &[u8];
    /// Mutably borrows the `PAGE_SIZE` bytes backing `frame`.
    fn frame_mut(&mut self, frame: FrameAddr) -> &mut [u8];

    /// Copies the full content of `src` into `dst`.
    fn copy_frame(&mut self, src: FrameAddr, dst: FrameAddr) {
        let tmp: Vec<u8> = self.frame(src).to_vec();
        self.frame_mut(dst).copy_from_slice(&tmp);
    }
}

/// Raw sector I/O against the swap device.
pub trait BlockDevice: Send {
    /// Number of sectors on the device.
    fn sector_count(&self) -> u64;
    /// Reads `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), IoError>;
    /// Writes `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<(), IoError>;
}

/// Open file handle as seen by the memory manager.
///
/// `write_at` never grows the file: bytes past the current length are dropped
/// and the returned count says how many landed.
pub trait File: Send {
    /// Reads up to `buf.len()` bytes at `offset`; returns the count read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError>;
    /// Writes up to `buf.len()` bytes at `offset`; returns the count written.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, IoError>;
    /// Current file length in bytes.
    fn len(&self) -> u64;
    /// Opens an independent handle on the same file.
    fn duplicate(&self) -> Result<Box<dyn File>, IoError>;
    /// Closes the handle.
    fn close(self: Box<Self>) {}

    /// Returns true for a zero-length file.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-address-space translation table (the hardware page table).
pub trait PageMapper {
    /// Returns the frame mapped at the page-aligned `va`.
    fn get_mapping(&self, va: usize) -> Option<FrameAddr>;
    /// Installs `va -> frame`; fails when `va` is already mapped.
    fn set_mapping(&mut self, va: usize, frame: FrameAddr, writable: bool) -> Result<(), MapError>;
    /// Removes the translation for `va`, if any.
    fn clear_mapping(&mut self, va: usize);
    /// Hardware dirty bit for `va`.
    fn is_dirty(&self, va: usize) -> bool;
    /// Clears the dirty bit for `va`.
    fn clear_dirty(&mut self, va: usize);
    /// Hardware accessed bit for `va`.
    fn is_accessed(&self, va: usize) -> bool;
    /// Clears the accessed bit for `va`.
    fn clear_accessed(&mut self, va: usize);
    /// Returns true when the translation for `va` permits writes.
    fn is_writable(&self, va: usize) -> bool;

    /// Records a software-emulated access. Hardware walkers set A/D themselves.
    fn record_access(&mut self, _va: usize, _write: bool) {}
}
