// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-memory frame pool, swap disk and file objects
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below; backs every integration test
//!
//! Notes:
//! - Frame addresses start at `FRAME_BASE` so that zero never names a frame.
//! - `RamDisk` and `MemFile` can be told to fail, to drive I/O error paths.
//! - `MemFile` handles share contents; open handles are counted so tests can
//!   observe duplicate/close pairing.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use super::{BlockDevice, File, FrameAddr, FramePool};
use crate::config::{PAGE_SIZE, SECTOR_SIZE};
use crate::error::IoError;

/// Physical address of the first frame handed out by [`HeapFramePool`].
pub const FRAME_BASE: FrameAddr = 0x8000_0000;

/// Fixed-capacity pool of heap-backed frames.
pub struct HeapFramePool {
    frames: Vec<Box<[u8]>>,
    free: Vec<usize>,
}

impl HeapFramePool {
    /// Creates a pool holding `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let frames = (0..capacity).map(|_| vec![0u8; PAGE_SIZE].into_boxed_slice()).collect();
        // Pop from the back so frames are handed out in ascending order.
        let free = (0..capacity).rev().collect();
        Self { frames, free }
    }

    /// Total number of frames.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames currently handed out.
    pub fn in_use(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    fn index(&self, frame: FrameAddr) -> usize {
        let index = (frame - FRAME_BASE) / PAGE_SIZE;
        assert!(index < self.frames.len(), "frame {frame:#x} not owned by pool");
        index
    }
}

impl FramePool for HeapFramePool {
    fn alloc_frame(&mut self) -> Option<FrameAddr> {
        self.free.pop().map(|index| FRAME_BASE + index * PAGE_SIZE)
    }

    fn free_frame(&mut self, frame: FrameAddr) {
        let index = self.index(frame);
        debug_assert!(!self.free.contains(&index), "double free of frame {frame:#x}");
        self.free.push(index);
    }

    fn frame(&self, frame: FrameAddr) -> &[u8] {
        &self.frames[self.index(frame)]
    }

    fn frame_mut(&mut self, frame: FrameAddr) -> &mut [u8] {
        let index = self.index(frame);
        &mut self.frames[index]
    }

    fn copy_frame(&mut self, src: FrameAddr, dst: FrameAddr) {
        let (src, dst) = (self.index(src), self.index(dst));
        if src == dst {
            return;
        }
        let (lo, hi) = self.frames.split_at_mut(src.max(dst));
        if src < dst {
            hi[0].copy_from_slice(&lo[src]);
        } else {
            lo[dst].copy_from_slice(&hi[0]);
        }
    }
}

/// Sector-addressed RAM disk used as a swap device.
pub struct RamDisk {
    data: Vec<u8>,
    fail: Arc<AtomicBool>,
}

impl RamDisk {
    /// Creates a zeroed disk with `sectors` sectors.
    pub fn new(sectors: usize) -> Self {
        Self { data: vec![0; sectors * SECTOR_SIZE], fail: Arc::new(AtomicBool::new(false)) }
    }

    /// Returns a switch that makes every subsequent transfer fail while set.
    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        self.fail.clone()
    }

    fn range(&self, sector: u64, len: usize) -> Result<core::ops::Range<usize>, IoError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(IoError::Device);
        }
        if len % SECTOR_SIZE != 0 {
            return Err(IoError::ShortTransfer { expected: len.next_multiple_of(SECTOR_SIZE), actual: len });
        }
        let start = usize::try_from(sector).map_err(|_| IoError::OutOfRange)? * SECTOR_SIZE;
        let end = start.checked_add(len).ok_or(IoError::OutOfRange)?;
        if end > self.data.len() {
            return Err(IoError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), IoError> {
        let range = self.range(sector, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<(), IoError> {
        let range = self.range(sector, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

struct MemFileShared {
    data: Mutex<Vec<u8>>,
    writes: Mutex<Vec<(u64, usize)>>,
    open: AtomicUsize,
    fail: AtomicBool,
}

/// Fixed-length in-memory file; clones of the handle share contents.
pub struct MemFile {
    shared: Arc<MemFileShared>,
}

impl MemFile {
    /// Opens a new file holding `contents`.
    pub fn new(contents: &[u8]) -> Self {
        let shared = MemFileShared {
            data: Mutex::new(contents.to_vec()),
            writes: Mutex::new(Vec::new()),
            open: AtomicUsize::new(1),
            fail: AtomicBool::new(false),
        };
        Self { shared: Arc::new(shared) }
    }

    /// Snapshot of the file contents.
    pub fn contents(&self) -> Vec<u8> {
        self.shared.data.lock().clone()
    }

    /// Number of handles on this file that are still open.
    pub fn open_handles(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Every `(offset, bytes written)` pair seen by `write_at`, in order.
    pub fn write_log(&self) -> Vec<(u64, usize)> {
        self.shared.writes.lock().clone()
    }

    /// Makes every subsequent transfer fail while `fail` is set.
    pub fn set_failing(&self, fail: bool) {
        self.shared.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), IoError> {
        if self.shared.fail.load(Ordering::SeqCst) {
            Err(IoError::Device)
        } else {
            Ok(())
        }
    }
}

impl File for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        self.check()?;
        let data = self.shared.data.lock();
        let start = usize::try_from(offset).map_err(|_| IoError::OutOfRange)?;
        if start >= data.len() {
            return Ok(0);
        }
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, IoError> {
        self.check()?;
        let mut data = self.shared.data.lock();
        let start = usize::try_from(offset).map_err(|_| IoError::OutOfRange)?;
        let count = if start >= data.len() { 0 } else { buf.len().min(data.len() - start) };
        data[start..start + count].copy_from_slice(&buf[..count]);
        self.shared.writes.lock().push((offset, count));
        Ok(count)
    }

    fn len(&self) -> u64 {
        self.shared.data.lock().len() as u64
    }

    fn duplicate(&self) -> Result<Box<dyn File>, IoError> {
        self.check()?;
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemFile { shared: self.shared.clone() }))
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}
