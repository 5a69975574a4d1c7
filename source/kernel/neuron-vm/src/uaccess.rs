// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel access to user memory through the fault path
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + tests/{eviction,mmap,fork}.rs
//!
//! PUBLIC API: VmManager::{copy_in, copy_out}
//! INVARIANTS:
//!   - every touched page records accessed (and on writes dirty) state
//!   - a write through a read-only translation is a protection fault

use crate::config::PAGE_SIZE;
use crate::error::VmError;
use crate::fault::Fault;
use crate::hal::{FrameAddr, FramePool, PageMapper};
use crate::page_round_down;
use crate::space::{SpaceId, VmManager};

impl<P: FramePool, M: PageMapper + Default> VmManager<P, M> {
    /// Copies `data` to user address `va` in `id`, faulting pages in as needed.
    pub fn copy_out(&mut self, id: SpaceId, va: usize, data: &[u8], rsp: usize) -> Result<(), VmError> {
        let mut done = 0;
        while done < data.len() {
            let addr = va.checked_add(done).ok_or(VmError::BadAddress(va))?;
            let within = addr - page_round_down(addr);
            let chunk = (PAGE_SIZE - within).min(data.len() - done);
            let frame = self.user_frame(id, addr, true, rsp)?;
            self.pool.frame_mut(frame)[within..within + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copies user memory at `va` in `id` into `buf`.
    pub fn copy_in(&mut self, id: SpaceId, va: usize, buf: &mut [u8], rsp: usize) -> Result<(), VmError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va.checked_add(done).ok_or(VmError::BadAddress(va))?;
            let within = addr - page_round_down(addr);
            let chunk = (PAGE_SIZE - within).min(buf.len() - done);
            let frame = self.user_frame(id, addr, false, rsp)?;
            buf[done..done + chunk].copy_from_slice(&self.pool.frame(frame)[within..within + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Frame backing `addr`, resolving a missing translation like a user fault.
    fn user_frame(&mut self, id: SpaceId, addr: usize, write: bool, rsp: usize) -> Result<FrameAddr, VmError> {
        let va = page_round_down(addr);
        for _ in 0..2 {
            let space = self.space(id)?;
            if let Some(frame) = space.mmu.get_mapping(va) {
                if write && !space.mmu.is_writable(va) {
                    let resolved = self.handle_fault(id, &Fault::protection(addr, write, rsp));
                    debug_assert!(!resolved);
                    return Err(VmError::BadAddress(addr));
                }
                self.space_mut(id)?.mmu.record_access(va, write);
                return Ok(frame);
            }
            if !self.handle_fault(id, &Fault::not_present(addr, write, rsp)) {
                return Err(VmError::BadAddress(addr));
            }
        }
        Err(VmError::BadAddress(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VmConfig, SECTORS_PER_SLOT};
    use crate::hal::page_table::SoftPageTable;
    use crate::hal::ram::{HeapFramePool, RamDisk};
    use crate::swap::SwapSpace;
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec;

    fn manager() -> VmManager<HeapFramePool, SoftPageTable> {
        let swap = Arc::new(SwapSpace::new(Box::new(RamDisk::new(4 * SECTORS_PER_SLOT))));
        VmManager::new(HeapFramePool::new(4), swap, VmConfig::new()).expect("config")
    }

    #[test]
    fn copies_span_page_boundaries() {
        let mut vm = manager();
        let id = vm.create();
        vm.alloc_page(id, 0x1000, true).expect("a");
        vm.alloc_page(id, 0x2000, true).expect("b");
        vm.copy_out(id, 0x1ffe, b"spans", 0).expect("copy out");
        let mut back = vec![0u8; 5];
        vm.copy_in(id, 0x1ffe, &mut back, 0).expect("copy in");
        assert_eq!(&back, b"spans");
        assert!(vm.space(id).expect("space").mmu().is_dirty(0x2000));
    }

    #[test]
    fn read_only_and_unmapped_targets_are_bad_addresses() {
        let mut vm = manager();
        let id = vm.create();
        vm.alloc_page(id, 0x1000, false).expect("ro");
        let mut buf = [0u8; 4];
        vm.copy_in(id, 0x1000, &mut buf, 0).expect("read is fine");
        assert_eq!(vm.copy_out(id, 0x1000, b"nope", 0), Err(VmError::BadAddress(0x1000)));
        assert_eq!(vm.copy_in(id, 0x9000, &mut buf, 0), Err(VmError::BadAddress(0x9000)));
    }
}
