// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page fault resolution with stack growth
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + tests/fault.rs
//!
//! PUBLIC API: VmManager::{handle_fault, resolve_fault}, Fault, FaultError
//! INVARIANTS:
//!   - kernel addresses and protection faults are never resolved
//!   - stack growth only happens on a table miss inside the growth window
//!   - a resolved fault leaves the translation installed

use thiserror::Error;

use crate::error::VmError;
use crate::hal::{FramePool, PageMapper};
use crate::page::Page;
use crate::page_round_down;
use crate::space::{SpaceId, VmManager};

/// Trap information handed over by the architecture fault path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fault {
    /// Faulting virtual address.
    pub addr: usize,
    /// Access originated in user mode.
    pub user: bool,
    /// Access was a write.
    pub write: bool,
    /// No translation existed (as opposed to a permission violation).
    pub not_present: bool,
    /// User stack pointer at the time of the fault.
    pub stack_pointer: usize,
}

impl Fault {
    /// User-mode fault on a missing translation.
    pub const fn not_present(addr: usize, write: bool, stack_pointer: usize) -> Self {
        Self { addr, user: true, write, not_present: true, stack_pointer }
    }

    /// User-mode fault on a present translation that forbids the access.
    pub const fn protection(addr: usize, write: bool, stack_pointer: usize) -> Self {
        Self { addr, user: true, write, not_present: false, stack_pointer }
    }
}

/// Reason a fault could not be resolved.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    #[error("kernel address {0:#x}")]
    KernelAddress(usize),
    #[error("protection violation at {0:#x}")]
    ProtectionViolation(usize),
    #[error("no page at {0:#x}")]
    Unmapped(usize),
    #[error("write to read-only page at {0:#x}")]
    ReadOnly(usize),
    #[error("translation for {0:#x} missing after claim")]
    NotInstalled(usize),
    #[error("claim failed: {0}")]
    Claim(#[from] VmError),
}

impl<P: FramePool, M: PageMapper + Default> VmManager<P, M> {
    /// Resolves `fault` in `id`. `false` means the faulting process must be terminated.
    pub fn handle_fault(&mut self, id: SpaceId, fault: &Fault) -> bool {
        match self.resolve_fault(id, fault) {
            Ok(()) => true,
            Err(err) => {
                log_info!(
                    target: "fault",
                    "fault: space {} {} {:#x} rejected: {}",
                    id.to_raw(),
                    if fault.write { "write" } else { "read" },
                    fault.addr,
                    err
                );
                false
            }
        }
    }

    /// Like [`handle_fault`](Self::handle_fault) but reports why resolution failed.
    pub fn resolve_fault(&mut self, id: SpaceId, fault: &Fault) -> Result<(), FaultError> {
        let addr = fault.addr;
        if self.config.is_kernel_addr(addr) {
            return Err(FaultError::KernelAddress(addr));
        }
        if !fault.not_present {
            return Err(FaultError::ProtectionViolation(addr));
        }
        let va = page_round_down(addr);
        let (page, grown) = match self.space(id)?.spt.lookup(va) {
            Some(page) => (page, false),
            None if self.config.is_stack_access(addr, fault.stack_pointer) => {
                let page = self.insert_page(id, Page::anon(va, true))?;
                log_debug!(target: "fault", "fault: stack grows to {:#x}", va);
                (page, true)
            }
            None => return Err(FaultError::Unmapped(addr)),
        };

        let writable = self.space(id)?.spt.get(page).is_some_and(Page::writable);
        if fault.write && !writable {
            return Err(FaultError::ReadOnly(addr));
        }
        if let Err(err) = self.claim(id, page) {
            // A stack page that never got a frame is not kept.
            if grown {
                if let Err(release) = self.release_page(id, page) {
                    log_warn!(target: "fault", "fault: dropping stack page {:#x} failed: {}", va, release);
                }
            }
            return Err(err.into());
        }
        if self.space(id)?.mmu.get_mapping(va).is_none() {
            return Err(FaultError::NotInstalled(addr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VmConfig, PAGE_SIZE, SECTORS_PER_SLOT};
    use crate::hal::page_table::SoftPageTable;
    use crate::hal::ram::{HeapFramePool, RamDisk};
    use crate::page::VmType;
    use crate::swap::SwapSpace;
    use alloc::boxed::Box;
    use alloc::sync::Arc;

    fn manager() -> VmManager<HeapFramePool, SoftPageTable> {
        let swap = Arc::new(SwapSpace::new(Box::new(RamDisk::new(4 * SECTORS_PER_SLOT))));
        VmManager::new(HeapFramePool::new(8), swap, VmConfig::new()).expect("config")
    }

    #[test]
    fn rejects_kernel_and_protection_faults() {
        let mut vm = manager();
        let id = vm.create();
        let kernel = vm.config().kernel_base;
        assert_eq!(
            vm.resolve_fault(id, &Fault::not_present(kernel + 8, false, 0)),
            Err(FaultError::KernelAddress(kernel + 8))
        );
        vm.alloc_page(id, 0x1000, true).expect("alloc");
        assert_eq!(
            vm.resolve_fault(id, &Fault::protection(0x1000, true, 0)),
            Err(FaultError::ProtectionViolation(0x1000))
        );
    }

    #[test]
    fn lazy_page_is_claimed_on_first_touch() {
        let mut vm = manager();
        let id = vm.create();
        vm.alloc_page(id, 0x1000, false).expect("alloc");
        assert!(vm.handle_fault(id, &Fault::not_present(0x1234, false, 0)));
        assert!(vm.resident_bytes(id, 0x1000).is_some());
        assert_eq!(
            vm.resolve_fault(id, &Fault::not_present(0x2000, false, 0)),
            Err(FaultError::Unmapped(0x2000))
        );
    }

    #[test]
    fn write_to_read_only_page_is_rejected_without_claim() {
        let mut vm = manager();
        let id = vm.create();
        vm.alloc_page(id, 0x1000, false).expect("alloc");
        assert_eq!(vm.resolve_fault(id, &Fault::not_present(0x1000, true, 0)), Err(FaultError::ReadOnly(0x1000)));
        assert_eq!(vm.resident_frames(), 0);
    }

    #[test]
    fn stack_grows_only_inside_the_window() {
        let mut vm = manager();
        let id = vm.create();
        let top = vm.config().user_stack_top;
        let rsp = top - 0x2000;
        assert!(vm.handle_fault(id, &Fault::not_present(rsp - 8, true, rsp)));
        assert_eq!(vm.page_type(id, page_round_down(rsp - 8)), Some(VmType::Anon));
        assert!(!vm.handle_fault(id, &Fault::not_present(rsp - PAGE_SIZE - 8, true, rsp)));
        let floor = vm.config().stack_floor();
        assert!(!vm.handle_fault(id, &Fault::not_present(floor - 8, true, floor)));
        vm.verify().expect("invariants");
    }
}
