// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

//! CONTEXT: Demand-paged virtual memory for NEURON user address spaces
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + integration tests under tests/
//!
//! PUBLIC API:
//!   - VmManager: address-space lifecycle, fault handling, mmap, fork
//!   - SwapSpace: slot allocator over a dedicated block device
//!   - hal::{FramePool, BlockDevice, File, PageMapper}: collaborators
//!
//! DEPENDS_ON: spin (locks), bitflags (PTE flags), thiserror (errors), log (facade)
//! INVARIANTS:
//!   - frame <-> page links are a bijection (checked by `VmManager::verify`)
//!   - a page never holds a swap slot and a frame at the same time
//!   - one swap lock spans slot search and the device transfer

extern crate alloc;

#[macro_use]
mod diag;

pub mod config;
pub mod error;
pub mod fault;
pub mod fork;
pub mod frame;
pub mod hal;
pub mod loader;
pub mod mmap;
pub mod page;
pub mod space;
pub mod spt;
pub mod swap;
pub mod uaccess;

pub use config::{ConfigError, VmConfig, PAGE_SIZE, SECTORS_PER_SLOT, SECTOR_SIZE};
pub use error::{IoError, VmError};
pub use fault::{Fault, FaultError};
pub use frame::FrameId;
pub use hal::{BlockDevice, File, FrameAddr, FramePool, PageMapper};
pub use mmap::MappingId;
pub use page::{Initializer, Page, PageKind, VmType};
pub use space::{AddressSpace, SpaceId, VmManager};
pub use spt::{PageId, SupplementalPageTable};
pub use swap::{SwapSlot, SwapSpace};

/// Rounds `va` down to the start of its page.
pub const fn page_round_down(va: usize) -> usize {
    va & !(PAGE_SIZE - 1)
}

/// Returns true when `va` sits on a page boundary.
pub const fn is_page_aligned(va: usize) -> bool {
    va % PAGE_SIZE == 0
}
