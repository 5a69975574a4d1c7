// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a manager over in-memory collaborators.

#![allow(dead_code)]

use std::sync::Arc;

use neuron_vm::hal::page_table::SoftPageTable;
use neuron_vm::hal::ram::{HeapFramePool, RamDisk};
use neuron_vm::{SwapSpace, VmConfig, VmManager, PAGE_SIZE, SECTORS_PER_SLOT};

pub type Vm = VmManager<HeapFramePool, SoftPageTable>;

/// Manager with `frames` physical frames and `slots` swap slots.
pub fn manager(frames: usize, slots: usize) -> Vm {
    let swap = Arc::new(SwapSpace::new(Box::new(RamDisk::new(slots * SECTORS_PER_SLOT))));
    VmManager::new(HeapFramePool::new(frames), swap, VmConfig::new()).expect("valid config")
}

/// Same as [`manager`] but hands back the disk failure switch.
pub fn manager_with_fail_switch(frames: usize, slots: usize) -> (Vm, Arc<std::sync::atomic::AtomicBool>) {
    let disk = RamDisk::new(slots * SECTORS_PER_SLOT);
    let fail = disk.fail_switch();
    let swap = Arc::new(SwapSpace::new(Box::new(disk)));
    let vm = VmManager::new(HeapFramePool::new(frames), swap, VmConfig::new()).expect("valid config");
    (vm, fail)
}

/// Deterministic page-sized pattern seeded by `seed`.
pub fn pattern(seed: u8) -> Vec<u8> {
    (0..PAGE_SIZE).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// User address of page `n` in the test heap region.
pub fn heap(n: usize) -> usize {
    0x1000_0000 + n * PAGE_SIZE
}
