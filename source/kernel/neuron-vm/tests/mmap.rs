// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory-mapped file lifecycle
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 8 integration tests
//!
//! TEST_SCOPE:
//!   - Lazy file-backed pages with zero-filled tails
//!   - Writeback of dirty pages only (unmap, eviction, exit)
//!   - One handle per mapping, closed exactly once
//!   - Argument validation without partial state
//!
//! TEST_SCENARIOS:
//!   - short_tail_page_is_zero_filled(): 4100-byte file over two pages
//!   - unmap_writes_back_only_dirty_pages(): dirty tail page reaches the file
//!   - eviction_writes_back_dirty_file_pages(): one frame, two mapped pages
//!   - rejected_arguments_leave_no_pages(): InvalidArgs and conflicts
//!   - mapping_honours_file_offset(): offset into the file
//!   - adjacent_mappings_unmap_independently(): identity, not contiguity
//!   - destroy_flushes_and_closes_mappings(): process exit path
//!   - unmap_requires_a_file_page(): anonymous and missing pages
//!
//! DEPENDENCIES:
//!   - neuron_vm::hal::ram::MemFile: shared-content file with open-handle count

mod common;

use common::{heap, manager};
use neuron_vm::hal::ram::MemFile;
use neuron_vm::{VmError, VmType, PAGE_SIZE};

const BASE: usize = 0x2000_0000;

fn contents(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 97) as u8 + 1).collect()
}

#[test]
fn short_tail_page_is_zero_filled() {
    let mut vm = manager(4, 4);
    let id = vm.create();
    let bytes = contents(4100);
    let file = MemFile::new(&bytes);

    assert_eq!(vm.create_mapping(id, BASE, 4100, true, &file, 0), Ok(BASE));
    assert_eq!(file.open_handles(), 2);
    assert_eq!(vm.space(id).expect("space").spt().len(), 2);
    assert_eq!(vm.page_type(id, BASE + PAGE_SIZE), Some(VmType::File));
    assert_eq!(vm.resident_frames(), 0);

    let mut page = vec![0u8; PAGE_SIZE];
    vm.copy_in(id, BASE, &mut page, 0).expect("page 0");
    assert_eq!(page.as_slice(), &bytes[..PAGE_SIZE]);
    vm.copy_in(id, BASE + PAGE_SIZE, &mut page, 0).expect("page 1");
    assert_eq!(&page[..4], &bytes[PAGE_SIZE..]);
    assert!(page[4..].iter().all(|&b| b == 0));

    vm.remove_mapping(id, BASE).expect("unmap");
    assert!(file.write_log().is_empty());
    assert_eq!(file.open_handles(), 1);
    assert!(vm.space(id).expect("space").spt().is_empty());
    vm.verify().expect("invariants");
}

#[test]
fn unmap_writes_back_only_dirty_pages() {
    let mut vm = manager(4, 4);
    let id = vm.create();
    let file = MemFile::new(&contents(4100));
    vm.create_mapping(id, BASE, 4100, true, &file, 0).expect("mmap");

    let mut scratch = [0u8; 8];
    vm.copy_in(id, BASE, &mut scratch, 0).expect("read page 0");
    vm.copy_out(id, BASE + PAGE_SIZE, b"WXYZ", 0).expect("write page 1");

    vm.remove_mapping(id, BASE).expect("unmap");
    assert_eq!(file.write_log(), vec![(PAGE_SIZE as u64, 4)]);
    let after = file.contents();
    assert_eq!(after.len(), 4100);
    assert_eq!(&after[PAGE_SIZE..], b"WXYZ");
    assert_eq!(file.open_handles(), 1);
}

#[test]
fn eviction_writes_back_dirty_file_pages() {
    let mut vm = manager(1, 2);
    let id = vm.create();
    let file = MemFile::new(&contents(2 * PAGE_SIZE));
    vm.create_mapping(id, BASE, 2 * PAGE_SIZE, true, &file, 0).expect("mmap");

    vm.copy_out(id, BASE, b"dirty", 0).expect("write page 0");
    let mut scratch = [0u8; 5];
    vm.copy_in(id, BASE + PAGE_SIZE, &mut scratch, 0).expect("read page 1 evicts page 0");
    assert_eq!(file.write_log(), vec![(0, PAGE_SIZE)]);
    assert_eq!(&file.contents()[..5], b"dirty");
    assert_eq!(vm.swap().used_slots(), 0);

    vm.copy_in(id, BASE, &mut scratch, 0).expect("page 0 reloads from the file");
    assert_eq!(&scratch, b"dirty");
    assert_eq!(file.write_log().len(), 1);
    vm.verify().expect("invariants");
}

#[test]
fn rejected_arguments_leave_no_pages() {
    let mut vm = manager(2, 2);
    let id = vm.create();
    let file = MemFile::new(&contents(3 * PAGE_SIZE));
    let empty = MemFile::new(&[]);
    let kernel = vm.config().kernel_base;

    let cases = [
        vm.create_mapping(id, 0, PAGE_SIZE, true, &file, 0),
        vm.create_mapping(id, BASE + 1, PAGE_SIZE, true, &file, 0),
        vm.create_mapping(id, BASE, 0, true, &file, 0),
        vm.create_mapping(id, BASE, PAGE_SIZE, true, &file, 100),
        vm.create_mapping(id, kernel - PAGE_SIZE, 2 * PAGE_SIZE, true, &file, 0),
        vm.create_mapping(id, BASE, usize::MAX, true, &file, 0),
        vm.create_mapping(id, BASE, PAGE_SIZE, true, &empty, 0),
        vm.create_mapping(id, BASE, PAGE_SIZE, true, &file, 3 * PAGE_SIZE as u64),
    ];
    for (index, result) in cases.into_iter().enumerate() {
        assert_eq!(result, Err(VmError::InvalidArgs), "case {index}");
    }

    vm.alloc_page(id, BASE + 2 * PAGE_SIZE, true).expect("occupant");
    assert_eq!(
        vm.create_mapping(id, BASE, 3 * PAGE_SIZE, true, &file, 0),
        Err(VmError::MappingConflict(BASE))
    );
    assert_eq!(vm.space(id).expect("space").spt().len(), 1);
    assert!(vm.space(id).expect("space").mappings().is_empty());
    assert_eq!(file.open_handles(), 1);
    assert_eq!(empty.open_handles(), 1);
}

#[test]
fn mapping_honours_file_offset() {
    let mut vm = manager(2, 2);
    let id = vm.create();
    let bytes = contents(3 * PAGE_SIZE);
    let file = MemFile::new(&bytes);
    vm.create_mapping(id, BASE, 3 * PAGE_SIZE, false, &file, PAGE_SIZE as u64).expect("mmap");
    assert_eq!(vm.space(id).expect("space").spt().len(), 3);

    let mut page = vec![0u8; PAGE_SIZE];
    vm.copy_in(id, BASE + PAGE_SIZE, &mut page, 0).expect("second page");
    assert_eq!(page.as_slice(), &bytes[2 * PAGE_SIZE..]);
    vm.copy_in(id, BASE + 2 * PAGE_SIZE, &mut page, 0).expect("past end of file");
    assert!(page.iter().all(|&b| b == 0));
    assert_eq!(vm.copy_out(id, BASE, b"ro", 0), Err(VmError::BadAddress(BASE)));
}

#[test]
fn adjacent_mappings_unmap_independently() {
    let mut vm = manager(4, 2);
    let id = vm.create();
    let file = MemFile::new(&contents(2 * PAGE_SIZE));
    vm.create_mapping(id, BASE, 2 * PAGE_SIZE, true, &file, 0).expect("first");
    vm.create_mapping(id, BASE + 2 * PAGE_SIZE, PAGE_SIZE, true, &file, 0).expect("second");
    assert_eq!(file.open_handles(), 3);

    vm.remove_mapping(id, BASE).expect("unmap first");
    assert_eq!(file.open_handles(), 2);
    assert_eq!(vm.page_type(id, BASE + 2 * PAGE_SIZE), Some(VmType::File));
    assert_eq!(vm.page_type(id, BASE + PAGE_SIZE), None);

    vm.remove_mapping(id, BASE + 2 * PAGE_SIZE).expect("unmap second");
    assert_eq!(file.open_handles(), 1);
}

#[test]
fn destroy_flushes_and_closes_mappings() {
    let mut vm = manager(4, 2);
    let id = vm.create();
    let file = MemFile::new(&contents(PAGE_SIZE));
    vm.create_mapping(id, BASE, PAGE_SIZE, true, &file, 0).expect("mmap");
    vm.copy_out(id, BASE + 10, b"exit", 0).expect("write");

    vm.destroy(id).expect("destroy");
    assert_eq!(&file.contents()[10..14], b"exit");
    assert_eq!(file.open_handles(), 1);
    assert_eq!(vm.pool().in_use(), 0);
}

#[test]
fn unmap_requires_a_file_page() {
    let mut vm = manager(2, 2);
    let id = vm.create();
    vm.alloc_page(id, heap(0), true).expect("anon");
    assert_eq!(vm.remove_mapping(id, heap(0)), Err(VmError::InvalidArgs));
    assert_eq!(vm.remove_mapping(id, BASE), Err(VmError::NotMapped(BASE)));
}
