// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory-mapped files: mapping table and map/unmap
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + tests/mmap.rs
//!
//! PUBLIC API: VmManager::{create_mapping, remove_mapping}, MappingTable, MappingId
//! DEPENDS_ON: hal::File, page::{FilePage, Uninit}
//! INVARIANTS:
//!   - each mapping owns one duplicated file handle shared by all of its pages
//!   - the handle is closed exactly once, when the mapping's last page is released
//!   - a rejected mapping leaves no page behind

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::config::PAGE_SIZE;
use crate::error::VmError;
use crate::hal::{File, FramePool, PageMapper};
use crate::is_page_aligned;
use crate::page::{FilePage, Page, PageKind, Target, Uninit};
use crate::space::{SpaceId, VmManager};

/// Identifies one mapping inside its address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingId(u32);

impl MappingId {
    pub fn to_raw(self) -> u32 {
        self.0
    }
}

struct Mapping {
    file: Box<dyn File>,
    refs: usize,
}

/// File handles of the live mappings of one address space, reference counted by page.
#[derive(Default)]
pub struct MappingTable {
    entries: BTreeMap<MappingId, Mapping>,
    next: u32,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `file` with `refs` initial references.
    pub(crate) fn insert(&mut self, file: Box<dyn File>, refs: usize) -> MappingId {
        let id = MappingId(self.next);
        self.next = self.next.wrapping_add(1);
        self.entries.insert(id, Mapping { file, refs });
        id
    }

    /// Borrows the handle backing `id`.
    pub(crate) fn file(&self, id: MappingId) -> Result<&dyn File, VmError> {
        self.entries.get(&id).map(|mapping| mapping.file.as_ref()).ok_or(VmError::InvalidHandle)
    }

    pub(crate) fn retain(&mut self, id: MappingId) {
        if let Some(mapping) = self.entries.get_mut(&id) {
            mapping.refs += 1;
        }
    }

    /// Drops one reference; the last one closes the handle.
    pub(crate) fn release(&mut self, id: MappingId) {
        let Some(mapping) = self.entries.get_mut(&id) else {
            return;
        };
        mapping.refs = mapping.refs.saturating_sub(1);
        if mapping.refs > 0 {
            return;
        }
        if let Some(mapping) = self.entries.remove(&id) {
            mapping.file.close();
            log_debug!(target: "mmap", "mapping {} closed", id.0);
        }
    }

    /// Returns true while `id` still owns an open handle.
    pub fn contains(&self, id: MappingId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Pages (plus transient holders) still referencing `id`.
    pub fn refs(&self, id: MappingId) -> usize {
        self.entries.get(&id).map_or(0, |mapping| mapping.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: FramePool, M: PageMapper + Default> VmManager<P, M> {
    /// Maps `length` bytes of `file` starting at `offset` lazily at `addr`.
    ///
    /// Returns `addr`. The tail of the last page past end of file reads as zeros.
    pub fn create_mapping(
        &mut self,
        id: SpaceId,
        addr: usize,
        length: usize,
        writable: bool,
        file: &dyn File,
        offset: u64,
    ) -> Result<usize, VmError> {
        if addr == 0 || !is_page_aligned(addr) || length == 0 || offset % PAGE_SIZE as u64 != 0 {
            return Err(VmError::InvalidArgs);
        }
        let span = length.checked_add(PAGE_SIZE - 1).ok_or(VmError::InvalidArgs)? & !(PAGE_SIZE - 1);
        if !self.config.is_user_range(addr, span) {
            return Err(VmError::InvalidArgs);
        }
        let file_len = file.len();
        if file_len == 0 || offset >= file_len {
            return Err(VmError::InvalidArgs);
        }

        let space = self.space_mut(id)?;
        if space.spt.overlaps(addr, addr + span) {
            log_warn!(target: "mmap", "mmap: [{:#x}, {:#x}) overlaps existing pages", addr, addr + span);
            return Err(VmError::MappingConflict(addr));
        }
        let handle = file.duplicate()?;
        // The extra reference keeps the handle open while pages are inserted.
        let mapping = space.mappings.insert(handle, 1);
        let mut remaining = usize::try_from(file_len - offset).unwrap_or(usize::MAX).min(length);
        let pages = span / PAGE_SIZE;
        let mut inserted = 0;
        let mut failure = None;
        for index in 0..pages {
            let read_bytes = remaining.min(PAGE_SIZE);
            remaining -= read_bytes;
            let target = Target::File(FilePage {
                mapping,
                offset: offset + (index * PAGE_SIZE) as u64,
                read_bytes,
                dirty: false,
            });
            let page = Page::new(addr + index * PAGE_SIZE, writable, PageKind::Uninit(Uninit::new(target, None)));
            match space.spt.insert(page) {
                Ok(_) => {
                    space.mappings.retain(mapping);
                    inserted += 1;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if failure.is_some() {
            for index in 0..inserted {
                if let Some(page) = space.spt.lookup(addr + index * PAGE_SIZE) {
                    space.spt.take(page);
                    space.mappings.release(mapping);
                }
            }
        }
        space.mappings.release(mapping);

        if let Some(err) = failure {
            log_warn!(target: "mmap", "mmap: {:#x} rolled back: {}", addr, err);
            return Err(err);
        }
        log_debug!(
            target: "mmap",
            "mmap: space {} {:#x} +{:#x} offset {:#x} ({} pages)",
            id.to_raw(),
            addr,
            length,
            offset,
            pages
        );
        Ok(addr)
    }

    /// Unmaps the mapping whose page sits at `addr`, writing dirty pages back.
    ///
    /// Walks forward from `addr` while pages belong to the same mapping.
    pub fn remove_mapping(&mut self, id: SpaceId, addr: usize) -> Result<(), VmError> {
        let space = self.space(id)?;
        let mapping = space.page_at(addr).ok_or(VmError::NotMapped(addr))?.mapping().ok_or(VmError::InvalidArgs)?;
        let mut pages = Vec::new();
        let mut va = addr;
        while let Some(page) = space.spt.lookup(va) {
            if space.spt.get(page).and_then(Page::mapping) != Some(mapping) {
                break;
            }
            pages.push(page);
            match va.checked_add(PAGE_SIZE) {
                Some(next) => va = next,
                None => break,
            }
        }

        let mut first_err = None;
        for page in pages.iter().copied() {
            if let Err(err) = self.release_page(id, page) {
                log_warn!(target: "mmap", "munmap: {:#x} page release failed: {}", addr, err);
                first_err.get_or_insert(err);
            }
        }
        log_debug!(target: "mmap", "munmap: space {} {:#x} ({} pages)", id.to_raw(), addr, pages.len());
        first_err.map_or(Ok(()), Err)
    }
}
