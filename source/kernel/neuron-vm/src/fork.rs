// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-space duplication for fork (eager copy)
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/fork.rs
//!
//! INVARIANTS:
//!   - every copied page gets its own frame; no frame is shared across spaces
//!   - each source mapping gets one duplicated handle in the child
//!   - the source frame is pinned while it is being copied
//!   - a failed duplication is not rolled back; the caller destroys the child

extern crate alloc;

use alloc::collections::BTreeMap;

use crate::error::VmError;
use crate::hal::{FramePool, PageMapper};
use crate::mmap::MappingId;
use crate::page::{AnonPage, FilePage, Page, PageKind, Target, Uninit};
use crate::space::{Fill, SpaceId, VmManager};
use crate::spt::PageId;

/// Source mapping -> child mapping.
type HandleMap = BTreeMap<MappingId, MappingId>;

impl<P: FramePool, M: PageMapper + Default> VmManager<P, M> {
    /// Copies every page of `src` into the empty space `dst`.
    pub fn duplicate(&mut self, src: SpaceId, dst: SpaceId) -> Result<(), VmError> {
        if src == dst {
            return Err(VmError::InvalidArgs);
        }
        if !self.space(dst)?.spt.is_empty() {
            return Err(VmError::InvalidArgs);
        }
        let pages = self.space(src)?.spt.ids();
        let mut handles = HandleMap::new();
        let mut result = Ok(());
        for page in pages {
            result = self.duplicate_page(src, dst, page, &mut handles);
            if result.is_err() {
                break;
            }
        }
        // Drop the references `child_mapping` took while pages were copied.
        if let Ok(child) = self.space_mut(dst) {
            for mapping in handles.values() {
                child.mappings.release(*mapping);
            }
        }
        match result {
            Ok(()) => {
                log_debug!(target: "fork", "fork: space {} -> {}", src.to_raw(), dst.to_raw());
                Ok(())
            }
            Err(err) => {
                log_warn!(target: "fork", "fork: space {} -> {} failed: {}", src.to_raw(), dst.to_raw(), err);
                Err(err)
            }
        }
    }

    fn duplicate_page(&mut self, src: SpaceId, dst: SpaceId, page: PageId, handles: &mut HandleMap) -> Result<(), VmError> {
        let (va, writable, pending) = {
            let desc = self.space(src)?.spt.get(page).ok_or(VmError::InvalidArgs)?;
            let pending = match desc.kind() {
                PageKind::Uninit(uninit) if !uninit.has_initializer() && uninit.failure().is_none() => {
                    Some(uninit.target)
                }
                _ => None,
            };
            (desc.va(), desc.writable(), pending)
        };

        if let Some(target) = pending {
            let target = match target {
                Target::Anon => Target::Anon,
                Target::File(file) => {
                    Target::File(FilePage { mapping: self.child_mapping(src, dst, file.mapping, handles)?, ..file })
                }
            };
            self.insert_child(dst, Page::new(va, writable, PageKind::Uninit(Uninit::new(target, None))))?;
            return Ok(());
        }

        // Materializes pending pages with an initializer and brings evicted pages back.
        self.claim(src, page)?;
        let (frame_id, source_file) = {
            let desc = self.space(src)?.spt.get(page).ok_or(VmError::InvalidArgs)?;
            let source_file = match desc.kind() {
                PageKind::Anon(_) => None,
                PageKind::File(file) => Some(*file),
                PageKind::Uninit(_) => return Err(VmError::InvalidArgs),
            };
            (desc.frame().ok_or(VmError::InvalidArgs)?, source_file)
        };
        let source_frame = self.frames.get(frame_id).ok_or(VmError::InvalidArgs)?.addr;
        let kind = match source_file {
            None => PageKind::Anon(AnonPage::default()),
            Some(file) => {
                let dirty = file.dirty || self.space(src)?.mmu.is_dirty(va);
                let mapping = self.child_mapping(src, dst, file.mapping, handles)?;
                PageKind::File(FilePage { mapping, dirty, ..file })
            }
        };
        let child = self.insert_child(dst, Page::new(va, writable, kind))?;

        self.frames.pin(frame_id);
        let copied = match self.get_frame() {
            Ok(frame) => self.install(dst, child, frame, Fill::Copy(source_frame)),
            Err(err) => Err(err),
        };
        self.frames.unpin(frame_id);
        copied
    }

    /// Inserts `page` into `dst`, taking a mapping reference for file-backed pages.
    fn insert_child(&mut self, dst: SpaceId, page: Page) -> Result<PageId, VmError> {
        let mapping = page.mapping();
        let space = self.space_mut(dst)?;
        let id = space.spt.insert(page)?;
        if let Some(mapping) = mapping {
            space.mappings.retain(mapping);
        }
        Ok(id)
    }

    /// Child mapping for `mapping`, duplicating the source handle on first use.
    fn child_mapping(
        &mut self,
        src: SpaceId,
        dst: SpaceId,
        mapping: MappingId,
        handles: &mut HandleMap,
    ) -> Result<MappingId, VmError> {
        if let Some(child) = handles.get(&mapping) {
            return Ok(*child);
        }
        let handle = self.space(src)?.mappings.file(mapping)?.duplicate()?;
        let child = self.space_mut(dst)?.mappings.insert(handle, 1);
        handles.insert(mapping, child);
        Ok(child)
    }
}
