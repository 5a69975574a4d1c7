// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-space lifecycle, frame claiming and eviction
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + tests/{eviction,fault,fork,mmap}.rs
//!
//! PUBLIC API:
//!   - VmManager::{new, create, destroy, alloc_page, claim_page, remove_page, verify}
//!   - SpaceId: non-zero address-space handle
//!
//! DEPENDS_ON: frame::FrameTable, spt::SupplementalPageTable, swap::SwapSpace, hal traits
//! INVARIANTS:
//!   - pages live in per-space arenas, frames in one global arena; links are indices
//!   - every resident page has exactly one frame whose owner is that page
//!   - `&mut VmManager` is the frame-pool-wide lock; callers sharing the manager
//!     wrap it in one `spin::Mutex`

extern crate alloc;

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroU32;

use crate::config::{ConfigError, VmConfig, PAGE_SIZE};
use crate::error::VmError;
use crate::frame::{FrameTable, Owner};
use crate::hal::page_table::MapError;
use crate::hal::{FrameAddr, FramePool, PageMapper};
use crate::is_page_aligned;
use crate::mmap::MappingTable;
use crate::page::{AnonPage, Backing, Initializer, Page, PageKind, Target, Uninit, VmType};
use crate::spt::{PageId, SupplementalPageTable};
use crate::swap::SwapSpace;

/// Handle referencing a tracked address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(NonZeroU32);

impl SpaceId {
    /// Creates a handle from the backing table index.
    pub(crate) fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    /// Returns the table index backing this handle.
    pub(crate) fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Constructs a handle from a raw value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Returns the raw representation of the handle.
    pub fn to_raw(self) -> u32 {
        self.0.get()
    }
}

/// Per-process virtual memory state.
pub struct AddressSpace<M> {
    pub(crate) spt: SupplementalPageTable,
    pub(crate) mmu: M,
    pub(crate) mappings: MappingTable,
}

impl<M: PageMapper> AddressSpace<M> {
    fn new(mmu: M) -> Self {
        Self { spt: SupplementalPageTable::new(), mmu, mappings: MappingTable::new() }
    }

    /// Borrows the supplemental page table.
    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    /// Borrows the translation table.
    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    /// Borrows the table of live file mappings.
    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    /// Page descriptor starting at `va`.
    pub fn page_at(&self, va: usize) -> Option<&Page> {
        self.spt.lookup(va).and_then(|id| self.spt.get(id))
    }
}

/// How a freshly claimed frame gets its content.
#[derive(Clone, Copy)]
pub(crate) enum Fill {
    /// Run the page variant's materialize step.
    Materialize,
    /// Byte-copy an existing frame.
    Copy(FrameAddr),
}

/// Owns every address space, the resident-frame arena and the frame pool.
pub struct VmManager<P, M> {
    pub(crate) spaces: Vec<Option<AddressSpace<M>>>,
    pub(crate) frames: FrameTable,
    pub(crate) pool: P,
    pub(crate) swap: Arc<SwapSpace>,
    pub(crate) config: VmConfig,
}

pub(crate) fn space_slot<M>(
    spaces: &mut [Option<AddressSpace<M>>],
    id: SpaceId,
) -> Result<&mut AddressSpace<M>, VmError> {
    spaces.get_mut(id.index()).and_then(|slot| slot.as_mut()).ok_or(VmError::InvalidHandle)
}

impl<P: FramePool, M: PageMapper + Default> VmManager<P, M> {
    /// Creates a manager over `pool`, sharing the boot-time `swap`.
    pub fn new(pool: P, swap: Arc<SwapSpace>, config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { spaces: Vec::new(), frames: FrameTable::new(), pool, swap, config })
    }

    /// Initializes a fresh, empty address space.
    pub fn create(&mut self) -> SpaceId {
        let space = AddressSpace::new(M::default());
        for (index, slot) in self.spaces.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(space);
                return SpaceId::from_index(index);
            }
        }
        self.spaces.push(Some(space));
        SpaceId::from_index(self.spaces.len() - 1)
    }

    /// Tears down `id`: writes back dirty file pages, frees frames and swap
    /// slots and closes mapping handles.
    ///
    /// Teardown always completes; the first failure is reported.
    pub fn destroy(&mut self, id: SpaceId) -> Result<(), VmError> {
        let pages = self.space(id)?.spt.ids();
        let mut first_err = None;
        for page in pages {
            if let Err(err) = self.release_page(id, page) {
                log_warn!(target: "vm", "destroy: space {} page release failed: {}", id.to_raw(), err);
                first_err.get_or_insert(err);
            }
        }
        self.spaces[id.index()] = None;
        log_debug!(target: "vm", "destroy: space {} gone", id.to_raw());
        first_err.map_or(Ok(()), Err)
    }

    /// Returns the address space identified by `id`.
    pub fn space(&self, id: SpaceId) -> Result<&AddressSpace<M>, VmError> {
        self.spaces.get(id.index()).and_then(|slot| slot.as_ref()).ok_or(VmError::InvalidHandle)
    }

    pub(crate) fn space_mut(&mut self, id: SpaceId) -> Result<&mut AddressSpace<M>, VmError> {
        space_slot(&mut self.spaces, id)
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    /// Number of frames currently backing a page.
    pub fn resident_frames(&self) -> usize {
        self.frames.resident()
    }

    /// Backing type of the page at `va`, or the type it will have once claimed.
    pub fn page_type(&self, id: SpaceId, va: usize) -> Option<VmType> {
        self.space(id).ok()?.page_at(va).map(Page::vm_type)
    }

    /// Bytes of the frame currently mapped at the page-aligned `va`.
    pub fn resident_bytes(&self, id: SpaceId, va: usize) -> Option<&[u8]> {
        let frame = self.space(id).ok()?.mmu.get_mapping(va)?;
        Some(self.pool.frame(frame))
    }

    /// Registers a lazily zero-filled anonymous page at `va`.
    pub fn alloc_page(&mut self, id: SpaceId, va: usize, writable: bool) -> Result<PageId, VmError> {
        self.insert_page(id, Page::new_checked(va, writable, PageKind::Uninit(Uninit::new(Target::Anon, None)))?)
    }

    /// Registers an anonymous page whose first claim runs `init` on the zeroed frame.
    pub fn alloc_page_with_initializer(
        &mut self,
        id: SpaceId,
        va: usize,
        writable: bool,
        init: Initializer,
    ) -> Result<PageId, VmError> {
        let kind = PageKind::Uninit(Uninit::new(Target::Anon, Some(init)));
        self.insert_page(id, Page::new_checked(va, writable, kind)?)
    }

    pub(crate) fn insert_page(&mut self, id: SpaceId, page: Page) -> Result<PageId, VmError> {
        if !self.config.is_user_range(page.va(), PAGE_SIZE) {
            return Err(VmError::InvalidArgs);
        }
        self.space_mut(id)?.spt.insert(page)
    }

    /// Claims the page registered at `va`.
    pub fn claim_page(&mut self, id: SpaceId, va: usize) -> Result<(), VmError> {
        let page = self.space(id)?.spt.lookup(va).ok_or(VmError::NotMapped(va))?;
        self.claim(id, page)
    }

    /// Drops the page at `va`, releasing its backing first.
    pub fn remove_page(&mut self, id: SpaceId, va: usize) -> Result<(), VmError> {
        let page = self.space(id)?.spt.lookup(va).ok_or(VmError::NotMapped(va))?;
        self.release_page(id, page)
    }

    /// Makes `page` resident: frame, translation, then content.
    pub(crate) fn claim(&mut self, id: SpaceId, page: PageId) -> Result<(), VmError> {
        let resident = self.space(id)?.spt.get(page).ok_or(VmError::InvalidArgs)?.is_resident();
        if resident {
            return Ok(());
        }
        let frame = self.get_frame()?;
        self.install(id, page, frame, Fill::Materialize)
    }

    /// Allocates a frame from the pool, evicting one victim under pressure.
    pub(crate) fn get_frame(&mut self) -> Result<FrameAddr, VmError> {
        if let Some(frame) = self.pool.alloc_frame() {
            return Ok(frame);
        }
        self.evict_one()?;
        self.pool.alloc_frame().ok_or_else(|| {
            log_error!(target: "frame", "get_frame: pool still empty after eviction");
            VmError::OutOfFrames
        })
    }

    /// Links `frame` to `page`, installs the translation and fills the content.
    ///
    /// On failure the frame goes back to the pool and the page stays non-resident.
    pub(crate) fn install(&mut self, id: SpaceId, page: PageId, frame: FrameAddr, fill: Fill) -> Result<(), VmError> {
        let Self { spaces, frames, pool, swap, .. } = self;
        let space = match space_slot(spaces, id) {
            Ok(space) => space,
            Err(err) => {
                pool.free_frame(frame);
                return Err(err);
            }
        };
        let AddressSpace { spt, mmu, mappings } = space;
        let Some(desc) = spt.get_mut(page) else {
            pool.free_frame(frame);
            return Err(VmError::InvalidArgs);
        };
        let va = desc.va();
        let frame_id = match frames.insert(frame, Owner { space: id, page }) {
            Ok(frame_id) => frame_id,
            Err(err) => {
                pool.free_frame(frame);
                return Err(err);
            }
        };
        desc.set_frame(Some(frame_id));

        if let Err(err) = mmu.set_mapping(va, frame, desc.writable()) {
            desc.set_frame(None);
            frames.remove(frame_id);
            pool.free_frame(frame);
            return Err(match err {
                MapError::Overlap => VmError::MappingConflict(va),
                other => other.into(),
            });
        }

        let filled = match fill {
            Fill::Materialize => {
                desc.materialize(pool.frame_mut(frame), &mut Backing { swap: &**swap, mappings })
            }
            Fill::Copy(src) => {
                pool.copy_frame(src, frame);
                Ok(())
            }
        };
        if let Err(err) = filled {
            log_warn!(target: "vm", "claim: {:#x} failed to populate: {}", va, err);
            mmu.clear_mapping(va);
            desc.set_frame(None);
            frames.remove(frame_id);
            pool.free_frame(frame);
            return Err(err);
        }
        mmu.clear_dirty(va);
        Ok(())
    }

    /// Evicts one resident page chosen by the clock policy.
    pub(crate) fn evict_one(&mut self) -> Result<(), VmError> {
        let Self { spaces, frames, pool, swap, .. } = self;
        let victim = frames.select_victim(|frame| {
            let Ok(space) = space_slot(spaces, frame.owner.space) else {
                return false;
            };
            let Some(va) = space.spt.get(frame.owner.page).map(Page::va) else {
                return false;
            };
            if space.mmu.is_accessed(va) {
                space.mmu.clear_accessed(va);
                return true;
            }
            false
        });
        let Some(victim) = victim else {
            log_error!(target: "frame", "evict: no victim among {} resident frames", frames.resident());
            return Err(VmError::OutOfFrames);
        };
        let frame = *frames.get(victim).ok_or(VmError::OutOfFrames)?;
        let AddressSpace { spt, mmu, mappings } = space_slot(spaces, frame.owner.space)?;
        let page = spt.get_mut(frame.owner.page).ok_or(VmError::InvalidArgs)?;
        let va = page.va();

        page.evict(pool.frame(frame.addr), mmu.is_dirty(va), &mut Backing { swap: &**swap, mappings })?;
        mmu.clear_mapping(va);
        page.set_frame(None);
        frames.remove(victim);
        pool.free_frame(frame.addr);
        log_debug!(
            target: "frame",
            "evict: {:#x} of space {} released frame {:#x}",
            va,
            frame.owner.space.to_raw(),
            frame.addr
        );
        Ok(())
    }

    /// Detaches `page` from its table and releases everything it holds.
    pub(crate) fn release_page(&mut self, id: SpaceId, page: PageId) -> Result<(), VmError> {
        let Self { spaces, frames, pool, swap, .. } = self;
        let AddressSpace { spt, mmu, mappings } = space_slot(spaces, id)?;
        let mut desc = spt.take(page).ok_or(VmError::InvalidArgs)?;
        let va = desc.va();
        let mut backing = Backing { swap: &**swap, mappings };
        let result = match desc.frame().and_then(|frame| frames.remove(frame)) {
            Some(frame) => {
                let result = desc.release(Some(pool.frame(frame.addr)), mmu.is_dirty(va), &mut backing);
                mmu.clear_mapping(va);
                pool.free_frame(frame.addr);
                result
            }
            None => desc.release(None, false, &mut backing),
        };
        desc.set_frame(None);
        result
    }

    /// Checks the frame/page bijection and the residency invariants.
    pub fn verify(&self) -> Result<(), &'static str> {
        for (frame_id, frame) in self.frames.iter() {
            let space = self.space(frame.owner.space).map_err(|_| "frame owned by a dead address space")?;
            let page = space.spt.get(frame.owner.page).ok_or("frame owned by a missing page")?;
            if page.frame() != Some(frame_id) {
                return Err("frame back-reference does not match its page");
            }
        }
        let mut seen = BTreeSet::new();
        for (index, slot) in self.spaces.iter().enumerate() {
            let Some(space) = slot else {
                continue;
            };
            let owner_space = SpaceId::from_index(index);
            for (page_id, page) in space.spt.iter() {
                let mapped = space.mmu.get_mapping(page.va());
                let Some(frame_id) = page.frame() else {
                    if mapped.is_some() {
                        return Err("non-resident page still has a translation");
                    }
                    if let Some(slot) = page.swap_slot() {
                        if !self.swap.is_used(slot) {
                            return Err("swapped page points at a free slot");
                        }
                    }
                    continue;
                };
                let frame = self.frames.get(frame_id).ok_or("page references a free frame")?;
                if frame.owner != (Owner { space: owner_space, page: page_id }) {
                    return Err("page and frame disagree on ownership");
                }
                if !seen.insert(frame.addr) {
                    return Err("two pages share one frame");
                }
                if page.swap_slot().is_some() {
                    return Err("resident page still holds a swap slot");
                }
                if page.is_uninit() {
                    return Err("pending page is resident");
                }
                if mapped != Some(frame.addr) {
                    return Err("resident page translation missing");
                }
            }
        }
        Ok(())
    }
}

impl Page {
    /// Creates a page after checking the address is page aligned.
    pub(crate) fn new_checked(va: usize, writable: bool, kind: PageKind) -> Result<Self, VmError> {
        if !is_page_aligned(va) {
            return Err(VmError::InvalidArgs);
        }
        Ok(Page::new(va, writable, kind))
    }

    /// Fresh, non-resident anonymous page.
    pub(crate) fn anon(va: usize, writable: bool) -> Self {
        Page::new(va, writable, PageKind::Anon(AnonPage::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SECTORS_PER_SLOT;
    use crate::hal::page_table::SoftPageTable;
    use crate::hal::ram::{HeapFramePool, RamDisk};
    use alloc::boxed::Box;

    fn manager(frames: usize, slots: usize) -> VmManager<HeapFramePool, SoftPageTable> {
        let swap = Arc::new(SwapSpace::new(Box::new(RamDisk::new(slots * SECTORS_PER_SLOT))));
        VmManager::new(HeapFramePool::new(frames), swap, VmConfig::new()).expect("config")
    }

    #[test]
    fn handles_are_reused_after_destroy() {
        let mut vm = manager(4, 4);
        let a = vm.create();
        let b = vm.create();
        assert_ne!(a, b);
        vm.destroy(a).expect("destroy");
        assert_eq!(vm.space(a).err(), Some(VmError::InvalidHandle));
        assert_eq!(vm.create(), a);
        assert_eq!(SpaceId::from_raw(a.to_raw()), Some(a));
        assert_eq!(SpaceId::from_raw(0), None);
    }

    #[test]
    fn claim_links_frame_and_installs_translation() {
        let mut vm = manager(4, 4);
        let id = vm.create();
        vm.alloc_page(id, 0x40_0000, true).expect("alloc");
        assert_eq!(vm.page_type(id, 0x40_0000), Some(VmType::Anon));
        vm.claim_page(id, 0x40_0000).expect("claim");
        let page = vm.space(id).unwrap().page_at(0x40_0000).expect("page");
        assert!(page.is_resident() && !page.is_uninit());
        assert!(vm.resident_bytes(id, 0x40_0000).unwrap().iter().all(|&b| b == 0));
        assert_eq!(vm.resident_frames(), 1);
        vm.verify().expect("invariants");
    }

    #[test]
    fn claim_fails_and_unlinks_when_translation_exists() {
        let mut vm = manager(4, 4);
        let id = vm.create();
        vm.alloc_page(id, 0x40_0000, true).expect("alloc");
        vm.space_mut(id).unwrap().mmu.set_mapping(0x40_0000, 0x1000, true).expect("stray mapping");
        assert_eq!(vm.claim_page(id, 0x40_0000), Err(VmError::MappingConflict(0x40_0000)));
        assert!(!vm.space(id).unwrap().page_at(0x40_0000).unwrap().is_resident());
        assert_eq!(vm.pool().in_use(), 0);
    }

    #[test]
    fn alloc_rejects_kernel_and_unaligned_addresses() {
        let mut vm = manager(1, 1);
        let id = vm.create();
        let kernel = vm.config().kernel_base;
        assert_eq!(vm.alloc_page(id, kernel, true), Err(VmError::InvalidArgs));
        assert_eq!(vm.alloc_page(id, 0x1001, true), Err(VmError::InvalidArgs));
        vm.alloc_page(id, 0x1000, true).expect("alloc");
        assert_eq!(vm.alloc_page(id, 0x1000, true), Err(VmError::MappingConflict(0x1000)));
    }

    #[test]
    fn remove_page_returns_frame_and_slot() {
        let mut vm = manager(1, 2);
        let id = vm.create();
        vm.alloc_page(id, 0x1000, true).expect("a");
        vm.alloc_page(id, 0x2000, true).expect("b");
        vm.claim_page(id, 0x1000).expect("claim a");
        vm.claim_page(id, 0x2000).expect("claim b evicts a");
        assert_eq!(vm.swap().used_slots(), 1);
        vm.remove_page(id, 0x1000).expect("remove swapped");
        assert_eq!(vm.swap().used_slots(), 0);
        vm.remove_page(id, 0x2000).expect("remove resident");
        assert_eq!(vm.pool().in_use(), 0);
        assert_eq!(vm.remove_page(id, 0x2000), Err(VmError::NotMapped(0x2000)));
        vm.verify().expect("invariants");
    }
}
