// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Virtual page descriptors and per-variant backing behaviour
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Page, PageKind, VmType, Initializer
//! DEPENDS_ON: swap::SwapSpace, mmap::MappingTable
//! INVARIANTS:
//!   - an Anonymous page never holds a swap slot while it owns a frame
//!   - an Uninitialized page is never resident; first claim turns it concrete
//!   - translation install/removal and frame ownership live in `space`;
//!     the operations here only move page content

extern crate alloc;

use alloc::boxed::Box;

use crate::config::PAGE_SIZE;
use crate::error::VmError;
use crate::frame::FrameId;
use crate::mmap::{MappingId, MappingTable};
use crate::swap::{SwapSlot, SwapSpace};

/// One-shot content initializer run against the freshly allocated frame.
///
/// The closure owns its context and releases it when it returns (or when the
/// page is discarded before its first claim).
pub type Initializer = Box<dyn FnOnce(&mut [u8]) -> Result<(), VmError> + Send>;

/// Backing type a page has, or will have once claimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmType {
    /// Zero-filled memory backed by swap.
    Anon,
    /// Memory backed by a mapped file.
    File,
}

/// Swap-backed page payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnonPage {
    /// Slot holding the content while the page is not resident.
    pub slot: Option<SwapSlot>,
}

/// File-backed page payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilePage {
    /// Mapping whose file handle backs this page.
    pub mapping: MappingId,
    /// Byte offset of the page within the file.
    pub offset: u64,
    /// Bytes read from the file on load; the rest of the page is zero-filled.
    pub read_bytes: usize,
    /// Sticky dirty flag; merged with the hardware bit on writeback.
    pub dirty: bool,
}

/// Concrete variant an Uninitialized page turns into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Anon,
    File(FilePage),
}

/// Pending page payload.
pub struct Uninit {
    /// Variant installed on first claim.
    pub target: Target,
    init: Option<Initializer>,
    failed: Option<VmError>,
}

impl Uninit {
    /// Creates a pending payload with an optional custom initializer.
    pub fn new(target: Target, init: Option<Initializer>) -> Self {
        Self { target, init, failed: None }
    }

    /// Returns true when a one-shot initializer is still attached.
    pub fn has_initializer(&self) -> bool {
        self.init.is_some()
    }

    /// Error left behind by an initializer that ran and failed.
    ///
    /// The content source is gone, so every later claim reports it again.
    pub fn failure(&self) -> Option<VmError> {
        self.failed
    }
}

/// Backing variant of a page.
pub enum PageKind {
    Uninit(Uninit),
    Anon(AnonPage),
    File(FilePage),
}

/// Virtual page descriptor.
pub struct Page {
    va: usize,
    writable: bool,
    kind: PageKind,
    frame: Option<FrameId>,
}

/// Shared backing stores a page variant may need.
pub(crate) struct Backing<'a> {
    pub swap: &'a SwapSpace,
    pub mappings: &'a mut MappingTable,
}

impl Page {
    /// Creates a non-resident page at the page-aligned `va`.
    pub fn new(va: usize, writable: bool, kind: PageKind) -> Self {
        debug_assert_eq!(va % PAGE_SIZE, 0);
        Self { va, writable, kind, frame: None }
    }

    pub fn va(&self) -> usize {
        self.va
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut PageKind {
        &mut self.kind
    }

    /// Frame currently holding the page, if resident.
    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: Option<FrameId>) {
        self.frame = frame;
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_uninit(&self) -> bool {
        matches!(self.kind, PageKind::Uninit(_))
    }

    /// Backing type the page has, or will have after its first claim.
    pub fn vm_type(&self) -> VmType {
        match &self.kind {
            PageKind::Uninit(uninit) => match uninit.target {
                Target::Anon => VmType::Anon,
                Target::File(_) => VmType::File,
            },
            PageKind::Anon(_) => VmType::Anon,
            PageKind::File(_) => VmType::File,
        }
    }

    /// Mapping this page belongs to, including pending file-backed pages.
    pub fn mapping(&self) -> Option<MappingId> {
        match &self.kind {
            PageKind::File(file) => Some(file.mapping),
            PageKind::Uninit(Uninit { target: Target::File(file), .. }) => Some(file.mapping),
            _ => None,
        }
    }

    /// Swap slot held by the page, if any.
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        match &self.kind {
            PageKind::Anon(anon) => anon.slot,
            _ => None,
        }
    }

    /// Populates `frame` with the page content.
    pub(crate) fn materialize(&mut self, frame: &mut [u8], backing: &mut Backing<'_>) -> Result<(), VmError> {
        match &mut self.kind {
            PageKind::Uninit(uninit) => {
                if let Some(err) = uninit.failed {
                    return Err(err);
                }
                let target = uninit.target;
                match target {
                    Target::Anon => frame.fill(0),
                    Target::File(file) => read_file_page(&file, frame, backing)?,
                }
                if let Some(init) = uninit.init.take() {
                    if let Err(err) = init(frame) {
                        uninit.failed = Some(err);
                        return Err(err);
                    }
                }
                self.kind = match target {
                    Target::Anon => PageKind::Anon(AnonPage::default()),
                    Target::File(file) => PageKind::File(FilePage { dirty: false, ..file }),
                };
                Ok(())
            }
            PageKind::Anon(anon) => {
                match anon.slot {
                    Some(slot) => {
                        backing.swap.swap_in(slot, frame)?;
                        anon.slot = None;
                    }
                    None => frame.fill(0),
                }
                Ok(())
            }
            PageKind::File(file) => {
                read_file_page(file, frame, backing)?;
                file.dirty = false;
                Ok(())
            }
        }
    }

    /// Moves the content of `frame` to the page's backing store.
    ///
    /// `hw_dirty` is the translation's dirty bit at the time of eviction.
    pub(crate) fn evict(&mut self, frame: &[u8], hw_dirty: bool, backing: &mut Backing<'_>) -> Result<(), VmError> {
        match &mut self.kind {
            PageKind::Anon(anon) => {
                debug_assert!(anon.slot.is_none());
                anon.slot = Some(backing.swap.swap_out(frame)?);
                Ok(())
            }
            PageKind::File(file) => {
                if file.dirty || hw_dirty {
                    write_back(file, frame, backing)?;
                    file.dirty = false;
                }
                Ok(())
            }
            PageKind::Uninit(_) => {
                debug_assert!(false, "pending page {:#x} cannot be resident", self.va);
                Ok(())
            }
        }
    }

    /// Releases every backing resource held by the page.
    ///
    /// Dirty file content is written back first; the mapping's file handle is
    /// closed when its last page goes.
    pub(crate) fn release(&mut self, frame: Option<&[u8]>, hw_dirty: bool, backing: &mut Backing<'_>) -> Result<(), VmError> {
        match &mut self.kind {
            PageKind::Anon(anon) => {
                if let Some(slot) = anon.slot.take() {
                    backing.swap.release(slot);
                }
                Ok(())
            }
            PageKind::File(file) => {
                let mut result = Ok(());
                if let Some(frame) = frame {
                    if file.dirty || hw_dirty {
                        result = write_back(file, frame, backing);
                        file.dirty = false;
                    }
                }
                backing.mappings.release(file.mapping);
                result
            }
            PageKind::Uninit(uninit) => {
                // Dropping the initializer releases its context.
                uninit.init = None;
                if let Target::File(file) = uninit.target {
                    backing.mappings.release(file.mapping);
                }
                Ok(())
            }
        }
    }
}

fn read_file_page(page: &FilePage, frame: &mut [u8], backing: &mut Backing<'_>) -> Result<(), VmError> {
    let file = backing.mappings.file(page.mapping)?;
    let len = page.read_bytes.min(PAGE_SIZE);
    let read = file.read_at(&mut frame[..len], page.offset)?;
    frame[read..].fill(0);
    Ok(())
}

fn write_back(page: &FilePage, frame: &[u8], backing: &mut Backing<'_>) -> Result<(), VmError> {
    let file = backing.mappings.file(page.mapping)?;
    file.write_at(&frame[..PAGE_SIZE], page.offset)?;
    log_debug!(target: "mmap", "writeback: {} bytes at offset {:#x}", PAGE_SIZE, page.offset);
    Ok(())
}
