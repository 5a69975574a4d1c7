// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Supplemental page table: per-process page arena indexed by virtual page.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::VmError;
use crate::is_page_aligned;
use crate::page::Page;

/// Index of a page descriptor inside its table's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(usize);

impl PageId {
    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Returns the arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Map from virtual page to its descriptor, exclusively owned by one address space.
#[derive(Default)]
pub struct SupplementalPageTable {
    slots: Vec<Option<Page>>,
    vacant: Vec<usize>,
    index: BTreeMap<usize, PageId>,
}

impl SupplementalPageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the page starting exactly at `va`; unaligned addresses never match.
    pub fn lookup(&self, va: usize) -> Option<PageId> {
        if !is_page_aligned(va) {
            return None;
        }
        self.index.get(&va).copied()
    }

    /// Inserts `page`; fails when its address is already occupied.
    pub fn insert(&mut self, page: Page) -> Result<PageId, VmError> {
        let va = page.va();
        if !is_page_aligned(va) {
            return Err(VmError::InvalidArgs);
        }
        if self.index.contains_key(&va) {
            return Err(VmError::MappingConflict(va));
        }
        let id = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(page);
                PageId(slot)
            }
            None => {
                self.slots.try_reserve(1).map_err(|_| VmError::AllocationFailure)?;
                self.slots.push(Some(page));
                PageId(self.slots.len() - 1)
            }
        };
        self.index.insert(va, id);
        Ok(id)
    }

    /// Detaches the page `id` from the table and hands it back.
    pub fn take(&mut self, id: PageId) -> Option<Page> {
        let page = self.slots.get_mut(id.0)?.take()?;
        self.index.remove(&page.va());
        self.vacant.push(id.0);
        Some(page)
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Returns true when any page starts inside `[start, end)`.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.index.range(start..end).next().is_some()
    }

    /// Page ids in ascending address order.
    pub fn ids(&self) -> Vec<PageId> {
        self.index.values().copied().collect()
    }

    /// Iterates `(id, page)` in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (PageId, &Page)> + '_ {
        self.index.values().filter_map(move |&id| self.get(id).map(|page| (id, page)))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::page::{AnonPage, PageKind};
    use proptest::prelude::*;

    fn anon(va: usize) -> Page {
        Page::new(va, true, PageKind::Anon(AnonPage::default()))
    }

    #[test]
    fn lookup_requires_exact_page_address() {
        let mut spt = SupplementalPageTable::new();
        let id = spt.insert(anon(0x4000)).expect("insert");
        assert_eq!(spt.lookup(0x4000), Some(id));
        assert_eq!(spt.lookup(0x4001), None);
        assert_eq!(spt.lookup(0x5000), None);
    }

    #[test]
    fn take_frees_address_and_recycles_slot() {
        let mut spt = SupplementalPageTable::new();
        let first = spt.insert(anon(0x1000)).expect("insert");
        let page = spt.take(first).expect("take");
        assert_eq!(page.va(), 0x1000);
        assert!(spt.lookup(0x1000).is_none());
        assert!(spt.take(first).is_none());
        let again = spt.insert(anon(0x2000)).expect("reinsert");
        assert_eq!(again, first);
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn iteration_is_address_ordered() {
        let mut spt = SupplementalPageTable::new();
        for va in [0x9000, 0x1000, 0x5000] {
            spt.insert(anon(va)).expect("insert");
        }
        let vas: Vec<usize> = spt.iter().map(|(_, page)| page.va()).collect();
        assert_eq!(vas, [0x1000, 0x5000, 0x9000]);
        assert!(spt.overlaps(0x4000, 0x6000));
        assert!(!spt.overlaps(0x6000, 0x9000));
    }

    proptest! {
        #[test]
        fn insert_then_lookup_then_conflict(pages in proptest::collection::btree_set(0usize..512, 1..32)) {
            let mut spt = SupplementalPageTable::new();
            for vpn in &pages {
                let va = vpn * PAGE_SIZE;
                let id = spt.insert(anon(va)).unwrap();
                prop_assert_eq!(spt.lookup(va), Some(id));
                prop_assert_eq!(spt.get(id).unwrap().va(), va);
                prop_assert_eq!(spt.insert(anon(va)).err(), Some(VmError::MappingConflict(va)));
            }
            prop_assert_eq!(spt.len(), pages.len());
        }
    }
}
