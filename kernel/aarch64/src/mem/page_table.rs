use super::{MemoryPage, PageTableEntry, ENTRIES_PER_TABLE};
use core::mem::MaybeUninit;
use static_assertions::{assert_eq_align, assert_eq_size};

/// One table of the translation tree.
///
/// It exactly fills one page which is also the granule that the tables are allocated in.
/// A table does not know its own level, see [`PageTableEntry`] on why that matters.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

assert_eq_size!(PageTable, MemoryPage);
assert_eq_align!(PageTable, MemoryPage);
assert_eq_size!(PageTableEntry, u64);

impl PageTable {
    /// Initialize the given page with a table in which every entry is absent.
    pub fn init(page: *mut MaybeUninit<MemoryPage>) -> *mut PageTable {
        log::trace!("initializing empty page table at {page:p}");
        let entries = page.cast::<PageTableEntry>();
        for i in 0..ENTRIES_PER_TABLE {
            unsafe { entries.add(i).write(PageTableEntry::absent(0)) };
        }
        page.cast::<PageTable>()
    }

    /// Whether no entry of this table maps anything.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_present())
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::mem::{Mode, PAddr};
    use std::boxed::Box;

    #[test]
    fn test_init_clears_garbage() {
        let page = Box::leak(Box::new(MaybeUninit::new(MemoryPage::default())));
        unsafe { page.assume_init_mut().fill(0xa5) };

        let table = unsafe { &mut *PageTable::init(page) };
        assert!(table.is_empty());

        table.entries[7] = PageTableEntry::block(0, PAddr::new(0x1000), Mode::RWX.stage2_attrs());
        assert!(!table.is_empty());
    }
}
