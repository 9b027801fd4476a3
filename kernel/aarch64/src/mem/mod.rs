//! Data-Structures and Definitions for VMSAv8-64 translation with a 4 KiB granule
//!
//! # Translation Basics
//!
//! Addresses are translated through a radix tree of page tables.
//! Every table is exactly one page large and holds 512 entries of 8 bytes each, so every level of the tree resolves
//! 9 bits of the input address.
//! The 12-bit page offset is untranslated and carried over into the output address.
//!
//! ```text
//! 47           39 38           30 29           21 20           12 11            0
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬───────────────┐
//! │   level 3    │   level 2    │   level 1    │   level 0    │  page offset  │
//! └──────────────┴──────────────┴──────────────┴──────────────┴───────────────┘
//!      9bits          9bits          9bits          9bits           12bits
//! ```
//!
//! Levels are counted from the leaves upwards: level 0 entries map single pages while an entry at level `n` covers
//! `4 KiB << (9 * n)` of address space.
//! The architecture manual counts the other way around (its "level 3" is our level 0), which is why all code in this
//! crate speaks of levels relative to the leaves.
//!
//! Leaf entries at level 1 (2 MiB) and level 2 (1 GiB) are called *blocks*.
//! Level 0 leaves are *pages* and use a different tag in the low bits of the entry.
//! See [`PageTableEntry`] for the details of the encoding.
//!
//! # Stages
//!
//! The hypervisor itself runs with *stage 1* translation (virtual to physical addresses).
//! Each VM is confined by a *stage 2* table that translates what the VM believes to be physical addresses
//! (intermediate physical addresses, [`IpAddr`]) into real [`PAddr`]s.
//! Both stages share the entry format described here but use different attribute encodings, see [`Mode`].

mod addr;
mod layout;
mod mode;
mod page_table;
mod page_table_entry;

use core::ops::{Deref, DerefMut};

pub use addr::*;
pub use layout::*;
pub use mode::*;
pub use page_table::*;
pub use page_table_entry::*;

/// The number of address bits resolved by the page offset.
pub const PAGE_BITS: u32 = 12;

/// The number of address bits resolved by each level of the page table tree.
pub const PAGE_LEVEL_BITS: u32 = 9;

/// How large each page (and thus each page table) is.
pub const PAGESIZE: usize = 1 << PAGE_BITS;

/// How many entries fit into one page table.
pub const ENTRIES_PER_TABLE: usize = 1 << PAGE_LEVEL_BITS;

/// The highest level that exists in any translation regime with a 4 KiB granule.
pub const MAX_LEVEL: u8 = 3;

/// Type definition for a slice of bytes that is exactly one page large and aligned to it as well
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(C, align(4096))]
pub struct MemoryPage([u8; PAGESIZE]);

impl Deref for MemoryPage {
    type Target = [u8; PAGESIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for MemoryPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self([0u8; PAGESIZE])
    }
}

/// The size of the address region that a single entry at `level` maps.
#[inline]
pub const fn entry_size(level: u8) -> u64 {
    1 << (PAGE_BITS + level as u32 * PAGE_LEVEL_BITS)
}
