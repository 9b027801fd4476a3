use super::mode::STAGE2_SW_OWNED;
use super::{PAddr, MAX_LEVEL, PAGE_BITS};
use core::fmt::{Binary, Debug, Formatter, LowerHex};

/// The entry is used for translation by the hardware.
pub const PTE_VALID: u64 = 1 << 0;
/// Distinguishes page descriptors from reserved encodings at level 0.
pub const PTE_LEVEL0_BLOCK: u64 = 1 << 1;
/// Distinguishes table descriptors from block descriptors at levels above 0.
pub const PTE_TABLE: u64 = 1 << 1;

/// Bits of an entry that hold the output address.
const PTE_ADDR_MASK: u64 = ((1 << 48) - 1) & !((1 << PAGE_BITS) - 1);
/// Bits of an entry that hold attributes, which is everything except the address and the level dependent tag.
const PTE_ATTR_MASK: u64 = !(PTE_ADDR_MASK | (1 << 1));

/// Attribute bits of a leaf entry.
///
/// These are produced from a [`Mode`](super::Mode) for one specific translation stage and are opaque otherwise.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct Attrs(u64);

impl Attrs {
    /// Construct attributes from raw bits, dropping everything outside of the attribute field.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & PTE_ATTR_MASK)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether entries carrying these attributes are used for translation
    pub const fn is_valid(self) -> bool {
        self.0 & PTE_VALID != 0
    }
}

impl Debug for Attrs {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "Attrs({:#018x})", self.0)
    }
}

/// The decoded meaning of a [`PageTableEntry`] at some level.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntryKind {
    /// Nothing is mapped
    Absent,
    /// The entry points to a table of the next lower level
    Table(PAddr),
    /// A leaf mapping; a block above level 0 and a page at level 0
    Block(PAddr, Attrs),
}

/// Whether a leaf entry may be placed at `level`.
///
/// Level 0 always holds page leaves, levels 1 and 2 may hold 2 MiB and 1 GiB blocks.
pub const fn is_block_allowed(level: u8) -> bool {
    level <= 2
}

/// An entry of a page table.
///
/// # Format
///
/// The entry does not know its own level, which is required to interpret it because the tag in bit 1 is reused:
/// at level 0 it marks a page descriptor while at higher levels it distinguishes tables from blocks.
///
/// ```text
///   63      55 54      48 47                              12 11          2   1   0
/// ┌──────────┬──────────┬──────────────────────────────────┬──────────────┬───┬───┐
/// │  upper   │ ignored/ │        output address            │    lower     │ T │ V │
/// │  attrs   │ reserved │                                  │    attrs     │   │   │
/// └──────────┴──────────┴──────────────────────────────────┴──────────────┴───┴───┘
/// ```
///
/// Table descriptors carry no attributes, everything in the attribute fields of a leaf is described by [`Attrs`].
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    /// The entry that marks nothing being mapped.
    pub const fn absent(level: u8) -> Self {
        let _ = level;
        Self { entry: 0 }
    }

    /// An entry referencing the next level table at `table`.
    pub fn table(level: u8, table: PAddr) -> Self {
        debug_assert!(level != 0 && level <= MAX_LEVEL, "no table can be placed at level {level}");
        debug_assert!(table.is_page_aligned());
        Self {
            entry: (table.raw() & PTE_ADDR_MASK) | PTE_TABLE | PTE_VALID,
        }
    }

    /// A leaf entry mapping the region at `pa` with `attrs`.
    pub fn block(level: u8, pa: PAddr, attrs: Attrs) -> Self {
        debug_assert!(is_block_allowed(level), "no block can be placed at level {level}");
        let mut entry = (pa.raw() & PTE_ADDR_MASK) | attrs.bits();
        if level == 0 {
            entry |= PTE_LEVEL0_BLOCK;
        }
        Self { entry }
    }

    pub const fn from_raw(entry: u64) -> Self {
        Self { entry }
    }

    pub const fn raw(self) -> u64 {
        self.entry
    }

    /// Whether the hardware uses this entry for translation
    pub const fn is_valid(self) -> bool {
        self.entry & PTE_VALID != 0
    }

    /// Whether the entry maps something, possibly without the hardware using it.
    pub const fn is_present(self) -> bool {
        self.is_valid() || self.entry & STAGE2_SW_OWNED != 0
    }

    pub const fn is_table(self, level: u8) -> bool {
        level != 0 && self.is_valid() && self.entry & PTE_TABLE != 0
    }

    pub const fn is_block(self, level: u8) -> bool {
        is_block_allowed(level)
            && if level == 0 {
                self.entry & PTE_LEVEL0_BLOCK != 0
            } else {
                self.is_present() && !self.is_table(level)
            }
    }

    /// Decode this entry as seen at `level`.
    pub fn classify(self, level: u8) -> EntryKind {
        debug_assert!(level <= MAX_LEVEL, "level {level} does not exist");
        if self.is_table(level) {
            EntryKind::Table(self.address())
        } else if self.is_block(level) {
            EntryKind::Block(self.address(), self.attrs())
        } else {
            EntryKind::Absent
        }
    }

    /// The output address stored in this entry with all attribute and tag bits stripped.
    pub const fn address(self) -> PAddr {
        PAddr::new(self.entry & PTE_ADDR_MASK)
    }

    /// The attribute bits stored in this entry.
    pub const fn attrs(self) -> Attrs {
        Attrs::from_bits(self.entry)
    }
}

impl Debug for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if !self.is_present() {
            f.write_str("PageTableEntry (absent) { .. }")
        } else {
            f.write_fmt(format_args!(
                "PageTableEntry {{ addr: {:#12x}, attrs: {:?}, tag: {} }}",
                self.address(),
                self.attrs(),
                (self.entry >> 1) & 1
            ))
        }
    }
}

impl Binary for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Binary::fmt(&self.entry, f)
    }
}

impl LowerHex for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        LowerHex::fmt(&self.entry, f)
    }
}
