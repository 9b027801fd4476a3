use super::{MapError, MapFlags, PhysMapping, Stage, UnmapError};
use crate::arch::TlbMaintenance;
use aarch64::mem::{
    entry_size, is_block_allowed, AddrRange, Address, Attrs, EntryKind, Mode, PAddr,
    PageTable as RawPageTable, PageTableEntry, TranslationLayout, ENTRIES_PER_TABLE, PAGESIZE,
};
use allocators::{AllocInit, Allocator};
use core::alloc::Layout;
use core::fmt::{Debug, Display, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::{fence, Ordering};

/// The first output address that an entry cannot encode anymore
const OUTPUT_LIMIT: u64 = 1 << 48;

/// The result of walking a page table for a single address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Translation {
    /// Where the translated address ends up
    pub pa: PAddr,
    /// Attributes of the leaf that translated the address
    pub attrs: Attrs,
    /// The level of that leaf
    pub level: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Op {
    /// Translate every input address `a` of the range to `a + offset`
    Map {
        offset: u64,
        attrs: Attrs,
        overwrite: bool,
    },
    Unmap,
}

#[derive(Debug, Copy, Clone)]
struct Update {
    begin: u64,
    end: u64,
    op: Op,
    /// Entries are only written when this is set, otherwise tables are only allocated and conflicts detected
    commit: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum WalkError {
    OutOfMemory,
    Overlap,
}

/// A translation table tree of one [`Stage`].
///
/// All tables of the tree, including the root, are allocated from the allocator the table was created with and
/// accessed through `phys_map`.
/// The owner is responsible for serializing access, usually by keeping the table inside of a
/// [`SpinLock`](ksync::SpinLock).
pub struct PageTable<S: Stage> {
    root: PAddr,
    layout: TranslationLayout,
    vmid: u16,
    phys_map: PhysMapping,
    alloc: &'static (dyn Allocator<'static> + Sync),
    tlb: &'static dyn TlbMaintenance,
    _stage: PhantomData<S>,
}

impl<S: Stage> PageTable<S> {
    /// Create a table in which nothing is mapped.
    ///
    /// `vmid` is used to scope TLB maintenance of stage 2 tables.
    pub fn new(
        pa_bits: u8,
        vmid: u16,
        phys_map: PhysMapping,
        alloc: &'static (dyn Allocator<'static> + Sync),
        tlb: &'static dyn TlbMaintenance,
    ) -> Result<Self, MapError> {
        let layout = S::layout(pa_bits);
        let memory = alloc
            .allocate(Self::root_layout(&layout), AllocInit::Uninitialized)
            .map_err(|_| MapError::OutOfMemory)?;
        for page in memory.chunks_exact_mut(PAGESIZE) {
            RawPageTable::init(page.as_mut_ptr().cast());
        }

        let root = phys_map.rev_map(memory.as_ptr());
        log::debug!(
            "created {} page table at {root:?} with {} levels and {} root pages",
            S::NAME,
            layout.max_level + 1,
            layout.root_tables
        );
        Ok(Self {
            root,
            layout,
            vmid,
            phys_map,
            alloc,
            tlb,
            _stage: PhantomData,
        })
    }

    fn root_layout(layout: &TranslationLayout) -> Layout {
        let size = layout.root_tables * PAGESIZE;
        match Layout::from_size_align(size, size) {
            Ok(layout) => layout,
            Err(_) => panic!("root tables of {size:#x} bytes cannot be aligned to their size"),
        }
    }

    pub fn root(&self) -> PAddr {
        self.root
    }

    pub fn layout(&self) -> TranslationLayout {
        self.layout
    }

    pub fn vmid(&self) -> u16 {
        self.vmid
    }

    /// Make this table the active translation of its address space.
    pub fn activate(&self) {
        self.tlb.set_address_space(self.vmid, self.root);
    }

    /// Map `range` to the physical memory starting at `pa` with the given `mode`.
    ///
    /// Mappings are placed at the highest level at which both the input and output addresses are aligned, so large
    /// and aligned ranges are covered by blocks instead of pages.
    ///
    /// The update is atomic with respect to failure: when an error is returned no mapping has changed.
    pub fn map(
        &mut self,
        range: AddrRange<S::Addr>,
        pa: PAddr,
        mode: Mode,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        self.map_attrs(range, pa, S::mode_to_attrs(mode), flags)
    }

    /// Same as [`map()`](PageTable::map) but with pre-encoded attributes.
    pub fn map_attrs(
        &mut self,
        range: AddrRange<S::Addr>,
        pa: PAddr,
        attrs: Attrs,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        if range.is_empty() {
            return Ok(());
        }
        if !range.is_page_aligned() || !pa.is_page_aligned() {
            return Err(MapError::Unaligned);
        }
        let pa_end = pa.raw().checked_add(range.len());
        if range.end.raw() > self.layout.address_limit() || pa_end.map_or(true, |end| end > OUTPUT_LIMIT) {
            return Err(MapError::OutOfRange);
        }

        log::trace!(
            "mapping {range:?} to {pa:?} with {attrs:?} in {} table {:?}",
            S::NAME,
            self.root
        );
        let op = Op::Map {
            offset: pa.raw().wrapping_sub(range.begin.raw()),
            attrs,
            overwrite: flags.contains(MapFlags::OVERWRITE),
        };
        self.update(range.begin.raw(), range.end.raw(), op)
            .map_err(|e| match e {
                WalkError::OutOfMemory => MapError::OutOfMemory,
                WalkError::Overlap => MapError::Overlap,
            })
    }

    /// Remove all mappings in `range`.
    ///
    /// Blocks that are only partly covered are split first, which requires memory.
    /// Tables that become empty are kept until the whole table is destroyed.
    pub fn unmap(&mut self, range: AddrRange<S::Addr>) -> Result<(), UnmapError> {
        if range.is_empty() {
            return Ok(());
        }
        if !range.is_page_aligned() {
            return Err(UnmapError::Unaligned);
        }
        if range.end.raw() > self.layout.address_limit() {
            return Err(UnmapError::OutOfRange);
        }

        log::trace!("unmapping {range:?} in {} table {:?}", S::NAME, self.root);
        self.update(range.begin.raw(), range.end.raw(), Op::Unmap)
            .map_err(|e| match e {
                WalkError::OutOfMemory => UnmapError::OutOfMemory,
                WalkError::Overlap => panic!("unmapping can never conflict with existing mappings"),
            })
    }

    /// Map the physical `range` to the same addresses in this table's address space.
    pub fn identity_map(&mut self, range: AddrRange<PAddr>, mode: Mode, flags: MapFlags) -> Result<(), MapError> {
        self.map(Self::identity(range), range.begin, mode, flags)
    }

    /// Remove the mappings that [`identity_map()`](PageTable::identity_map) established for `range`.
    pub fn identity_unmap(&mut self, range: AddrRange<PAddr>) -> Result<(), UnmapError> {
        self.unmap(Self::identity(range))
    }

    fn identity(range: AddrRange<PAddr>) -> AddrRange<S::Addr> {
        AddrRange::new(S::Addr::from_raw(range.begin.raw()), S::Addr::from_raw(range.end.raw()))
    }

    fn update(&mut self, begin: u64, end: u64, op: Op) -> Result<(), WalkError> {
        // Safety: `self` is borrowed mutably for the whole update
        let root = unsafe { self.root_entries_mut() };
        let level = self.layout.max_level;

        // the first pass allocates all tables and detects conflicts so that the second one cannot fail
        let dry = Update {
            begin,
            end,
            op,
            commit: false,
        };
        self.update_table(root, 0, level, &dry)?;
        self.update_table(root, 0, level, &Update { commit: true, ..dry })?;

        S::invalidate(self.tlb, self.vmid, begin, end);
        Ok(())
    }

    /// Apply `upd` to the entries of `table` whose first entry translates `base`.
    fn update_table(
        &mut self,
        table: &mut [PageTableEntry],
        base: u64,
        level: u8,
        upd: &Update,
    ) -> Result<(), WalkError> {
        let size = entry_size(level);
        let table_end = base + size * table.len() as u64;
        let end = upd.end.min(table_end);

        let mut addr = upd.begin.max(base);
        while addr < end {
            let index = ((addr - base) / size) as usize;
            let entry_begin = base + index as u64 * size;
            let chunk_end = end.min(entry_begin + size);
            self.update_entry(&mut table[index], entry_begin, addr, chunk_end, level, upd)?;
            addr = chunk_end;
        }
        Ok(())
    }

    /// Apply `upd` to the part `[begin, end)` of the entry at `level` that translates `entry_begin`.
    fn update_entry(
        &mut self,
        pte: &mut PageTableEntry,
        entry_begin: u64,
        begin: u64,
        end: u64,
        level: u8,
        upd: &Update,
    ) -> Result<(), WalkError> {
        let size = entry_size(level);
        let covers_entry = begin == entry_begin && end == entry_begin + size;
        let kind = pte.classify(level);

        match upd.op {
            Op::Unmap => match kind {
                EntryKind::Absent => Ok(()),
                EntryKind::Block(..) if covers_entry => {
                    if upd.commit {
                        self.replace(pte, PageTableEntry::absent(level), entry_begin, level);
                    }
                    Ok(())
                }
                _ => self.descend(pte, entry_begin, begin, end, level, upd),
            },

            Op::Map {
                offset,
                attrs,
                overwrite,
            } => {
                let target = entry_begin.wrapping_add(offset);
                if kind == EntryKind::Block(PAddr::new(target), attrs) {
                    return Ok(());
                }

                let fits_leaf = covers_entry && is_block_allowed(level) && target % size == 0;
                let leaf = || PageTableEntry::block(level, PAddr::new(target), attrs);
                match kind {
                    EntryKind::Absent if fits_leaf => {
                        if upd.commit {
                            self.replace(pte, leaf(), entry_begin, level);
                        }
                        Ok(())
                    }
                    EntryKind::Block(..) if !overwrite => Err(WalkError::Overlap),
                    EntryKind::Block(..) if fits_leaf => {
                        if upd.commit {
                            self.replace(pte, leaf(), entry_begin, level);
                        }
                        Ok(())
                    }
                    EntryKind::Table(child) if fits_leaf => {
                        if !overwrite {
                            self.check_unchanged(child, entry_begin, level - 1, offset, attrs)?;
                        }
                        if upd.commit {
                            self.replace(pte, leaf(), entry_begin, level);
                        }
                        Ok(())
                    }
                    _ => self.descend(pte, entry_begin, begin, end, level, upd),
                }
            }
        }
    }

    /// Continue the update one level further down, turning `pte` into a table first if necessary.
    fn descend(
        &mut self,
        pte: &mut PageTableEntry,
        entry_begin: u64,
        begin: u64,
        end: u64,
        level: u8,
        upd: &Update,
    ) -> Result<(), WalkError> {
        let child = self.populate(pte, entry_begin, level)?;
        // Safety: `pte` is the only entry referencing `child`, and it is not used while the child is updated
        let entries = unsafe { self.table_entries_mut(child) };
        self.update_table(entries, entry_begin, level - 1, &Update { begin, end, ..*upd })
    }

    /// Make sure that all mappings below the table at `table` already match the requested ones.
    fn check_unchanged(
        &self,
        table: PAddr,
        base: u64,
        level: u8,
        offset: u64,
        attrs: Attrs,
    ) -> Result<(), WalkError> {
        let size = entry_size(level);
        for (i, pte) in self.table_entries(table).iter().enumerate() {
            let entry_begin = base + i as u64 * size;
            match pte.classify(level) {
                EntryKind::Absent => {}
                EntryKind::Block(pa, old) if pa.raw() == entry_begin.wrapping_add(offset) && old == attrs => {}
                EntryKind::Block(..) => return Err(WalkError::Overlap),
                EntryKind::Table(child) => self.check_unchanged(child, entry_begin, level - 1, offset, attrs)?,
            }
        }
        Ok(())
    }

    /// Ensure that `pte` references a table and return that table.
    ///
    /// A block is split into a table that reproduces the very same mapping one level below.
    fn populate(&mut self, pte: &mut PageTableEntry, entry_begin: u64, level: u8) -> Result<PAddr, WalkError> {
        let old = pte.classify(level);
        if let EntryKind::Table(child) = old {
            return Ok(child);
        }

        let child_level = level - 1;
        let table = self.alloc_table()?;
        if let EntryKind::Block(pa, attrs) = old {
            log::trace!("splitting {} block at {entry_begin:#x} on level {level}", S::NAME);
            let child_size = entry_size(child_level);
            for (i, entry) in table.entries.iter_mut().enumerate() {
                *entry = PageTableEntry::block(child_level, pa.add(i as u64 * child_size), attrs);
            }
        }

        // the table must be initialized before the hardware can observe it
        fence(Ordering::Release);

        let child = self.phys_map.rev_map(table as *const RawPageTable);
        self.replace(pte, PageTableEntry::table(level, child), entry_begin, level);
        Ok(child)
    }

    /// Write `new` into `pte` using break-before-make if both the old and the new entry are valid.
    ///
    /// Tables referenced by the old entry are freed.
    fn replace(&mut self, pte: &mut PageTableEntry, new: PageTableEntry, entry_begin: u64, level: u8) {
        let old = *pte;
        if old.is_valid() && new.is_valid() {
            *pte = PageTableEntry::absent(level);
            S::invalidate(self.tlb, self.vmid, entry_begin, entry_begin + entry_size(level));
        }
        *pte = new;

        if let EntryKind::Table(child) = old.classify(level) {
            self.free_table(child, level - 1);
        }
    }

    fn alloc_table(&self) -> Result<&'static mut RawPageTable, WalkError> {
        let memory = self
            .alloc
            .allocate(Layout::new::<RawPageTable>(), AllocInit::Uninitialized)
            .map_err(|_| {
                log::trace!("no memory left for another {} page table", S::NAME);
                WalkError::OutOfMemory
            })?;
        let table = RawPageTable::init(memory.as_mut_ptr().cast());
        Ok(unsafe { &mut *table })
    }

    /// Free the table at `table`, whose entries live at `level`, and everything below it.
    fn free_table(&self, table: PAddr, level: u8) {
        for pte in self.table_entries(table).iter() {
            if let EntryKind::Table(child) = pte.classify(level) {
                self.free_table(child, level - 1);
            }
        }
        unsafe {
            self.alloc
                .deallocate(self.phys_map.map(table), Layout::new::<RawPageTable>())
        };
    }

    fn root_entries(&self) -> &[PageTableEntry] {
        // Safety: the root spans `root_entries()` entries and is only written through `&mut self`
        unsafe {
            core::slice::from_raw_parts(
                self.phys_map.map::<PageTableEntry>(self.root),
                self.layout.root_entries(),
            )
        }
    }

    fn table_entries(&self, table: PAddr) -> &[PageTableEntry] {
        // Safety: tables below the root belong to this tree and are only written through `&mut self`
        unsafe { core::slice::from_raw_parts(self.phys_map.map::<PageTableEntry>(table), ENTRIES_PER_TABLE) }
    }

    /// # Safety
    /// The returned slice must not outlive the mutable borrow of `self` and must be the only reference to the root's
    /// entries while it is in use.
    unsafe fn root_entries_mut<'t>(&mut self) -> &'t mut [PageTableEntry] {
        core::slice::from_raw_parts_mut(
            self.phys_map.map::<PageTableEntry>(self.root),
            self.layout.root_entries(),
        )
    }

    /// # Safety
    /// `table` must be a table of this tree, and the same rules as for
    /// [`root_entries_mut()`](PageTable::root_entries_mut) apply to the returned slice.
    unsafe fn table_entries_mut<'t>(&mut self, table: PAddr) -> &'t mut [PageTableEntry] {
        core::slice::from_raw_parts_mut(self.phys_map.map::<PageTableEntry>(table), ENTRIES_PER_TABLE)
    }

    /// Walk the table in software to find out how `addr` is translated.
    pub fn translate(&self, addr: S::Addr) -> Option<Translation> {
        let addr = addr.raw();
        if addr >= self.layout.address_limit() {
            return None;
        }

        let mut table: &[PageTableEntry] = self.root_entries();
        let mut base = 0;
        let mut level = self.layout.max_level;
        loop {
            let size = entry_size(level);
            let index = ((addr - base) / size) as usize;
            let entry_begin = base + index as u64 * size;
            match table[index].classify(level) {
                EntryKind::Absent => return None,
                EntryKind::Block(pa, attrs) => {
                    return Some(Translation {
                        pa: pa.add(addr - entry_begin),
                        attrs,
                        level,
                    })
                }
                EntryKind::Table(child) => {
                    table = self.table_entries(child);
                    base = entry_begin;
                    level -= 1;
                }
            }
        }
    }

    /// The attributes with which all of `range` is mapped, if they are the same everywhere.
    ///
    /// Unmapped parts of the range count as mapped with empty attributes.
    /// The range is extended to page boundaries.
    pub fn get_attrs(&self, range: AddrRange<S::Addr>) -> Option<Attrs> {
        let page_mask = PAGESIZE as u64 - 1;
        let begin = range.begin.raw() & !page_mask;
        let end = range.end.raw().checked_add(page_mask)? & !page_mask;
        if begin >= end || end > self.layout.address_limit() {
            return None;
        }
        self.attrs_in(self.root_entries(), 0, self.layout.max_level, begin, end)
    }

    /// The mode with which all of `range` is mapped, if it is the same everywhere.
    pub fn get_mode(&self, range: AddrRange<S::Addr>) -> Option<Mode> {
        self.get_attrs(range).map(S::attrs_to_mode)
    }

    fn attrs_in(&self, table: &[PageTableEntry], base: u64, level: u8, begin: u64, end: u64) -> Option<Attrs> {
        let size = entry_size(level);
        let end = end.min(base + size * table.len() as u64);

        let mut uniform = None;
        let mut addr = begin.max(base);
        while addr < end {
            let index = ((addr - base) / size) as usize;
            let entry_begin = base + index as u64 * size;
            let chunk_end = end.min(entry_begin + size);
            let attrs = match table[index].classify(level) {
                EntryKind::Table(child) => {
                    self.attrs_in(self.table_entries(child), entry_begin, level - 1, addr, chunk_end)?
                }
                _ => table[index].attrs(),
            };
            match uniform {
                None => uniform = Some(attrs),
                Some(seen) if seen == attrs => {}
                Some(_) => return None,
            }
            addr = chunk_end;
        }
        uniform
    }

    /// Replace tables by blocks or absent entries wherever that does not change any mapping.
    pub fn defrag(&mut self) {
        let level = self.layout.max_level;
        let size = entry_size(level);
        // Safety: `self` is borrowed mutably for the whole walk
        let root = unsafe { self.root_entries_mut() };
        for (i, pte) in root.iter_mut().enumerate() {
            self.defrag_entry(pte, i as u64 * size, level);
        }
    }

    fn defrag_entry(&mut self, pte: &mut PageTableEntry, entry_begin: u64, level: u8) {
        let EntryKind::Table(child) = pte.classify(level) else {
            return;
        };
        let child_level = level - 1;
        let child_size = entry_size(child_level);
        // Safety: `pte` is the only entry referencing `child` and is not touched until the children are done
        let entries = unsafe { self.table_entries_mut(child) };

        if child_level > 0 {
            for (i, entry) in entries.iter_mut().enumerate() {
                self.defrag_entry(entry, entry_begin + i as u64 * child_size, child_level);
            }
        }

        if entries.iter().all(|entry| !entry.is_present()) {
            log::trace!("dropping empty {} table at {child:?}", S::NAME);
            self.replace(pte, PageTableEntry::absent(level), entry_begin, level);
            S::invalidate(self.tlb, self.vmid, entry_begin, entry_begin + entry_size(level));
            return;
        }

        if !is_block_allowed(level) {
            return;
        }
        let EntryKind::Block(first, attrs) = entries[0].classify(child_level) else {
            return;
        };
        let contiguous = first.is_aligned(entry_size(level))
            && entries.iter().enumerate().all(|(i, entry)| {
                entry.classify(child_level) == EntryKind::Block(first.add(i as u64 * child_size), attrs)
            });
        if contiguous {
            log::trace!("merging {} table at {child:?} into a block", S::NAME);
            self.replace(pte, PageTableEntry::block(level, first, attrs), entry_begin, level);
        }
    }

    /// A printable listing of every present entry of the tree.
    pub fn dump(&self) -> Dump<'_, S> {
        Dump(self)
    }

    fn dump_table(&self, f: &mut Formatter<'_>, table: &[PageTableEntry], level: u8) -> core::fmt::Result {
        let indent = (self.layout.max_level - level) as usize * 2;
        for (i, pte) in table.iter().enumerate() {
            if !pte.is_present() {
                continue;
            }
            writeln!(f, "{:indent$}{i:>3} (level {level}): {pte:?}", "")?;
            if let EntryKind::Table(child) = pte.classify(level) {
                self.dump_table(f, self.table_entries(child), level - 1)?;
            }
        }
        Ok(())
    }

    /// Free every table of the tree, including the root.
    pub fn destroy(self) {
        let level = self.layout.max_level;
        for pte in self.root_entries().iter() {
            if let EntryKind::Table(child) = pte.classify(level) {
                self.free_table(child, level - 1);
            }
        }
        unsafe {
            self.alloc
                .deallocate(self.phys_map.map(self.root), Self::root_layout(&self.layout))
        };
        log::debug!("destroyed {} page table at {:?}", S::NAME, self.root);
    }
}

/// See [`PageTable::dump()`].
pub struct Dump<'t, S: Stage>(&'t PageTable<S>);

impl<S: Stage> Display for Dump<'_, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let table = self.0;
        writeln!(f, "{} page table at {:?}:", S::NAME, table.root)?;
        table.dump_table(f, table.root_entries(), table.layout.max_level)
    }
}

impl<S: Stage> Debug for PageTable<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("stage", &S::NAME)
            .field("root", &self.root)
            .field("layout", &self.layout)
            .field("vmid", &self.vmid)
            .finish()
    }
}
