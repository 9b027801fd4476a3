//! Bookkeeping of who owns which part of physical memory
//!
//! The tracker starts out with the usable memory reported by the platform and hands out disjoint pieces of it.
//! Every piece is recorded together with its [`Owner`] so that the hypervisor can later verify that a VM really owns
//! the memory it asks the hypervisor to access.

use crate::boot_params::{BootParams, MemRanges};
use crate::config::{MAX_MEM_RANGES, MAX_RECORDS};
use aarch64::mem::{AddrRange, PAddr, PAGESIZE};
use thiserror_no_std::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum MemRangeError {
    #[error("memory ranges must be non-empty, ordered and must not overlap")]
    InvalidRange,
    #[error("the range is not page aligned")]
    Unaligned,
    #[error("no free memory range is large enough")]
    OutOfMemory,
    #[error("the range is not entirely free")]
    NotFree,
    #[error("the tracker cannot hold more than {MAX_RECORDS} records")]
    TooManyRecords,
    #[error("more than {MAX_MEM_RANGES} ranges would be reported")]
    TooManyRanges,
}

/// Who a range of physical memory belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Owner {
    Free,
    /// The primary VM's initial ramdisk
    Initrd,
    /// Claimed by the platform, not usable by anyone
    Reserved,
    /// Used by the hypervisor itself, i.e. its image and the page-table memory
    Hypervisor,
    Vm(u32),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Record {
    range: AddrRange<PAddr>,
    owner: Owner,
}

const EMPTY_RECORD: Record = Record {
    range: AddrRange {
        begin: PAddr::new(0),
        end: PAddr::new(0),
    },
    owner: Owner::Free,
};

/// A sorted set of non-overlapping, owned memory ranges.
#[derive(Debug, Clone)]
pub struct MemRangeTracker {
    records: [Record; MAX_RECORDS],
    len: usize,
}

impl MemRangeTracker {
    /// Start tracking the usable memory described by `params`.
    ///
    /// The hypervisor's image and the initrd are carved out of the free memory right away.
    pub fn new(params: &BootParams) -> Result<Self, MemRangeError> {
        let mut tracker = Self {
            records: [EMPTY_RECORD; MAX_RECORDS],
            len: 0,
        };

        let mut prev_end = None;
        for range in params.mem_ranges.iter() {
            if range.is_empty() || prev_end.map_or(false, |end| range.begin < end) {
                return Err(MemRangeError::InvalidRange);
            }
            // only whole pages are usable
            let begin = range.begin.align_up(PAGESIZE as u64);
            let end = range.end.align_down(PAGESIZE as u64);
            if begin < end {
                tracker.insert(
                    tracker.len,
                    Record {
                        range: AddrRange::new(begin, end),
                        owner: Owner::Free,
                    },
                )?;
            }
            prev_end = Some(range.end);
        }

        if !params.initrd.is_empty() {
            let initrd = AddrRange::new(
                params.initrd.begin.align_down(PAGESIZE as u64),
                params.initrd.end.align_up(PAGESIZE as u64),
            );
            tracker.carve(initrd, Owner::Initrd)?;
        }

        for (section, _) in params.image.sections() {
            if !section.is_page_aligned() {
                return Err(MemRangeError::Unaligned);
            }
            if tracker
                .records()
                .iter()
                .any(|record| record.owner == Owner::Initrd && record.range.overlaps(&section))
            {
                return Err(MemRangeError::InvalidRange);
            }
            tracker.carve(section, Owner::Hypervisor)?;
        }

        log::debug!("tracking {} free memory ranges", tracker.len);
        Ok(tracker)
    }

    fn records(&self) -> &[Record] {
        &self.records[..self.len]
    }

    fn insert(&mut self, index: usize, record: Record) -> Result<(), MemRangeError> {
        if self.len == MAX_RECORDS {
            return Err(MemRangeError::TooManyRecords);
        }
        self.records.copy_within(index..self.len, index + 1);
        self.records[index] = record;
        self.len += 1;
        Ok(())
    }

    /// Assign the part of every free record that intersects `range` to `owner`.
    fn carve(&mut self, range: AddrRange<PAddr>, owner: Owner) -> Result<(), MemRangeError> {
        let mut i = 0;
        while i < self.len {
            let record = self.records[i];
            if record.owner != Owner::Free || !record.range.overlaps(&range) {
                i += 1;
                continue;
            }

            let begin = record.range.begin.max(range.begin);
            let end = record.range.end.min(range.end);
            let pieces = [
                (record.range.begin, begin, Owner::Free),
                (begin, end, owner),
                (end, record.range.end, Owner::Free),
            ];
            let needed = pieces.iter().filter(|(b, e, _)| b < e).count();
            if self.len + needed - 1 > MAX_RECORDS {
                return Err(MemRangeError::TooManyRecords);
            }

            self.records.copy_within(i + 1..self.len, i + needed);
            self.len = self.len + needed - 1;
            for (begin, end, owner) in pieces.into_iter().filter(|(b, e, _)| b < e) {
                self.records[i] = Record {
                    range: AddrRange::new(begin, end),
                    owner,
                };
                i += 1;
            }
        }
        Ok(())
    }

    /// Hand the free `range` to `owner`.
    ///
    /// Fails with [`NotFree`](MemRangeError::NotFree) unless the whole range is currently free.
    pub fn reserve(&mut self, range: AddrRange<PAddr>, owner: Owner) -> Result<(), MemRangeError> {
        if !range.is_page_aligned() {
            return Err(MemRangeError::Unaligned);
        }
        if self.owner_of(range) != Some(Owner::Free) {
            return Err(MemRangeError::NotFree);
        }
        self.carve(range, owner)
    }

    /// Find the first free range that fits `size` bytes at an `align`ed address and hand it to `owner`.
    pub fn allocate(&mut self, size: u64, align: u64, owner: Owner) -> Result<AddrRange<PAddr>, MemRangeError> {
        if size == 0 || size % PAGESIZE as u64 != 0 || !align.is_power_of_two() {
            return Err(MemRangeError::Unaligned);
        }

        let found = self
            .records()
            .iter()
            .filter(|record| record.owner == Owner::Free)
            .find_map(|record| {
                let begin = record.range.begin.align_up(align);
                let end = begin.raw().checked_add(size)?;
                (end <= record.range.end.raw()).then(|| AddrRange::new(begin, PAddr::new(end)))
            })
            .ok_or(MemRangeError::OutOfMemory)?;

        self.carve(found, owner)?;
        log::debug!("allocated {found:?} for {owner:?}");
        Ok(found)
    }

    /// Make every record inside of `range` free again.
    pub fn release(&mut self, range: AddrRange<PAddr>) {
        for record in self.records[..self.len].iter_mut() {
            if range.contains_range(&record.range) {
                record.owner = Owner::Free;
            }
        }

        // adjacent free records are joined so that later allocations can span them
        let mut i = 1;
        while i < self.len {
            let (prev, cur) = (self.records[i - 1], self.records[i]);
            if prev.owner == Owner::Free && cur.owner == Owner::Free && prev.range.end == cur.range.begin {
                self.records[i - 1].range.end = cur.range.end;
                self.records.copy_within(i + 1..self.len, i);
                self.len -= 1;
            } else {
                i += 1;
            }
        }
        log::debug!("released {range:?}");
    }

    /// Hand every free range to `owner`.
    pub fn assign_free(&mut self, owner: Owner) {
        for record in self.records[..self.len].iter_mut() {
            if record.owner == Owner::Free {
                record.owner = owner;
            }
        }
    }

    /// The owner of `range` if all of it is tracked and belongs to the same owner.
    pub fn owner_of(&self, range: AddrRange<PAddr>) -> Option<Owner> {
        if range.is_empty() {
            return None;
        }

        let mut owner = None;
        let mut covered = range.begin;
        for record in self.records().iter().filter(|record| record.range.overlaps(&range)) {
            if record.range.begin > covered {
                return None;
            }
            match owner {
                None => owner = Some(record.owner),
                Some(owner) if owner == record.owner => {}
                Some(_) => return None,
            }
            covered = record.range.end;
        }
        if covered < range.end {
            return None;
        }
        owner
    }

    /// All ranges for which `f` returns true.
    ///
    /// Adjacent ranges are merged into one, but only when they have the same owner.
    pub fn ranges_where(&self, mut f: impl FnMut(Owner) -> bool) -> Result<MemRanges, MemRangeError> {
        let mut list = MemRanges::new();
        let mut current: Option<Record> = None;
        for record in self.records().iter().filter(|record| f(record.owner)) {
            match current.as_mut() {
                Some(cur) if cur.owner == record.owner && cur.range.end == record.range.begin => {
                    cur.range.end = record.range.end;
                }
                _ => {
                    if let Some(done) = current.replace(*record) {
                        list.push(done.range).map_err(|_| MemRangeError::TooManyRanges)?;
                    }
                }
            }
        }
        if let Some(done) = current {
            list.push(done.range).map_err(|_| MemRangeError::TooManyRanges)?;
        }
        Ok(list)
    }

    /// The memory the primary VM must not use, i.e. everything held by the hypervisor or by secondary VMs.
    pub fn reserved_ranges(&self) -> Result<MemRanges, MemRangeError> {
        self.ranges_where(|owner| match owner {
            Owner::Free | Owner::Initrd => false,
            Owner::Vm(id) => id != hypercall_abi::PRIMARY_VM_ID,
            Owner::Reserved | Owner::Hypervisor => true,
        })
    }

    pub fn free_bytes(&self) -> u64 {
        self.records()
            .iter()
            .filter(|record| record.owner == Owner::Free)
            .map(|record| record.range.len())
            .sum()
    }
}
