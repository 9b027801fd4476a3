//! The data exchanged with the platform at boot
//!
//! The platform tells the hypervisor which physical memory is usable, where the hypervisor's own image and the primary
//! VM's initrd were loaded.
//! Once all VMs are created, the hypervisor reports back which memory the primary VM must keep its hands off.

use crate::config::MAX_MEM_RANGES;
use crate::memrange::MemRangeError;
use crate::mm::MapError;
use crate::vm::VmError;
use aarch64::mem::{AddrRange, Mode, PAddr};
use core::fmt::{Debug, Formatter};
use thiserror_no_std::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("the platform could not provide boot parameters")]
    Unavailable,
    #[error("more than {MAX_MEM_RANGES} memory ranges are required")]
    TooManyRanges,
    #[error("the platform rejected the updated boot parameters")]
    UpdateRejected,
    #[error("the memory layout is unusable: {0}")]
    Memory(#[from] MemRangeError),
    #[error("could not set up the hypervisor's page table: {0}")]
    Map(#[from] MapError),
    #[error("could not create a vm: {0}")]
    Vm(#[from] VmError),
}

/// A list of at most [`MAX_MEM_RANGES`] physical memory ranges.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct MemRanges {
    ranges: [AddrRange<PAddr>; MAX_MEM_RANGES],
    len: usize,
}

impl MemRanges {
    pub const fn new() -> Self {
        Self {
            ranges: [AddrRange {
                begin: PAddr::new(0),
                end: PAddr::new(0),
            }; MAX_MEM_RANGES],
            len: 0,
        }
    }

    pub fn from_slice(ranges: &[AddrRange<PAddr>]) -> Result<Self, BootError> {
        let mut list = Self::new();
        for &range in ranges {
            list.push(range)?;
        }
        Ok(list)
    }

    pub fn push(&mut self, range: AddrRange<PAddr>) -> Result<(), BootError> {
        let slot = self.ranges.get_mut(self.len).ok_or(BootError::TooManyRanges)?;
        *slot = range;
        self.len += 1;
        Ok(())
    }

    pub fn as_slice(&self) -> &[AddrRange<PAddr>] {
        &self.ranges[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddrRange<PAddr>> {
        self.as_slice().iter()
    }
}

impl Debug for MemRanges {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// The sections of the hypervisor's own image.
///
/// Sections must be page aligned. They may lie inside of usable memory, in which case they are taken away from it
/// before anything else is handed out. Empty sections are ignored.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct HypervisorImage {
    pub text: AddrRange<PAddr>,
    pub rodata: AddrRange<PAddr>,
    pub data: AddrRange<PAddr>,
}

impl HypervisorImage {
    /// Every non-empty section together with the mode the hypervisor maps it with.
    pub fn sections(&self) -> impl Iterator<Item = (AddrRange<PAddr>, Mode)> {
        [
            (self.text, Mode::Execute),
            (self.rodata, Mode::Read),
            (self.data, Mode::Read | Mode::Write),
        ]
        .into_iter()
        .filter(|(range, _)| !range.is_empty())
    }
}

/// What the platform discovered about the machine before the hypervisor started.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootParams {
    /// Usable physical memory, ordered by address and without overlaps
    pub mem_ranges: MemRanges,
    /// Where the hypervisor itself was loaded
    pub image: HypervisorImage,
    /// Where the primary VM's initial ramdisk was placed, empty if there is none
    pub initrd: AddrRange<PAddr>,
    /// An opaque value that is passed on to the primary VM
    pub kernel_arg: u64,
}

/// What the hypervisor reports back to the platform once it has partitioned the memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootParamsUpdate {
    /// Memory that is used by the hypervisor or secondary VMs
    pub reserved: MemRanges,
    pub initrd: AddrRange<PAddr>,
}

/// Boot-time collaborator that knows about the machine's memory.
pub trait Platform {
    fn get_boot_params(&mut self) -> Result<BootParams, BootError>;

    /// Tell the platform (and through it the primary VM) which memory is off limits.
    ///
    /// Returns whether the platform could apply the update.
    fn update_boot_params(&mut self, update: &BootParamsUpdate) -> bool;
}
