//! Management of the hypervisor's stage 1 and the VMs' stage 2 translation tables
//!
//! Both stages share one engine, [`PageTable`], which is parametrized over a [`Stage`] that decides the shape of the
//! table, how [`Mode`]s are encoded and how cached translations are invalidated.

mod page_table;
mod phys;

use crate::arch::TlbMaintenance;
use aarch64::mem::{AddrRange, Address, Attrs, IpAddr, Mode, TranslationLayout, VAddr};
use bitflags::bitflags;
use thiserror_no_std::Error;

pub use page_table::{Dump, PageTable, Translation};
pub use phys::PhysMapping;

/// A translation regime.
pub trait Stage: Send + 'static {
    /// The kind of address that is translated
    type Addr: Address;

    const NAME: &'static str;

    fn layout(pa_bits: u8) -> TranslationLayout;

    fn mode_to_attrs(mode: Mode) -> Attrs;

    fn attrs_to_mode(attrs: Attrs) -> Mode;

    /// Drop the cached translations of `[begin, end)`.
    ///
    /// `vmid` identifies the address space and is meaningless for stages that only exist once.
    fn invalidate(tlb: &dyn TlbMaintenance, vmid: u16, begin: u64, end: u64);
}

/// The hypervisor's own virtual address space.
#[derive(Debug)]
pub enum Stage1 {}

/// The intermediate physical address space of a VM.
#[derive(Debug)]
pub enum Stage2 {}

impl Stage for Stage1 {
    type Addr = VAddr;
    const NAME: &'static str = "stage 1";

    fn layout(pa_bits: u8) -> TranslationLayout {
        TranslationLayout::stage1(pa_bits)
    }

    fn mode_to_attrs(mode: Mode) -> Attrs {
        mode.stage1_attrs()
    }

    fn attrs_to_mode(attrs: Attrs) -> Mode {
        Mode::from_stage1_attrs(attrs)
    }

    fn invalidate(tlb: &dyn TlbMaintenance, _vmid: u16, begin: u64, end: u64) {
        tlb.invalidate_stage1(AddrRange::new(VAddr::new(begin), VAddr::new(end)));
    }
}

impl Stage for Stage2 {
    type Addr = IpAddr;
    const NAME: &'static str = "stage 2";

    fn layout(pa_bits: u8) -> TranslationLayout {
        TranslationLayout::stage2(pa_bits)
    }

    fn mode_to_attrs(mode: Mode) -> Attrs {
        mode.stage2_attrs()
    }

    fn attrs_to_mode(attrs: Attrs) -> Mode {
        Mode::from_stage2_attrs(attrs)
    }

    fn invalidate(tlb: &dyn TlbMaintenance, vmid: u16, begin: u64, end: u64) {
        tlb.invalidate_stage2(vmid, AddrRange::new(IpAddr::new(begin), IpAddr::new(end)));
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct MapFlags: u32 {
        /// Existing mappings in the target range may be replaced
        const OVERWRITE = 1 << 0;
    }
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum MapError {
    #[error("no memory is left to allocate a page table")]
    OutOfMemory,
    #[error("the range is already mapped differently")]
    Overlap,
    #[error("the range or target address is not page aligned")]
    Unaligned,
    #[error("the range exceeds what the page table can translate")]
    OutOfRange,
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum UnmapError {
    #[error("no memory is left to split a block mapping")]
    OutOfMemory,
    #[error("the range is not page aligned")]
    Unaligned,
    #[error("the range exceeds what the page table can translate")]
    OutOfRange,
}
