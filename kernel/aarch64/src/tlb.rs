//! TLB maintenance and translation regime control
//!
//! The instruction sequences only exist when compiling for aarch64.
//! Other targets (e.g. the host running unit tests) have to provide their own implementation of the hypervisor's
//! TLB capability.

#[cfg(target_arch = "aarch64")]
use crate::mem::{IpAddr, PAddr, VAddr, PAGE_BITS};
#[cfg(target_arch = "aarch64")]
use core::arch::asm;

/// The bit position of the VMID inside of `VTTBR_EL2`.
pub const VTTBR_VMID_SHIFT: u32 = 48;

/// Compute the `VTTBR_EL2` value that activates the stage 2 table at `root` for `vmid`.
pub const fn vttbr_value(vmid: u16, root: u64) -> u64 {
    root | ((vmid as u64) << VTTBR_VMID_SHIFT)
}

/// Invalidate the stage 1 translations of every page in `[begin, end)` of the hypervisor's address space.
///
/// # Safety
/// Must be called at EL2.
#[cfg(target_arch = "aarch64")]
pub unsafe fn invalidate_stage1_range(begin: VAddr, end: VAddr) {
    let begin = begin.raw() >> PAGE_BITS;
    let end = end.raw() >> PAGE_BITS;

    // make sure that all previous page table writes are visible to the walker
    asm!("dsb ishst", options(nostack, preserves_flags));
    for page in begin..end {
        asm!("tlbi vae2is, {}", in(reg) page, options(nostack, preserves_flags));
    }
    asm!("dsb ish", "isb", options(nostack, preserves_flags));
}

/// Invalidate the stage 2 translations of every page in `[begin, end)` of the address space identified by `vmid`.
///
/// The stage 1 translations cached for that VM are dropped entirely because they may have been combined with the
/// now stale stage 2 entries.
///
/// # Safety
/// Must be called at EL2 while no VM is executing on this core.
#[cfg(target_arch = "aarch64")]
pub unsafe fn invalidate_stage2_range(vmid: u16, begin: IpAddr, end: IpAddr) {
    let begin = begin.raw() >> PAGE_BITS;
    let end = end.raw() >> PAGE_BITS;

    // TLBI by IPA operates on the VMID that is currently loaded
    let saved_vttbr: u64;
    asm!("mrs {}, vttbr_el2", out(reg) saved_vttbr, options(nostack, preserves_flags));
    asm!(
        "msr vttbr_el2, {}",
        "isb",
        in(reg) vttbr_value(vmid, 0),
        options(nostack, preserves_flags)
    );

    asm!("dsb ishst", options(nostack, preserves_flags));
    for page in begin..end {
        asm!("tlbi ipas2e1is, {}", in(reg) page, options(nostack, preserves_flags));
    }
    asm!("dsb ish", options(nostack, preserves_flags));
    asm!("tlbi vmalle1is", "dsb ish", options(nostack, preserves_flags));

    asm!(
        "msr vttbr_el2, {}",
        "isb",
        in(reg) saved_vttbr,
        options(nostack, preserves_flags)
    );
}

/// Make the stage 2 table at `root` the active translation for `vmid`.
///
/// # Safety
/// The table must stay valid for as long as it is installed and must only map memory owned by that VM.
#[cfg(target_arch = "aarch64")]
pub unsafe fn set_vm(vmid: u16, root: PAddr) {
    asm!(
        "msr vttbr_el2, {}",
        "isb",
        in(reg) vttbr_value(vmid, root.raw()),
        options(nostack, preserves_flags)
    );
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vttbr_places_vmid_in_upper_bits() {
        assert_eq!(vttbr_value(3, 0x8000_0000), 0x0003_0000_8000_0000);
    }
}
