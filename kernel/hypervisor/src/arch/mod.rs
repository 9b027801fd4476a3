//! Architecture capabilities the hypervisor core depends on
//!
//! The page-table engine and the scheduler never execute architecture specific instructions themselves.
//! They go through [`TlbMaintenance`] which is implemented by [`Aarch64Tlb`] on real hardware and by
//! [`RecordingTlb`] everywhere else.

mod fake;

use aarch64::mem::{AddrRange, IpAddr, PAddr, VAddr};
pub use fake::{RecordingTlb, TlbEvent};

/// Maintenance of cached translations and selection of the active stage 2 address space.
pub trait TlbMaintenance: Sync {
    /// Drop cached translations of the hypervisor's own address space in `range`.
    fn invalidate_stage1(&self, range: AddrRange<VAddr>);

    /// Drop cached translations of VM `vmid` in `range`.
    fn invalidate_stage2(&self, vmid: u16, range: AddrRange<IpAddr>);

    /// Make the stage 2 table rooted at `root` the active translation for `vmid`.
    fn set_address_space(&self, vmid: u16, root: PAddr);
}

/// The TLB capability of the CPU the hypervisor is executing on.
#[derive(Debug, Default, Copy, Clone)]
pub struct Aarch64Tlb;

#[cfg(target_arch = "aarch64")]
impl TlbMaintenance for Aarch64Tlb {
    fn invalidate_stage1(&self, range: AddrRange<VAddr>) {
        unsafe { aarch64::tlb::invalidate_stage1_range(range.begin, range.end) }
    }

    fn invalidate_stage2(&self, vmid: u16, range: AddrRange<IpAddr>) {
        unsafe { aarch64::tlb::invalidate_stage2_range(vmid, range.begin, range.end) }
    }

    fn set_address_space(&self, vmid: u16, root: PAddr) {
        unsafe { aarch64::tlb::set_vm(vmid, root) }
    }
}
