//! VMs and the resources they own

use crate::config::{MAX_CPUS, MAX_VMS};
use crate::mailbox::Mailbox;
use crate::memrange::MemRangeError;
use crate::mm::{MapError, PageTable, Stage2};
use crate::vcpu::VCpu;
use aarch64::mem::{AddrRange, PAddr};
use hypercall_abi::PRIMARY_VM_ID;
use ksync::SpinLock;
use thiserror_no_std::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum VmError {
    #[error("no more than {MAX_VMS} vms can exist")]
    TooManyVms,
    #[error("a vm needs between 1 and {MAX_CPUS} vcpus but {0} were requested")]
    InvalidVcpuCount(usize),
    #[error("vm memory must be a non-zero multiple of the page size")]
    InvalidMemorySize,
    #[error("could not allocate vm memory: {0}")]
    Memory(#[from] MemRangeError),
    #[error("could not map vm memory: {0}")]
    Map(#[from] MapError),
}

/// A virtual machine.
///
/// Each resource is guarded by its own lock.
/// When more than one of them is needed at a time they are locked in the order vCPU, mailbox, page table.
#[derive(Debug)]
pub struct Vm {
    id: u32,
    vcpu_count: usize,
    vcpus: [SpinLock<VCpu>; MAX_CPUS],
    ptable: SpinLock<PageTable<Stage2>>,
    mailbox: SpinLock<Mailbox>,
    /// The physical memory that was allocated for the VM, empty for the primary
    memory: AddrRange<PAddr>,
}

impl Vm {
    /// Assemble a VM whose vCPUs all start at `entry` with `arg` in their first register.
    pub fn new(
        id: u32,
        vcpu_count: usize,
        ptable: PageTable<Stage2>,
        memory: AddrRange<PAddr>,
        entry: u64,
        arg: u64,
    ) -> Result<Self, VmError> {
        if vcpu_count == 0 || vcpu_count > MAX_CPUS {
            return Err(VmError::InvalidVcpuCount(vcpu_count));
        }

        log::debug!("creating vm {id} with {vcpu_count} vcpus and {memory:?} as memory");
        Ok(Self {
            id,
            vcpu_count,
            vcpus: core::array::from_fn(|i| SpinLock::new(VCpu::new(id, i as u16, entry, arg))),
            ptable: SpinLock::new(ptable),
            mailbox: SpinLock::new(Mailbox::new()),
            memory,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_primary(&self) -> bool {
        self.id == PRIMARY_VM_ID
    }

    pub fn vcpu_count(&self) -> usize {
        self.vcpu_count
    }

    pub fn vcpu(&self, index: usize) -> Option<&SpinLock<VCpu>> {
        self.vcpus[..self.vcpu_count].get(index)
    }

    pub fn vcpus(&self) -> impl Iterator<Item = &SpinLock<VCpu>> {
        self.vcpus[..self.vcpu_count].iter()
    }

    pub fn ptable(&self) -> &SpinLock<PageTable<Stage2>> {
        &self.ptable
    }

    pub fn mailbox(&self) -> &SpinLock<Mailbox> {
        &self.mailbox
    }

    pub fn memory(&self) -> AddrRange<PAddr> {
        self.memory
    }

    /// Free the VM's page tables.
    pub fn destroy(self) {
        log::debug!("destroying vm {}", self.id);
        self.ptable.into_inner().destroy();
    }
}
