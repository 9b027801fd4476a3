use aarch64::regs::ArchRegs;

/// The scheduling state of a vCPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VcpuStatus {
    /// Can be run by the primary
    Ready,
    /// Currently executing guest code or a hypercall on a physical CPU
    Running,
    /// Executed `wfi` and waits for the primary to run it again
    BlockedWaitingForInterrupt,
    /// Waits for a message to arrive in its VM's mailbox
    BlockedWaitingForMessage,
    /// Hit an exception the hypervisor cannot handle and will never run again
    Aborted,
}

/// A virtual CPU of a VM.
#[derive(Debug)]
pub struct VCpu {
    pub regs: ArchRegs,
    pub status: VcpuStatus,
    vm_id: u32,
    index: u16,
}

impl VCpu {
    pub fn new(vm_id: u32, index: u16, entry: u64, arg: u64) -> Self {
        Self {
            regs: ArchRegs::new(entry, arg),
            status: VcpuStatus::Ready,
            vm_id,
            index,
        }
    }

    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}
