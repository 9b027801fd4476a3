//! Running vCPUs of secondary VMs on behalf of the primary
//!
//! The primary VM is the scheduler of the system.
//! It donates its physical CPU to a secondary vCPU by calling `vcpu_run` and gets the CPU back once the vCPU blocks,
//! yields or has something to report.

use crate::hypervisor::Hypervisor;
use crate::vcpu::VcpuStatus;
use crate::vm::Vm;
use aarch64::regs::ArchRegs;
use hypercall_abi::mailbox::MailboxReceiveReturn;
use hypercall_abi::vcpu::VcpuRunReturn;
use hypercall_abi::PRIMARY_VM_ID;

/// Why a guest stopped executing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trap {
    /// The guest issued `hvc`, the registers hold the hypercall
    Hypercall,
    /// The guest executed `wfi`
    WaitForInterrupt,
    /// The guest executed `wfe` or `yield`
    Yield,
    /// The guest caused an exception that cannot be handled
    Abort,
}

/// Switching into a guest and back.
///
/// On hardware this restores `regs`, performs an exception return into the VM and saves the registers again once the
/// next exception is taken to the hypervisor.
pub trait GuestEntry {
    fn resume(&mut self, vm: &Vm, vcpu: u16, regs: &mut ArchRegs) -> Trap;
}

/// What happens with the calling vCPU after a hypercall or trap was handled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Schedule {
    /// Keep executing the caller
    Keep,
    /// Stop executing the caller, put it into `status` and hand `ret` to the primary
    Switch { status: VcpuStatus, ret: VcpuRunReturn },
}

impl Schedule {
    /// Give control back to the primary without anything to report.
    pub const fn to_primary(status: VcpuStatus) -> Self {
        Schedule::Switch {
            status,
            ret: VcpuRunReturn::WaitForInterrupt,
        }
    }
}

impl Hypervisor {
    /// Run vCPU `index` of VM `vm_id` on behalf of `caller` until it has to return to the primary.
    ///
    /// Only the primary may run vCPUs, and only those of secondaries.
    /// Every request that cannot be fulfilled is answered with [`VcpuRunReturn::WaitForInterrupt`].
    pub fn vcpu_run(&self, entry: &mut dyn GuestEntry, caller: u32, vm_id: u32, index: u32) -> VcpuRunReturn {
        if caller != PRIMARY_VM_ID {
            log::warn!("vm {caller} tried to run vcpu {index} of vm {vm_id}");
            return VcpuRunReturn::WaitForInterrupt;
        }
        let Some(vm) = self.vm(vm_id).filter(|vm| !vm.is_primary()) else {
            return VcpuRunReturn::WaitForInterrupt;
        };
        let Some(lock) = vm.vcpu(index as usize) else {
            return VcpuRunReturn::WaitForInterrupt;
        };
        let Ok(mut vcpu) = lock.try_lock() else {
            log::debug!("vcpu {index} of vm {vm_id} is already running elsewhere");
            return VcpuRunReturn::WaitForInterrupt;
        };

        match vcpu.status {
            VcpuStatus::Running | VcpuStatus::Aborted => return VcpuRunReturn::WaitForInterrupt,
            VcpuStatus::BlockedWaitingForMessage => {
                let message = vm.mailbox().spin_lock().receive_return();
                return match message {
                    MailboxReceiveReturn::Message { sender, size } => {
                        vcpu.regs.set_retval(message.into());
                        vcpu.status = VcpuStatus::Ready;
                        VcpuRunReturn::Message { sender, size }
                    }
                    MailboxReceiveReturn::Empty => VcpuRunReturn::WaitForInterrupt,
                };
            }
            VcpuStatus::Ready | VcpuStatus::BlockedWaitingForInterrupt => {}
        }

        vcpu.status = VcpuStatus::Running;
        vm.ptable().spin_lock().activate();
        let index = vcpu.index();
        log::trace!("running vcpu {index} of vm {vm_id} at {:#x}", vcpu.regs.pc);

        loop {
            let trap = entry.resume(vm, index, &mut vcpu.regs);
            let schedule = match trap {
                Trap::Hypercall => self.handle_hypercall(entry, vm_id, index, &mut vcpu.regs),
                Trap::WaitForInterrupt => Schedule::to_primary(VcpuStatus::BlockedWaitingForInterrupt),
                Trap::Yield => Schedule::to_primary(VcpuStatus::Ready),
                Trap::Abort => {
                    log::warn!("vcpu {index} of vm {vm_id} aborted at {:#x}", vcpu.regs.pc);
                    Schedule::to_primary(VcpuStatus::Aborted)
                }
            };

            if let Schedule::Switch { status, ret } = schedule {
                log::trace!("vcpu {index} of vm {vm_id} stops as {status:?} with {ret:?}");
                vcpu.status = status;
                return ret;
            }
        }
    }
}
