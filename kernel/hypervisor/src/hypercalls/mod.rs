//! Dispatching of hypercalls to their handlers
//!
//! Each hypercall of [`hypercall_abi`] has a handler here that implements it on top of the [`Hypervisor`].
//! Unknown hypercall numbers are logged and answered with `-1`.

mod handler_trait;
mod mailbox;
mod vcpu;
mod vm;

use crate::hypercalls::handler_trait::RawHypercallHandler;
use crate::hypercalls::mailbox::{MailboxClearHandler, MailboxReceiveHandler, MailboxSendHandler};
use crate::hypercalls::vcpu::{VcpuRunHandler, VcpuYieldHandler};
use crate::hypercalls::vm::{VcpuGetCountHandler, VmConfigureHandler, VmGetCountHandler, VmGetIdHandler};
use crate::hypervisor::Hypervisor;
use crate::sched::{GuestEntry, Schedule};
use aarch64::regs::ArchRegs;
use hypercall_abi::mailbox::{MailboxClear, MailboxReceive, MailboxSend};
use hypercall_abi::vcpu::{VcpuRun, VcpuYield};
use hypercall_abi::vm::{VcpuGetCount, VmConfigure, VmGetCount, VmGetId};
use hypercall_abi::{HypercallBinding, HYPERCALL_FAILURE};

/// Everything a handler knows about the call it is handling.
pub(self) struct HypercallContext<'hv, 'entry> {
    pub hv: &'hv Hypervisor,
    /// How guests are entered, needed when the primary runs a vCPU
    pub entry: &'entry mut dyn GuestEntry,
    /// The calling VM
    pub vm_id: u32,
    /// The calling vCPU
    pub vcpu: u16,
}

impl HypercallContext<'_, '_> {
    fn is_primary(&self) -> bool {
        self.vm_id == hypercall_abi::PRIMARY_VM_ID
    }
}

impl Hypervisor {
    /// Handle a hypercall that vCPU `vcpu` of VM `vm_id` made.
    ///
    /// The hypercall is read from `regs` and its result is written back into them.
    /// The returned [`Schedule`] tells whether the calling vCPU can continue running.
    pub fn handle_hypercall(
        &self,
        entry: &mut dyn GuestEntry,
        vm_id: u32,
        vcpu: u16,
        regs: &mut ArchRegs,
    ) -> Schedule {
        let hypercall_no = regs.hypercall_number();
        let raw_args = regs.hypercall_args();
        let mut ctx = HypercallContext {
            hv: self,
            entry,
            vm_id,
            vcpu,
        };

        let (schedule, ret) = match hypercall_no {
            VmGetId::HYPERCALL_NO => VmGetIdHandler.handle_raw(&mut ctx, raw_args),
            VmGetCount::HYPERCALL_NO => VmGetCountHandler.handle_raw(&mut ctx, raw_args),
            VcpuGetCount::HYPERCALL_NO => VcpuGetCountHandler.handle_raw(&mut ctx, raw_args),
            VmConfigure::HYPERCALL_NO => VmConfigureHandler.handle_raw(&mut ctx, raw_args),

            VcpuRun::HYPERCALL_NO => VcpuRunHandler.handle_raw(&mut ctx, raw_args),
            VcpuYield::HYPERCALL_NO => VcpuYieldHandler.handle_raw(&mut ctx, raw_args),

            MailboxSend::HYPERCALL_NO => MailboxSendHandler.handle_raw(&mut ctx, raw_args),
            MailboxReceive::HYPERCALL_NO => MailboxReceiveHandler.handle_raw(&mut ctx, raw_args),
            MailboxClear::HYPERCALL_NO => MailboxClearHandler.handle_raw(&mut ctx, raw_args),

            _ => {
                log::warn!(
                    "received unknown hypercall {:#x} with args {:x?} from vcpu {} of vm {}",
                    hypercall_no,
                    raw_args,
                    vcpu,
                    vm_id
                );
                (Schedule::Keep, HYPERCALL_FAILURE)
            }
        };

        regs.set_retval(ret);
        schedule
    }
}
