use super::handler_trait::HypercallHandler;
use super::HypercallContext;
use crate::mailbox::MailboxState;
use crate::sched::Schedule;
use crate::vcpu::VcpuStatus;
use hypercall_abi::mailbox::{
    MailboxClear, MailboxReceive, MailboxReceiveArgs, MailboxReceiveReturn, MailboxSend, MailboxSendArgs,
};
use hypercall_abi::vcpu::VcpuRunReturn;
use hypercall_abi::{NoValue, Status, PRIMARY_VM_ID};

pub(super) struct MailboxSendHandler;

impl HypercallHandler for MailboxSendHandler {
    type Hypercall = MailboxSend;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, args: MailboxSendArgs) -> (Schedule, Status) {
        let woken = match ctx.hv.mailbox_send(ctx.vm_id, args.target, args.size as usize) {
            Ok(woken) => woken,
            Err(e) => {
                log::warn!("vm {} could not send to vm {}: {e}", ctx.vm_id, args.target);
                return (Schedule::Keep, Status::Failure);
            }
        };

        // the primary learns about messages for itself or others through the vcpu it runs
        let schedule = if ctx.is_primary() {
            Schedule::Keep
        } else if args.target == PRIMARY_VM_ID {
            Schedule::Switch {
                status: VcpuStatus::Ready,
                ret: VcpuRunReturn::Message {
                    sender: ctx.vm_id,
                    size: args.size,
                },
            }
        } else if let Some(vcpu) = woken {
            Schedule::Switch {
                status: VcpuStatus::Ready,
                ret: VcpuRunReturn::WakeUp {
                    vm_id: args.target,
                    vcpu,
                },
            }
        } else {
            Schedule::Keep
        };
        (schedule, Status::Success)
    }
}

pub(super) struct MailboxReceiveHandler;

impl HypercallHandler for MailboxReceiveHandler {
    type Hypercall = MailboxReceive;

    fn handle(
        &mut self,
        ctx: &mut HypercallContext<'_, '_>,
        args: MailboxReceiveArgs,
    ) -> (Schedule, MailboxReceiveReturn) {
        match ctx.hv.mailbox_receive(ctx.vm_id) {
            Ok(MailboxState::Full { sender, size }) => {
                (Schedule::Keep, MailboxReceiveReturn::Message { sender, size })
            }
            // the primary never blocks, it receives messages through vcpu_run
            Ok(MailboxState::Empty) if args.blocking && !ctx.is_primary() => (
                Schedule::to_primary(VcpuStatus::BlockedWaitingForMessage),
                MailboxReceiveReturn::Empty,
            ),
            Ok(MailboxState::Empty) => (Schedule::Keep, MailboxReceiveReturn::Empty),
            Err(e) => {
                log::warn!("vm {} could not receive: {e}", ctx.vm_id);
                (Schedule::Keep, MailboxReceiveReturn::Empty)
            }
        }
    }
}

pub(super) struct MailboxClearHandler;

impl HypercallHandler for MailboxClearHandler {
    type Hypercall = MailboxClear;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, _args: NoValue) -> (Schedule, Status) {
        let result = ctx.hv.mailbox_clear(ctx.vm_id);
        if let Err(e) = &result {
            log::warn!("vm {} could not clear its mailbox: {e}", ctx.vm_id);
        }
        (Schedule::Keep, result.into())
    }
}
