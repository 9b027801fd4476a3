use super::handler_trait::HypercallHandler;
use super::HypercallContext;
use crate::sched::Schedule;
use aarch64::mem::IpAddr;
use hypercall_abi::vm::{VcpuGetCount, VcpuGetCountArgs, VcpuGetCountReturn, VmConfigure, VmConfigureArgs, VmGetCount, VmGetId};
use hypercall_abi::{NoValue, Status};

pub(super) struct VmGetIdHandler;

impl HypercallHandler for VmGetIdHandler {
    type Hypercall = VmGetId;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, _args: NoValue) -> (Schedule, u32) {
        (Schedule::Keep, ctx.vm_id)
    }
}

pub(super) struct VmGetCountHandler;

impl HypercallHandler for VmGetCountHandler {
    type Hypercall = VmGetCount;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, _args: NoValue) -> (Schedule, u32) {
        (Schedule::Keep, ctx.hv.vm_count())
    }
}

pub(super) struct VcpuGetCountHandler;

impl HypercallHandler for VcpuGetCountHandler {
    type Hypercall = VcpuGetCount;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, args: VcpuGetCountArgs) -> (Schedule, VcpuGetCountReturn) {
        let count = match ctx.hv.vm(args.vm_id) {
            Some(vm) => VcpuGetCountReturn::Count(vm.vcpu_count() as u32),
            None => VcpuGetCountReturn::InvalidVm,
        };
        (Schedule::Keep, count)
    }
}

pub(super) struct VmConfigureHandler;

impl HypercallHandler for VmConfigureHandler {
    type Hypercall = VmConfigure;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, args: VmConfigureArgs) -> (Schedule, Status) {
        let result = ctx
            .hv
            .configure_mailbox(ctx.vm_id, IpAddr::new(args.send), IpAddr::new(args.recv));
        if let Err(e) = &result {
            log::warn!("vm {} could not configure its mailbox: {e}", ctx.vm_id);
        }
        (Schedule::Keep, result.into())
    }
}
