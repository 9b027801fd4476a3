use super::handler_trait::HypercallHandler;
use super::HypercallContext;
use crate::sched::Schedule;
use crate::vcpu::VcpuStatus;
use hypercall_abi::vcpu::{VcpuRun, VcpuRunArgs, VcpuRunReturn, VcpuYield};
use hypercall_abi::{NoValue, Status};

pub(super) struct VcpuRunHandler;

impl HypercallHandler for VcpuRunHandler {
    type Hypercall = VcpuRun;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, args: VcpuRunArgs) -> (Schedule, VcpuRunReturn) {
        let ret = ctx.hv.vcpu_run(ctx.entry, ctx.vm_id, args.vm_id, args.vcpu);
        (Schedule::Keep, ret)
    }
}

pub(super) struct VcpuYieldHandler;

impl HypercallHandler for VcpuYieldHandler {
    type Hypercall = VcpuYield;

    fn handle(&mut self, ctx: &mut HypercallContext<'_, '_>, _args: NoValue) -> (Schedule, Status) {
        // the primary has nobody to yield to
        if ctx.is_primary() {
            return (Schedule::Keep, Status::Success);
        }
        (Schedule::to_primary(VcpuStatus::Ready), Status::Success)
    }
}
