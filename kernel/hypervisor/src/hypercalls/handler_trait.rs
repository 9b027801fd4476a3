use super::HypercallContext;
use crate::sched::Schedule;
use hypercall_abi::{HypercallBinding, RawHypercallArgs, HYPERCALL_FAILURE};

/// A trait for handling a specific hypercall in the most bare-bones way possible.
///
/// Argument decoding and encoding of the result is entirely left up to the implementation.
pub(super) trait RawHypercallHandler {
    type Hypercall: HypercallBinding;

    fn handle_raw(&mut self, ctx: &mut HypercallContext<'_, '_>, raw_args: RawHypercallArgs) -> (Schedule, u64);
}

/// A trait for handling most hypercalls.
///
/// The `RawHypercallHandler` auto-implementation on top of this guarantees the following:
/// 1. Decode hypercall specific arguments from `RawHypercallArgs` and log them
/// 2. *Execute this handler*
/// 3. Log the result and encode it for the return register
///
/// Arguments that cannot be decoded fail the hypercall without executing the handler.
pub(super) trait HypercallHandler {
    type Hypercall: HypercallBinding;

    fn handle(
        &mut self,
        ctx: &mut HypercallContext<'_, '_>,
        args: <<Self as HypercallHandler>::Hypercall as HypercallBinding>::CallArgs,
    ) -> (
        Schedule,
        <<Self as HypercallHandler>::Hypercall as HypercallBinding>::Return,
    );
}

impl<Handler: HypercallHandler> RawHypercallHandler for Handler {
    type Hypercall = <Handler as HypercallHandler>::Hypercall;

    fn handle_raw(&mut self, ctx: &mut HypercallContext<'_, '_>, raw_args: RawHypercallArgs) -> (Schedule, u64) {
        // parse hypercall arguments
        let Ok(args) = <Handler::Hypercall as HypercallBinding>::CallArgs::try_from(raw_args) else {
            log::warn!(
                "vm {} called {} with undecodable args {:x?}",
                ctx.vm_id,
                core::any::type_name::<Handler::Hypercall>(),
                raw_args
            );
            return (Schedule::Keep, HYPERCALL_FAILURE);
        };

        // execute the handler
        log::trace!(
            "handling {} hypercall of vcpu {} of vm {} with args {:x?}",
            core::any::type_name::<Handler::Hypercall>(),
            ctx.vcpu,
            ctx.vm_id,
            args
        );
        let (schedule, result) = self.handle(ctx, args);
        log::trace!(
            "{} hypercall result is {:x?} with new schedule {:?}",
            core::any::type_name::<Handler::Hypercall>(),
            result,
            schedule
        );

        (schedule, result.into())
    }
}
