mod common;

use common::*;
use hypercall_abi::vcpu::{VcpuRun, VcpuRunArgs, VcpuRunReturn, VcpuYield};
use hypercall_abi::vm::{VcpuGetCount, VcpuGetCountArgs, VcpuGetCountReturn, VmGetCount, VmGetId};
use hypercall_abi::{HypercallBinding, NoValue, Status, HYPERCALL_FAILURE};
use hypervisor::config::VmSpec;
use hypervisor::sched::Trap;
use hypervisor::vcpu::VcpuStatus;

fn run(primary: &mut Primary<'_>, guests: &mut Guests, vm_id: u32, vcpu: u32) -> VcpuRunReturn {
    primary.call::<VcpuRun>(guests, VcpuRunArgs { vm_id, vcpu })
}

fn status(hv: &hypervisor::Hypervisor, vm_id: u32, vcpu: usize) -> VcpuStatus {
    hv.vm(vm_id).unwrap().vcpu(vcpu).unwrap().spin_lock().status
}

#[test]
fn primary_queries_ids_and_counts() {
    let mut machine = Machine::new();
    let hv = machine.boot(&[VmSpec::new(1, VM_MEMORY), VmSpec::new(3, VM_MEMORY)]);
    let mut guests = Guests::default();
    let mut primary = Primary::new(&hv);

    assert_eq!(primary.call::<VmGetId>(&mut guests, NoValue), 0);
    assert_eq!(primary.call::<VmGetCount>(&mut guests, NoValue), 3);
    for (vm_id, count) in [(0, 1), (1, 1), (2, 3)] {
        assert_eq!(
            primary.call::<VcpuGetCount>(&mut guests, VcpuGetCountArgs { vm_id }),
            VcpuGetCountReturn::Count(count)
        );
    }
    assert_eq!(
        primary.call::<VcpuGetCount>(&mut guests, VcpuGetCountArgs { vm_id: 0xffff_ffff }),
        VcpuGetCountReturn::InvalidVm
    );
    assert_eq!(
        primary.raw_call(&mut guests, VcpuGetCount::HYPERCALL_NO, [1 << 40, 0, 0]),
        HYPERCALL_FAILURE
    );
}

#[test]
fn unknown_hypercalls_fail() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(1);
    let (script, results) = Script::new([Step::Call(0x1234, [1, 2, 3])]);
    let mut guests = Guests::default().with(1, script);
    let mut primary = Primary::new(&hv);

    assert_eq!(primary.raw_call(&mut guests, 0xdead, [0; 3]), HYPERCALL_FAILURE);
    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(*results.borrow(), vec![HYPERCALL_FAILURE]);
}

#[test]
fn secondary_sees_its_own_id() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(2);
    let (script, results) = Script::new([
        Step::Call(VmGetId::HYPERCALL_NO, [0; 3]),
        Step::Call(VmGetCount::HYPERCALL_NO, [0; 3]),
        Step::Call(VcpuGetCount::HYPERCALL_NO, [0, 0, 0]),
    ]);
    let mut guests = Guests::default().with(2, script);
    let mut primary = Primary::new(&hv);

    assert_eq!(run(&mut primary, &mut guests, 2, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(*results.borrow(), vec![2, 3, 1]);
}

#[test]
fn run_rejects_what_cannot_be_run() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(1);
    let mut guests = Guests::default();
    let mut primary = Primary::new(&hv);

    // the primary itself, unknown vms and unknown vcpus
    assert_eq!(run(&mut primary, &mut guests, 0, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(run(&mut primary, &mut guests, 1234, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(run(&mut primary, &mut guests, 1, 1234), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(guests.resumes_of(1), 0);

    // a vcpu that is busy elsewhere
    {
        let _busy = hv.vm(1).unwrap().vcpu(0).unwrap().spin_lock();
        assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    }
    assert_eq!(guests.resumes_of(1), 0);
}

#[test]
fn only_the_primary_runs_vcpus() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(2);
    let (script, results) = Script::new([Step::Call(VcpuRun::HYPERCALL_NO, [2, 0, 0])]);
    let mut guests = Guests::default().with(1, script);
    let mut primary = Primary::new(&hv);

    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(*results.borrow(), vec![u64::from(VcpuRunReturn::WaitForInterrupt)]);
    assert_eq!(guests.resumes_of(2), 0);
    assert_eq!(status(&hv, 2, 0), VcpuStatus::Ready);
}

#[test]
fn wait_for_interrupt_blocks_until_the_next_run() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(1);
    let (script, _) = Script::new([Step::Trap(Trap::WaitForInterrupt)]);
    let mut guests = Guests::default().with(1, script);
    let mut primary = Primary::new(&hv);

    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(status(&hv, 1, 0), VcpuStatus::BlockedWaitingForInterrupt);

    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(guests.resumes_of(1), 2);
}

#[test]
fn yield_returns_to_the_primary() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(1);
    let (script, results) = Script::new([
        Step::Call(VcpuYield::HYPERCALL_NO, [0; 3]),
        Step::Trap(Trap::Yield),
    ]);
    let mut guests = Guests::default().with(1, script);
    let mut primary = Primary::new(&hv);

    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(status(&hv, 1, 0), VcpuStatus::Ready);
    assert_eq!(guests.resumes_of(1), 1);

    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(status(&hv, 1, 0), VcpuStatus::Ready);
    assert_eq!(*results.borrow(), vec![u64::from(Status::Success)]);

    // yielding as the primary is a no-op
    assert_eq!(primary.call::<VcpuYield>(&mut guests, NoValue), Status::Success);
}

#[test]
fn aborted_vcpus_never_run_again() {
    let mut machine = Machine::new();
    let hv = machine.boot_secondaries(1);
    let (script, _) = Script::new([Step::Trap(Trap::Abort)]);
    let mut guests = Guests::default().with(1, script);
    let mut primary = Primary::new(&hv);

    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(status(&hv, 1, 0), VcpuStatus::Aborted);
    assert_eq!(run(&mut primary, &mut guests, 1, 0), VcpuRunReturn::WaitForInterrupt);
    assert_eq!(guests.resumes_of(1), 1);
}

#[test]
fn secondaries_start_at_their_memory() {
    let mut machine = Machine::new();
    let hv = machine.boot(&[VmSpec::new(2, VM_MEMORY)]);
    let vm = hv.vm(1).unwrap();

    for (index, lock) in vm.vcpus().enumerate() {
        let vcpu = lock.spin_lock();
        assert_eq!((vcpu.vm_id(), vcpu.index()), (1, index as u16));
        assert_eq!(vcpu.regs.pc, vm.memory().begin.raw());
        assert_eq!(vcpu.regs.retval(), VM_MEMORY);
        assert_eq!(vcpu.status, VcpuStatus::Ready);
    }
    let primary = hv.vm(0).unwrap().vcpu(0).unwrap().spin_lock();
    assert_eq!(primary.regs.pc, 0);
    assert_eq!(primary.regs.retval(), machine.platform.params.kernel_arg);
}
