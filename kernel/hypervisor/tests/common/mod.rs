#![allow(dead_code)]

use aarch64::mem::{AddrRange, MemoryPage, PAddr, PAGESIZE};
use aarch64::regs::ArchRegs;
use allocators::PagePool;
use hypercall_abi::mailbox::{
    MailboxClear, MailboxReceive, MailboxReceiveArgs, MailboxReceiveReturn, MailboxSend, MailboxSendArgs,
};
use hypercall_abi::vm::{VmConfigure, VmConfigureArgs};
use hypercall_abi::{HypercallBinding, NoValue, Status, PRIMARY_VM_ID};
use hypervisor::arch::RecordingTlb;
use hypervisor::boot_params::{BootError, BootParams, BootParamsUpdate, HypervisorImage, MemRanges, Platform};
use hypervisor::config::{HypervisorConfig, VmSpec};
use hypervisor::mm::PhysMapping;
use hypervisor::sched::{GuestEntry, Schedule, Trap};
use hypervisor::vm::Vm;
use hypervisor::{Environment, Hypervisor};
use klog::{Console, KernelLogger};
use log::Level;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Once;

pub const MACHINE_PAGES: usize = 2048;
pub const POOL_PAGES: usize = 128;
pub const INITRD_PAGE: usize = 16;
pub const INITRD_PAGES: usize = 4;
pub const VM_MEMORY: u64 = 16 * PAGESIZE as u64;

struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_str(&self, s: &str) {
        print!("{s}");
    }
}

static LOGGER: KernelLogger<StdoutConsole> = KernelLogger::new(Level::Debug, StdoutConsole);

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| hypervisor::logging::init(&LOGGER, Level::Debug).unwrap());
}

/// A platform that reports a fixed set of boot parameters and remembers the update it was given.
pub struct FakePlatform {
    pub params: BootParams,
    pub update: Option<BootParamsUpdate>,
    pub accept_update: bool,
}

impl Platform for FakePlatform {
    fn get_boot_params(&mut self) -> Result<BootParams, BootError> {
        Ok(self.params)
    }

    fn update_boot_params(&mut self, update: &BootParamsUpdate) -> bool {
        self.update = Some(*update);
        self.accept_update
    }
}

/// Host memory posing as the physical memory of a machine.
pub struct Machine {
    pub memory: AddrRange<PAddr>,
    pub initrd: AddrRange<PAddr>,
    pub pool: &'static PagePool,
    pub tlb: &'static RecordingTlb,
    pub platform: FakePlatform,
}

fn page_at(base: PAddr, page: usize) -> PAddr {
    base.add((page * PAGESIZE) as u64)
}

impl Machine {
    pub fn new() -> Self {
        init_logging();
        let pages = Box::leak(vec![MemoryPage::default(); MACHINE_PAGES].into_boxed_slice());
        let begin = PAddr::new(pages.as_ptr() as u64);
        let memory = AddrRange::from_len(begin, (MACHINE_PAGES * PAGESIZE) as u64);
        let initrd = AddrRange::new(
            page_at(begin, INITRD_PAGE),
            page_at(begin, INITRD_PAGE + INITRD_PAGES),
        );

        Self {
            memory,
            initrd,
            pool: Box::leak(Box::new(PagePool::new())),
            tlb: Box::leak(Box::new(RecordingTlb::new())),
            platform: FakePlatform {
                params: BootParams {
                    mem_ranges: MemRanges::from_slice(&[memory]).unwrap(),
                    image: HypervisorImage::default(),
                    initrd,
                    kernel_arg: 0x1234,
                },
                update: None,
                accept_update: true,
            },
        }
    }

    /// Pretend that the hypervisor was loaded into the pages in front of the initrd.
    pub fn load_image(&mut self) -> HypervisorImage {
        let base = self.memory.begin;
        let image = HypervisorImage {
            text: AddrRange::new(page_at(base, 4), page_at(base, 7)),
            rodata: AddrRange::new(page_at(base, 7), page_at(base, 9)),
            data: AddrRange::new(page_at(base, 9), page_at(base, 12)),
        };
        self.platform.params.image = image;
        image
    }

    pub fn config() -> HypervisorConfig {
        HypervisorConfig::default()
            .pool_pages(POOL_PAGES)
            .vm_alignment(PAGESIZE as u64)
            .log_level(Level::Debug)
    }

    pub fn env(&self) -> Environment {
        Environment {
            phys_map: PhysMapping::identity(),
            pool: self.pool,
            tlb: self.tlb,
        }
    }

    pub fn try_boot(&mut self, secondaries: &[VmSpec]) -> Result<Hypervisor, BootError> {
        self.try_boot_with(Self::config(), secondaries)
    }

    pub fn try_boot_with(&mut self, config: HypervisorConfig, secondaries: &[VmSpec]) -> Result<Hypervisor, BootError> {
        let env = self.env();
        Hypervisor::boot(&mut self.platform, config, env, 1, secondaries)
    }

    pub fn boot(&mut self, secondaries: &[VmSpec]) -> Hypervisor {
        self.try_boot(secondaries).unwrap()
    }

    /// Boot with `count` secondaries that each have one vCPU.
    pub fn boot_secondaries(&mut self, count: usize) -> Hypervisor {
        let specs = vec![VmSpec::new(1, VM_MEMORY); count];
        self.boot(&specs)
    }

    /// Pages at the very end of the machine's memory are always left to the primary.
    pub fn primary_send_page(&self) -> PAddr {
        PAddr::new(self.memory.end.raw() - 2 * PAGESIZE as u64)
    }

    pub fn primary_recv_page(&self) -> PAddr {
        PAddr::new(self.memory.end.raw() - PAGESIZE as u64)
    }
}

pub fn write_page(page: PAddr, data: &[u8]) {
    assert!(data.len() <= PAGESIZE);
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), page.raw() as *mut u8, data.len()) };
}

pub fn read_page(page: PAddr, len: usize) -> Vec<u8> {
    assert!(len <= PAGESIZE);
    unsafe { std::slice::from_raw_parts(page.raw() as *const u8, len) }.to_vec()
}

/// Load the registers with a hypercall the way a guest would before executing `hvc`.
pub fn issue<H: HypercallBinding>(regs: &mut ArchRegs, args: H::CallArgs) -> Trap {
    let raw: [u64; 3] = args.into();
    regs.x[0] = H::HYPERCALL_NO;
    regs.x[1..4].copy_from_slice(&raw);
    Trap::Hypercall
}

pub fn decode<H: HypercallBinding>(value: u64) -> H::Return {
    match H::Return::try_from(value) {
        Ok(ret) => ret,
        Err(_) => panic!("{value:#x} is no valid result of {}", std::any::type_name::<H>()),
    }
}

/// A guest program which is advanced by one step every time its vCPU is resumed.
pub trait Guest {
    fn step(&mut self, vm: &Vm, regs: &mut ArchRegs) -> Trap;
}

/// The [`GuestEntry`] of the tests which dispatches to one [`Guest`] per VM.
#[derive(Default)]
pub struct Guests {
    programs: HashMap<u32, Box<dyn Guest>>,
    pub resumes: HashMap<u32, usize>,
}

impl Guests {
    pub fn with(mut self, vm_id: u32, guest: impl Guest + 'static) -> Self {
        self.programs.insert(vm_id, Box::new(guest));
        self
    }

    pub fn resumes_of(&self, vm_id: u32) -> usize {
        self.resumes.get(&vm_id).copied().unwrap_or(0)
    }
}

impl GuestEntry for Guests {
    fn resume(&mut self, vm: &Vm, _vcpu: u16, regs: &mut ArchRegs) -> Trap {
        *self.resumes.entry(vm.id()).or_default() += 1;
        let Some(guest) = self.programs.get_mut(&vm.id()) else {
            panic!("no guest program for vm {}", vm.id());
        };
        guest.step(vm, regs)
    }
}

/// The test itself acts as the primary VM and issues hypercalls through this.
pub struct Primary<'hv> {
    hv: &'hv Hypervisor,
    pub regs: ArchRegs,
}

impl<'hv> Primary<'hv> {
    pub fn new(hv: &'hv Hypervisor) -> Self {
        Self {
            hv,
            regs: ArchRegs::default(),
        }
    }

    pub fn call<H: HypercallBinding>(&mut self, guests: &mut Guests, args: H::CallArgs) -> H::Return {
        issue::<H>(&mut self.regs, args);
        let schedule = self.hv.handle_hypercall(guests, PRIMARY_VM_ID, 0, &mut self.regs);
        assert_eq!(schedule, Schedule::Keep, "the primary never stops running");
        decode::<H>(self.regs.retval())
    }

    pub fn raw_call(&mut self, guests: &mut Guests, hypercall_no: u64, args: [u64; 3]) -> u64 {
        self.regs.x[0] = hypercall_no;
        self.regs.x[1..4].copy_from_slice(&args);
        self.hv.handle_hypercall(guests, PRIMARY_VM_ID, 0, &mut self.regs);
        self.regs.retval()
    }

    pub fn configure(&mut self, machine: &Machine) -> Status {
        self.call::<VmConfigure>(
            &mut Guests::default(),
            VmConfigureArgs {
                send: machine.primary_send_page().raw(),
                recv: machine.primary_recv_page().raw(),
            },
        )
    }
}

/// The first two pages of a secondary's memory serve as its send and receive page.
pub fn mailbox_pages(vm: &Vm) -> (PAddr, PAddr) {
    let begin = vm.memory().begin;
    (begin, begin.add(PAGESIZE as u64))
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ForwardState {
    Start,
    Configured,
    Waiting,
    Cleared { to: u32, size: u32 },
    Sent,
}

/// A guest that waits for messages and passes each one on, either to a fixed VM or back to its sender.
pub struct Forwarder {
    forward_to: Option<u32>,
    state: ForwardState,
}

impl Forwarder {
    pub fn echo() -> Self {
        Self {
            forward_to: None,
            state: ForwardState::Start,
        }
    }

    pub fn relay_to(vm_id: u32) -> Self {
        Self {
            forward_to: Some(vm_id),
            state: ForwardState::Start,
        }
    }

    fn wait(&mut self, regs: &mut ArchRegs) -> Trap {
        self.state = ForwardState::Waiting;
        issue::<MailboxReceive>(regs, MailboxReceiveArgs { blocking: true })
    }
}

impl Guest for Forwarder {
    fn step(&mut self, vm: &Vm, regs: &mut ArchRegs) -> Trap {
        let (send, recv) = mailbox_pages(vm);
        match self.state {
            ForwardState::Start => {
                self.state = ForwardState::Configured;
                issue::<VmConfigure>(
                    regs,
                    VmConfigureArgs {
                        send: send.raw(),
                        recv: recv.raw(),
                    },
                )
            }
            ForwardState::Configured => {
                assert_eq!(decode::<VmConfigure>(regs.retval()), Status::Success);
                self.wait(regs)
            }
            ForwardState::Waiting => match decode::<MailboxReceive>(regs.retval()) {
                MailboxReceiveReturn::Message { sender, size } => {
                    write_page(send, &read_page(recv, size as usize));
                    self.state = ForwardState::Cleared {
                        to: self.forward_to.unwrap_or(sender),
                        size,
                    };
                    issue::<MailboxClear>(regs, NoValue)
                }
                MailboxReceiveReturn::Empty => self.wait(regs),
            },
            ForwardState::Cleared { to, size } => {
                assert_eq!(decode::<MailboxClear>(regs.retval()), Status::Success);
                self.state = ForwardState::Sent;
                issue::<MailboxSend>(regs, MailboxSendArgs { target: to, size })
            }
            ForwardState::Sent => self.wait(regs),
        }
    }
}

pub enum Step {
    Call(u64, [u64; 3]),
    Trap(Trap),
}

/// A guest that performs a fixed sequence of steps and records the result of every hypercall it made.
pub struct Script {
    steps: VecDeque<Step>,
    results: Rc<RefCell<Vec<u64>>>,
    called: bool,
}

impl Script {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> (Self, Rc<RefCell<Vec<u64>>>) {
        let results = Rc::new(RefCell::new(Vec::new()));
        let script = Self {
            steps: steps.into_iter().collect(),
            results: results.clone(),
            called: false,
        };
        (script, results)
    }
}

impl Guest for Script {
    fn step(&mut self, _vm: &Vm, regs: &mut ArchRegs) -> Trap {
        if self.called {
            self.results.borrow_mut().push(regs.retval());
        }
        match self.steps.pop_front() {
            Some(Step::Call(hypercall_no, args)) => {
                self.called = true;
                regs.x[0] = hypercall_no;
                regs.x[1..4].copy_from_slice(&args);
                Trap::Hypercall
            }
            Some(Step::Trap(trap)) => {
                self.called = false;
                trap
            }
            None => {
                self.called = false;
                Trap::WaitForInterrupt
            }
        }
    }
}
