use crate::arch::TlbMaintenance;
use crate::boot_params::{BootError, BootParamsUpdate, Platform};
use crate::config::{HypervisorConfig, VmSpec, MAX_CPUS, MAX_VMS};
use crate::memrange::{MemRangeTracker, Owner};
use crate::mm::{MapFlags, PageTable, PhysMapping, Stage1, Stage2};
use crate::vm::{Vm, VmError};
use aarch64::mem::{AddrRange, Mode, PAddr, PAGESIZE};
use allocators::PagePool;
use hypercall_abi::PRIMARY_VM_ID;
use ksync::SpinLock;

/// The machine facilities the hypervisor is built upon.
///
/// Everything in here has to live forever because page tables keep referring to it.
#[derive(Copy, Clone)]
pub struct Environment {
    /// How the hypervisor reaches physical memory
    pub phys_map: PhysMapping,
    /// Where page tables are allocated from, the hypervisor feeds it during boot
    pub pool: &'static PagePool,
    pub tlb: &'static dyn TlbMaintenance,
}

/// The global state of the hypervisor: its own address space, the memory bookkeeping and all VMs.
pub struct Hypervisor {
    config: HypervisorConfig,
    env: Environment,
    stage1: SpinLock<PageTable<Stage1>>,
    memory: SpinLock<MemRangeTracker>,
    vms: [Option<Vm>; MAX_VMS],
    vm_count: usize,
    kernel_arg: u64,
}

impl Hypervisor {
    /// Partition the machine's memory and create all VMs.
    ///
    /// Secondary VMs get ids starting at 1 in the order of `secondaries` and each receives its own, identity mapped
    /// piece of memory.
    /// The primary VM is created last and gets everything that is left over.
    pub fn boot(
        platform: &mut dyn Platform,
        config: HypervisorConfig,
        env: Environment,
        primary_vcpus: usize,
        secondaries: &[VmSpec],
    ) -> Result<Self, BootError> {
        log::set_max_level(config.log_level.to_level_filter());
        log::info!("booting hypervisor with {config:?}");
        let params = platform.get_boot_params()?;
        log::debug!(
            "platform reports {:?} as usable memory, {:?} as initrd and {:?} as the hypervisor image",
            params.mem_ranges,
            params.initrd,
            params.image
        );

        let mut memory = MemRangeTracker::new(&params)?;
        let pool_range = memory.allocate(
            (config.pool_pages * PAGESIZE) as u64,
            PAGESIZE as u64,
            Owner::Hypervisor,
        )?;
        // Safety: the tracker just handed this range to the hypervisor exclusively
        let pages = unsafe {
            env.pool
                .add_chunk(env.phys_map.map::<u8>(pool_range.begin), pool_range.len() as usize)
        };
        log::debug!("page pool holds {pages} pages at {pool_range:?}");

        let mut stage1 = PageTable::<Stage1>::new(config.pa_bits, 0, env.phys_map, env.pool, env.tlb)?;
        for (section, mode) in params.image.sections() {
            stage1.identity_map(section, mode, MapFlags::empty())?;
        }
        stage1.identity_map(pool_range, Mode::Read | Mode::Write, MapFlags::empty())?;

        let mut hv = Self {
            config,
            env,
            stage1: SpinLock::new(stage1),
            memory: SpinLock::new(memory),
            vms: core::array::from_fn(|_| None),
            // the primary's slot is kept free until it is created
            vm_count: 1,
            kernel_arg: params.kernel_arg,
        };
        for spec in secondaries {
            hv.create_vm(spec)?;
        }
        hv.create_primary(primary_vcpus)?;

        let update = BootParamsUpdate {
            reserved: hv.memory.get_mut().reserved_ranges()?,
            initrd: params.initrd,
        };
        if !platform.update_boot_params(&update) {
            return Err(BootError::UpdateRejected);
        }
        log::debug!("{}", hv.stage1.get_mut().dump());

        log::info!(
            "hypervisor is ready with {} vms and {} free page-table pages",
            hv.vm_count,
            hv.env.pool.free_pages()
        );
        Ok(hv)
    }

    fn new_stage2(&self, vm_id: u32) -> Result<PageTable<Stage2>, VmError> {
        Ok(PageTable::new(
            self.config.pa_bits,
            vm_id as u16,
            self.env.phys_map,
            self.env.pool,
            self.env.tlb,
        )?)
    }

    /// Create a secondary VM and return its id.
    pub fn create_vm(&mut self, spec: &VmSpec) -> Result<u32, VmError> {
        if self.vm_count >= MAX_VMS {
            return Err(VmError::TooManyVms);
        }
        if spec.memory_size == 0 || spec.memory_size % PAGESIZE as u64 != 0 {
            return Err(VmError::InvalidMemorySize);
        }
        if spec.vcpu_count == 0 || spec.vcpu_count > MAX_CPUS {
            return Err(VmError::InvalidVcpuCount(spec.vcpu_count));
        }

        let id = self.vm_count as u32;
        let memory = self
            .memory
            .get_mut()
            .allocate(spec.memory_size, self.config.vm_alignment, Owner::Vm(id))?;
        let vm = match self.new_secondary(id, spec, memory) {
            Ok(vm) => vm,
            Err(e) => {
                log::warn!("could not create vm {id}: {e}");
                self.memory.get_mut().release(memory);
                return Err(e);
            }
        };
        self.vms[id as usize] = Some(vm);
        self.vm_count += 1;
        Ok(id)
    }

    fn new_secondary(&self, id: u32, spec: &VmSpec, memory: AddrRange<PAddr>) -> Result<Vm, VmError> {
        let mut ptable = self.new_stage2(id)?;
        if let Err(e) = ptable.identity_map(memory, Mode::RWX, MapFlags::empty()) {
            ptable.destroy();
            return Err(e.into());
        }
        log::debug!("{}", ptable.dump());
        // secondaries start at the beginning of their memory and are told how large it is
        Vm::new(id, spec.vcpu_count, ptable, memory, memory.begin.raw(), spec.memory_size)
    }

    fn create_primary(&mut self, vcpu_count: usize) -> Result<(), VmError> {
        if vcpu_count == 0 || vcpu_count > MAX_CPUS {
            return Err(VmError::InvalidVcpuCount(vcpu_count));
        }
        let mut ptable = self.new_stage2(PRIMARY_VM_ID)?;
        let memory = self.memory.get_mut();
        let usable = memory.ranges_where(|owner| matches!(owner, Owner::Free | Owner::Initrd))?;
        for range in usable.iter() {
            if let Err(e) = ptable.identity_map(*range, Mode::RWX, MapFlags::empty()) {
                ptable.destroy();
                return Err(e.into());
            }
        }
        memory.assign_free(Owner::Vm(PRIMARY_VM_ID));

        let vm = Vm::new(
            PRIMARY_VM_ID,
            vcpu_count,
            ptable,
            AddrRange::default(),
            0,
            self.kernel_arg,
        )?;
        self.vms[PRIMARY_VM_ID as usize] = Some(vm);
        Ok(())
    }

    pub fn vm(&self, id: u32) -> Option<&Vm> {
        self.vms.get(id as usize)?.as_ref()
    }

    /// How many VMs exist, the primary included.
    pub fn vm_count(&self) -> u32 {
        self.vm_count as u32
    }

    pub fn config(&self) -> &HypervisorConfig {
        &self.config
    }

    pub fn stage1(&self) -> &SpinLock<PageTable<Stage1>> {
        &self.stage1
    }

    pub fn memory(&self) -> &SpinLock<MemRangeTracker> {
        &self.memory
    }

    pub fn phys_map(&self) -> PhysMapping {
        self.env.phys_map
    }

    pub fn pool(&self) -> &'static PagePool {
        self.env.pool
    }

    /// Destroy all VMs and the hypervisor's own page table, returning every page-table page to the pool.
    pub fn teardown(self) {
        for vm in self.vms.into_iter().flatten() {
            vm.destroy();
        }
        self.stage1.into_inner().destroy();
        log::info!("hypervisor torn down, {} pages are free", self.env.pool.free_pages());
    }
}

impl core::fmt::Debug for Hypervisor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hypervisor")
            .field("config", &self.config)
            .field("vm_count", &self.vm_count)
            .field("stage1", &self.stage1)
            .finish()
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::arch::RecordingTlb;
    use crate::boot_params::{BootParams, HypervisorImage, MemRanges};
    use crate::mm::MapError;
    use aarch64::mem::MemoryPage;
    use std::boxed::Box;
    use std::vec;

    const MEMORY: u64 = 0x100_0000;

    fn add_pages(pool: &PagePool, pages: usize) {
        let memory = Box::leak(vec![MemoryPage::default(); pages].into_boxed_slice());
        unsafe { pool.add_chunk(memory.as_mut_ptr().cast(), pages * PAGESIZE) };
    }

    /// A hypervisor in the middle of booting, all of its memory is still free.
    fn booting(pool_pages: usize) -> Hypervisor {
        let pool: &'static PagePool = Box::leak(Box::new(PagePool::new()));
        add_pages(pool, pool_pages);
        let env = Environment {
            phys_map: PhysMapping::identity(),
            pool,
            tlb: Box::leak(Box::new(RecordingTlb::new())),
        };
        let config = HypervisorConfig::default().vm_alignment(PAGESIZE as u64);
        let params = BootParams {
            mem_ranges: MemRanges::from_slice(&[AddrRange::from_len(PAddr::new(0x4000_0000), MEMORY)]).unwrap(),
            image: HypervisorImage::default(),
            initrd: AddrRange::default(),
            kernel_arg: 0,
        };
        Hypervisor {
            config,
            env,
            stage1: SpinLock::new(PageTable::new(config.pa_bits, 0, env.phys_map, pool, env.tlb).unwrap()),
            memory: SpinLock::new(MemRangeTracker::new(&params).unwrap()),
            vms: core::array::from_fn(|_| None),
            vm_count: 1,
            kernel_arg: 0,
        }
    }

    #[test]
    fn test_failed_vm_creation_gives_back_its_memory() {
        // the only page goes to the stage 1 root, so no stage 2 table can be created
        let mut hv = booting(1);
        let spec = VmSpec::new(1, 0x10_000);
        assert_eq!(hv.create_vm(&spec), Err(VmError::Map(MapError::OutOfMemory)));
        assert_eq!(hv.vm_count(), 1);
        assert_eq!(hv.memory.get_mut().free_bytes(), MEMORY);

        add_pages(hv.env.pool, 16);
        assert_eq!(hv.create_vm(&spec), Ok(1));
        let memory = hv.vm(1).unwrap().memory();
        let tracker = hv.memory.get_mut();
        assert_eq!(tracker.owner_of(memory), Some(Owner::Vm(1)));
        assert_eq!(tracker.free_bytes(), MEMORY - 0x10_000);
    }
}
