//! Compile-time limits and the runtime configuration of the hypervisor

use aarch64::mem::PAGESIZE;
use log::Level;
use static_assertions::const_assert;

/// How many VMs can exist, the primary included.
pub const MAX_VMS: usize = 16;

/// How many vCPUs a single VM can have.
pub const MAX_CPUS: usize = 8;

// vm ids double as VMIDs and vcpu indices travel as u16
const_assert!(MAX_VMS <= 1 << 16);
const_assert!(MAX_CPUS <= 1 << 16);

/// How many memory ranges the platform's boot descriptor holds.
pub const MAX_MEM_RANGES: usize = 20;

/// How many ownership records the memory range tracker can hold.
pub const MAX_RECORDS: usize = 64;

/// The default size of the page pool from which all page tables are allocated.
pub const HYPERVISOR_POOL_PAGES: usize = 256;

/// Runtime configuration that is applied when the hypervisor boots.
///
/// ```
/// # use hypervisor::config::HypervisorConfig;
/// let config = HypervisorConfig::default().pa_bits(40).pool_pages(64);
/// assert_eq!(config.pa_bits, 40);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HypervisorConfig {
    /// How many bits of physical address space the hardware supports
    pub pa_bits: u8,
    /// The log level that is installed at boot
    pub log_level: Level,
    /// How many pages are reserved for page tables
    pub pool_pages: usize,
    /// Alignment of the memory handed to each VM
    pub vm_alignment: u64,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            pa_bits: 48,
            log_level: Level::Info,
            pool_pages: HYPERVISOR_POOL_PAGES,
            vm_alignment: 2 * 1024 * 1024,
        }
    }
}

impl HypervisorConfig {
    pub fn pa_bits(mut self, pa_bits: u8) -> Self {
        self.pa_bits = pa_bits;
        self
    }

    pub fn log_level(mut self, log_level: Level) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn pool_pages(mut self, pool_pages: usize) -> Self {
        self.pool_pages = pool_pages;
        self
    }

    /// # Panics
    /// Panics if `vm_alignment` is not a power of two of at least one page.
    pub fn vm_alignment(mut self, vm_alignment: u64) -> Self {
        assert!(
            vm_alignment.is_power_of_two() && vm_alignment >= PAGESIZE as u64,
            "VM memory must be aligned to a power of two of at least one page"
        );
        self.vm_alignment = vm_alignment;
        self
    }
}

/// Description of a VM that is created at boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VmSpec {
    pub vcpu_count: usize,
    /// Bytes of guest memory, a multiple of the page size
    pub memory_size: u64,
}

impl VmSpec {
    pub const fn new(vcpu_count: usize, memory_size: u64) -> Self {
        Self {
            vcpu_count,
            memory_size,
        }
    }
}
