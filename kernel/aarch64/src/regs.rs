//! Saved register state of a virtual CPU

/// `SPSR_EL2` value for entering a VM at EL1h with all exceptions masked.
const SPSR_EL1H_MASKED: u64 = 0b1111 << 6 | 0b0101;

/// The register state of a vCPU that is saved while the vCPU does not execute.
///
/// Hypercalls follow the SMC calling convention: the function number is passed in `x0`, arguments in `x1` to `x3` and
/// the result is returned in `x0`.
#[repr(C)]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArchRegs {
    /// General purpose registers `x0` to `x30`
    pub x: [u64; 31],
    /// The program counter at which execution resumes
    pub pc: u64,
    /// The saved program status with which execution resumes
    pub spsr: u64,
}

impl ArchRegs {
    /// Registers for a vCPU that starts executing at `entry` with `arg` in `x0`.
    pub fn new(entry: u64, arg: u64) -> Self {
        let mut regs = Self {
            x: [0; 31],
            pc: entry,
            spsr: SPSR_EL1H_MASKED,
        };
        regs.x[0] = arg;
        regs
    }

    /// The hypercall number of a call the vCPU just made.
    pub fn hypercall_number(&self) -> u64 {
        self.x[0]
    }

    /// The arguments of a hypercall the vCPU just made.
    pub fn hypercall_args(&self) -> [u64; 3] {
        [self.x[1], self.x[2], self.x[3]]
    }

    /// Place the return value of a hypercall where the vCPU expects it.
    pub fn set_retval(&mut self, value: u64) {
        self.x[0] = value;
    }

    pub fn retval(&self) -> u64 {
        self.x[0]
    }
}

impl Default for ArchRegs {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
