//! Definitions for the hypercalls that schedule vCPUs
//!
//! The primary VM drives scheduling: it runs vCPUs of secondary VMs with [`VcpuRun`] and learns from the
//! [`VcpuRunReturn`] why control came back to it.

use crate::utils::back_to_enum;
use crate::{HypercallBinding, InvalidEncoding, NoValue, RawHypercallArgs, Status};

/// Run a vCPU of a secondary VM until it needs the primary's attention.
pub struct VcpuRun;

#[derive(Debug, Eq, PartialEq)]
pub struct VcpuRunArgs {
    pub vm_id: u32,
    pub vcpu: u32,
}

impl HypercallBinding for VcpuRun {
    const HYPERCALL_NO: u64 = 0xff03;
    type CallArgs = VcpuRunArgs;
    type Return = VcpuRunReturn;
}

impl TryFrom<RawHypercallArgs> for VcpuRunArgs {
    type Error = InvalidEncoding;

    fn try_from(value: RawHypercallArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            vm_id: value[0].try_into().map_err(|_| InvalidEncoding)?,
            vcpu: value[1].try_into().map_err(|_| InvalidEncoding)?,
        })
    }
}

impl From<VcpuRunArgs> for RawHypercallArgs {
    fn from(value: VcpuRunArgs) -> Self {
        [value.vm_id as u64, value.vcpu as u64, 0]
    }
}

back_to_enum! {
    /// The code in the low byte of an encoded [`VcpuRunReturn`].
    #[repr(u64)]
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub enum RunCode {
        WaitForInterrupt = 1,
        WakeUp = 2,
        Message = 3,
    }
}

/// Why a `vcpu_run` hypercall returned to the primary.
///
/// # Encoding
///
/// ```text
///   63                 32 31         16 15          8 7          0
/// ┌──────────────────────┬─────────────┬─────────────┬────────────┐
/// │  WAKE_UP: vm_id      │  vcpu       │             │  code      │
/// │  MESSAGE: size       │        sender              │            │
/// └──────────────────────┴─────────────┴─────────────┴────────────┘
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VcpuRunReturn {
    /// The vCPU is waiting for an interrupt or has nothing to do
    WaitForInterrupt,
    /// The vCPU made another VM's vCPU runnable which the primary should schedule
    WakeUp { vm_id: u32, vcpu: u16 },
    /// A message of `size` bytes from `sender` is pending
    ///
    /// The message either waits in the primary's mailbox, or it arrived in the mailbox of the run vCPU's own VM while
    /// the vCPU was blocked on receiving it. In the latter case the vCPU is ready again and has not been entered.
    Message { sender: u32, size: u32 },
}

const CODE_MASK: u64 = 0xff;
const SENDER_MASK: u64 = 0xff_ffff;

impl From<VcpuRunReturn> for u64 {
    fn from(value: VcpuRunReturn) -> Self {
        match value {
            VcpuRunReturn::WaitForInterrupt => RunCode::WaitForInterrupt as u64,
            VcpuRunReturn::WakeUp { vm_id, vcpu } => {
                (vm_id as u64) << 32 | (vcpu as u64) << 16 | RunCode::WakeUp as u64
            }
            VcpuRunReturn::Message { sender, size } => {
                (size as u64) << 32 | (sender as u64 & SENDER_MASK) << 8 | RunCode::Message as u64
            }
        }
    }
}

impl TryFrom<u64> for VcpuRunReturn {
    type Error = InvalidEncoding;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match RunCode::try_from(value & CODE_MASK)? {
            RunCode::WaitForInterrupt => Ok(Self::WaitForInterrupt),
            RunCode::WakeUp => Ok(Self::WakeUp {
                vm_id: (value >> 32) as u32,
                vcpu: (value >> 16) as u16,
            }),
            RunCode::Message => Ok(Self::Message {
                sender: ((value >> 8) & SENDER_MASK) as u32,
                size: (value >> 32) as u32,
            }),
        }
    }
}

/// Give control back to the primary without blocking.
pub struct VcpuYield;

impl HypercallBinding for VcpuYield {
    const HYPERCALL_NO: u64 = 0xff04;
    type CallArgs = NoValue;
    type Return = Status;
}
