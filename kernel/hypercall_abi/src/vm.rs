//! Definitions for hypercalls that inspect and configure VMs

use crate::{HypercallBinding, InvalidEncoding, NoValue, RawHypercallArgs, Status, HYPERCALL_FAILURE};

/// Query the id of the calling VM.
pub struct VmGetId;

impl HypercallBinding for VmGetId {
    const HYPERCALL_NO: u64 = 0xff00;
    type CallArgs = NoValue;
    type Return = u32;
}

/// Query how many VMs exist, the primary included.
pub struct VmGetCount;

impl HypercallBinding for VmGetCount {
    const HYPERCALL_NO: u64 = 0xff01;
    type CallArgs = NoValue;
    type Return = u32;
}

/// Query how many vCPUs a VM has.
pub struct VcpuGetCount;

#[derive(Debug, Eq, PartialEq)]
pub struct VcpuGetCountArgs {
    pub vm_id: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VcpuGetCountReturn {
    Count(u32),
    /// The queried VM does not exist
    InvalidVm,
}

impl HypercallBinding for VcpuGetCount {
    const HYPERCALL_NO: u64 = 0xff02;
    type CallArgs = VcpuGetCountArgs;
    type Return = VcpuGetCountReturn;
}

impl TryFrom<RawHypercallArgs> for VcpuGetCountArgs {
    type Error = InvalidEncoding;

    fn try_from(value: RawHypercallArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            vm_id: value[0].try_into().map_err(|_| InvalidEncoding)?,
        })
    }
}

impl From<VcpuGetCountArgs> for RawHypercallArgs {
    fn from(value: VcpuGetCountArgs) -> Self {
        [value.vm_id as u64, 0, 0]
    }
}

impl From<VcpuGetCountReturn> for u64 {
    fn from(value: VcpuGetCountReturn) -> Self {
        match value {
            VcpuGetCountReturn::Count(count) => count as u64,
            VcpuGetCountReturn::InvalidVm => HYPERCALL_FAILURE,
        }
    }
}

impl TryFrom<u64> for VcpuGetCountReturn {
    type Error = InvalidEncoding;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            HYPERCALL_FAILURE => Ok(Self::InvalidVm),
            count => Ok(Self::Count(count.try_into().map_err(|_| InvalidEncoding)?)),
        }
    }
}

/// Register the mailbox pages of the calling VM.
///
/// This can be done exactly once per VM.
pub struct VmConfigure;

#[derive(Debug, Eq, PartialEq)]
pub struct VmConfigureArgs {
    /// Intermediate physical address of the page from which messages are sent
    pub send: u64,
    /// Intermediate physical address of the page into which messages are received
    pub recv: u64,
}

impl HypercallBinding for VmConfigure {
    const HYPERCALL_NO: u64 = 0xff05;
    type CallArgs = VmConfigureArgs;
    type Return = Status;
}

impl From<RawHypercallArgs> for VmConfigureArgs {
    fn from(value: RawHypercallArgs) -> Self {
        Self {
            send: value[0],
            recv: value[1],
        }
    }
}

impl From<VmConfigureArgs> for RawHypercallArgs {
    fn from(value: VmConfigureArgs) -> Self {
        [value.send, value.recv, 0]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_invalid_vm_is_minus_one() {
        let raw: u64 = VcpuGetCountReturn::InvalidVm.into();
        assert_eq!(raw as i64, -1);
        assert_eq!(VcpuGetCountReturn::try_from(raw), Ok(VcpuGetCountReturn::InvalidVm));
        assert_eq!(VcpuGetCountReturn::try_from(4u64), Ok(VcpuGetCountReturn::Count(4)));
    }

    #[test]
    fn test_vm_ids_wider_than_32_bit_are_rejected() {
        assert_eq!(VcpuGetCountArgs::try_from([1u64 << 32, 0, 0]), Err(InvalidEncoding));
        assert_eq!(
            VcpuGetCountArgs::try_from([0xffff_ffffu64, 0, 0]),
            Ok(VcpuGetCountArgs { vm_id: 0xffff_ffff })
        );
    }
}
