use crate::HYPERCALL_FAILURE;
use core::fmt::Debug;

/// A trait for binding a hypercall number to its specific argument and return type.
pub trait HypercallBinding {
    /// The hypercall number which identifies this hypercall.
    const HYPERCALL_NO: u64;

    /// The type that is used to encode the hypercall's arguments.
    ///
    /// Arguments are written to the argument registers when the hypercall is executed, so the hypervisor needs to be
    /// able to reconstruct them from `RawHypercallArgs`.
    /// That conversion may fail when the registers hold values that don't fit the argument types.
    type CallArgs: TryFrom<RawHypercallArgs> + Into<RawHypercallArgs> + Debug;

    /// The type that is used to encode the hypercall's result in the return register.
    type Return: TryFrom<u64> + Into<u64> + Debug;
}

/// The arguments to a hypercall as they are encoded in the CPU's registers `x1` to `x3`.
pub type RawHypercallArgs = [u64; 3];

/// Indicates that register contents cannot be decoded into the expected type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InvalidEncoding;

/// A type that is used when a hypercall requires no arguments.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NoValue;

impl From<RawHypercallArgs> for NoValue {
    fn from(_value: RawHypercallArgs) -> Self {
        NoValue
    }
}

impl From<NoValue> for RawHypercallArgs {
    fn from(_value: NoValue) -> Self {
        [0, 0, 0]
    }
}

/// The result of hypercalls that either succeed without a value or fail.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Success,
    Failure,
}

impl<E> From<Result<(), E>> for Status {
    fn from(value: Result<(), E>) -> Self {
        match value {
            Ok(()) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

impl From<Status> for u64 {
    fn from(value: Status) -> Self {
        match value {
            Status::Success => 0,
            Status::Failure => HYPERCALL_FAILURE,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = InvalidEncoding;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Success),
            HYPERCALL_FAILURE => Ok(Status::Failure),
            _ => Err(InvalidEncoding),
        }
    }
}
