//! Definitions for the mailbox hypercalls
//!
//! Every VM owns a single mailbox consisting of one send page and one receive page in its own memory.
//! A message is sent by filling the send page and naming a target VM; it is copied into the target's receive page
//! which then stays occupied until the target clears it.

use crate::{
    HypercallBinding, InvalidEncoding, NoValue, RawHypercallArgs, Status, INVALID_VM_ID,
};

/// Deliver the first `size` bytes of the send page to another VM.
pub struct MailboxSend;

#[derive(Debug, Eq, PartialEq)]
pub struct MailboxSendArgs {
    pub target: u32,
    pub size: u32,
}

impl HypercallBinding for MailboxSend {
    const HYPERCALL_NO: u64 = 0xff06;
    type CallArgs = MailboxSendArgs;
    type Return = Status;
}

impl TryFrom<RawHypercallArgs> for MailboxSendArgs {
    type Error = InvalidEncoding;

    fn try_from(value: RawHypercallArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            target: value[0].try_into().map_err(|_| InvalidEncoding)?,
            size: value[1].try_into().map_err(|_| InvalidEncoding)?,
        })
    }
}

impl From<MailboxSendArgs> for RawHypercallArgs {
    fn from(value: MailboxSendArgs) -> Self {
        [value.target as u64, value.size as u64, 0]
    }
}

/// Query the caller's mailbox for a pending message, optionally waiting for one.
pub struct MailboxReceive;

#[derive(Debug, Eq, PartialEq)]
pub struct MailboxReceiveArgs {
    /// Whether the calling vCPU should block until a message arrives
    pub blocking: bool,
}

/// Result of a `mailbox_receive` hypercall.
///
/// A message is encoded as `sender | size << 32`, no message as `INVALID_VM_ID` with a size of 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MailboxReceiveReturn {
    Message { sender: u32, size: u32 },
    Empty,
}

impl HypercallBinding for MailboxReceive {
    const HYPERCALL_NO: u64 = 0xff07;
    type CallArgs = MailboxReceiveArgs;
    type Return = MailboxReceiveReturn;
}

impl From<RawHypercallArgs> for MailboxReceiveArgs {
    fn from(value: RawHypercallArgs) -> Self {
        Self {
            blocking: value[0] != 0,
        }
    }
}

impl From<MailboxReceiveArgs> for RawHypercallArgs {
    fn from(value: MailboxReceiveArgs) -> Self {
        [value.blocking as u64, 0, 0]
    }
}

impl From<MailboxReceiveReturn> for u64 {
    fn from(value: MailboxReceiveReturn) -> Self {
        match value {
            MailboxReceiveReturn::Message { sender, size } => sender as u64 | (size as u64) << 32,
            MailboxReceiveReturn::Empty => INVALID_VM_ID as u64,
        }
    }
}

impl TryFrom<u64> for MailboxReceiveReturn {
    type Error = InvalidEncoding;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let sender = value as u32;
        let size = (value >> 32) as u32;
        match (sender, size) {
            (INVALID_VM_ID, 0) => Ok(Self::Empty),
            (INVALID_VM_ID, _) => Err(InvalidEncoding),
            (sender, size) => Ok(Self::Message { sender, size }),
        }
    }
}

/// Mark the message in the caller's receive page as consumed so that a new one can be delivered.
pub struct MailboxClear;

impl HypercallBinding for MailboxClear {
    const HYPERCALL_NO: u64 = 0xff08;
    type CallArgs = NoValue;
    type Return = Status;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_receive_return_encoding() {
        let ret = MailboxReceiveReturn::Message { sender: 1, size: 5 };
        assert_eq!(u64::from(ret), 0x0000_0005_0000_0001);
        assert_eq!(u64::from(MailboxReceiveReturn::Empty), 0xffff_ffff);
        assert_eq!(MailboxReceiveReturn::try_from(0xffff_ffffu64), Ok(MailboxReceiveReturn::Empty));
    }

    #[test]
    fn test_oversized_send_args_are_rejected() {
        assert_eq!(MailboxSendArgs::try_from([1u64, 1 << 33, 0]), Err(InvalidEncoding));
    }
}
