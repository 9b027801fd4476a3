//! ABI definitions for calling into the hypervisor and interpreting its results
//!
//! # Hypercall Overview
//!
//! Currently, the following hypercalls are defined:
//!
//! | Hypercall | Number | Arguments | Return | Summary |
//! |-----------|:------:|-----------|--------|---------|
//! | [vm_get_id](vm::VmGetId) | *0xff00* | [NoValue] | `u32` | The id of the calling VM |
//! | [vm_get_count](vm::VmGetCount) | *0xff01* | [NoValue] | `u32` | How many VMs exist |
//! | [vcpu_get_count](vm::VcpuGetCount) | *0xff02* | [VcpuGetCountArgs](vm::VcpuGetCountArgs) | [VcpuGetCountReturn](vm::VcpuGetCountReturn) | How many vCPUs a VM has |
//! | [vcpu_run](vcpu::VcpuRun) | *0xff03* | [VcpuRunArgs](vcpu::VcpuRunArgs) | [VcpuRunReturn](vcpu::VcpuRunReturn) | Run a vCPU of a secondary VM (primary only) |
//! | [vcpu_yield](vcpu::VcpuYield) | *0xff04* | [NoValue] | [Status] | Give control back to the primary |
//! | [vm_configure](vm::VmConfigure) | *0xff05* | [VmConfigureArgs](vm::VmConfigureArgs) | [Status] | Register the caller's mailbox pages |
//! | [mailbox_send](mailbox::MailboxSend) | *0xff06* | [MailboxSendArgs](mailbox::MailboxSendArgs) | [Status] | Deliver the send page to another VM |
//! | [mailbox_receive](mailbox::MailboxReceive) | *0xff07* | [MailboxReceiveArgs](mailbox::MailboxReceiveArgs) | [MailboxReceiveReturn](mailbox::MailboxReceiveReturn) | Query (or wait for) a pending message |
//! | [mailbox_clear](mailbox::MailboxClear) | *0xff08* | [NoValue] | [Status] | Mark the pending message as consumed |
//!
//! # Calling Conventions
//!
//! Hypercalls are issued with the `hvc #0` instruction.
//!
//! ## Argument Registers
//!
//! `x0` holds the hypercall number, `x1` to `x3` hold its arguments.
//! Their exact meaning depends on the hypercall.
//!
//! ## Return Register
//!
//! The result is written to `x0`, all other registers are preserved.
//! Calls that fail return `-1` (i.e. [`HYPERCALL_FAILURE`]), which is also what an unknown hypercall number yields.
//!

#![no_std]

pub mod mailbox;
mod traits;
mod utils;
pub mod vcpu;
pub mod vm;

pub use traits::*;

/// The value returned in `x0` by any failed hypercall.
pub const HYPERCALL_FAILURE: u64 = -1i64 as u64;

/// The id of the primary VM which schedules all others.
pub const PRIMARY_VM_ID: u32 = 0;

/// Used where a VM id is expected but no VM is meant.
pub const INVALID_VM_ID: u32 = 0xffff_ffff;

/// How many bytes a mailbox page holds and thus how large a single message can be.
pub const MAILBOX_SIZE: usize = 4096;
