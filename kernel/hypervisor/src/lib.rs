//! The core of a static-partition hypervisor for aarch64
//!
//! Physical memory is split between a primary VM, which schedules everything, and a number of secondary VMs.
//! The hypervisor manages the stage 2 page tables that confine each VM, runs secondary vCPUs when the primary asks
//! it to and passes single-page messages between VMs.
//!
//! Booting, entering guests and TLB maintenance are reached through the [`Platform`](boot_params::Platform),
//! [`GuestEntry`](sched::GuestEntry) and [`TlbMaintenance`](arch::TlbMaintenance) traits, so the core also runs
//! hosted, which is how it is tested.
#![no_std]

pub mod arch;
pub mod boot_params;
pub mod config;
mod hypercalls;
mod hypervisor;
pub mod logging;
pub mod mailbox;
pub mod memrange;
pub mod mm;
pub mod sched;
pub mod vcpu;
pub mod vm;

pub use hypervisor::{Environment, Hypervisor};
