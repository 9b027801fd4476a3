//! A `log` implementation for the hypervisor.
//!
//! Console drivers are not part of this crate.
//! Instead, whoever installs the [`KernelLogger`] hands it a [`Console`] through which log lines are written.
#![no_std]

mod console;
mod kernel_logger;

pub use console::{Console, ConsoleWriter};
pub use kernel_logger::KernelLogger;
