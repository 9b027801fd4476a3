#![no_std]

pub mod mem;
pub mod regs;
pub mod tlb;
