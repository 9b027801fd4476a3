//! Memory allocators used by the hypervisor.
//!
//! The only allocator in use is the [`PagePool`] which hands out the pages that back page tables.
#![no_std]

mod page_pool;
mod traits;

pub use page_pool::{PagePool, PAGESIZE};
pub use traits::{AllocError, AllocInit, Allocator};
