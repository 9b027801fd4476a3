use crate::{AllocError, AllocInit, Allocator};
use core::alloc::Layout;
use core::ptr::NonNull;
use ksync::SpinLock;

/// The granule in which a [`PagePool`] hands out memory.
pub const PAGESIZE: usize = 4096;

/// A run of free and contiguous pages that points to the next free run.
///
/// The header is stored inside the first page of the run itself.
#[derive(Copy, Clone, Debug)]
struct FreeChunk {
    next: Option<NonNull<FreeChunk>>,
    pages: usize,
}

#[derive(Debug)]
struct PoolState {
    /// First free chunk
    head: Option<NonNull<FreeChunk>>,
    /// How many pages are currently free in total
    free_pages: usize,
}

// Safety: the chunks are only reachable through the pool which serializes access through its lock
unsafe impl Send for PoolState {}

/// A pool of physical pages from which page tables are allocated.
///
/// Memory is donated to the pool in arbitrarily sized chunks via [`add_chunk()`](PagePool::add_chunk) and handed out
/// in multiples of [`PAGESIZE`], optionally with a stronger alignment (concatenated root tables need that).
/// Freed pages are put back as their own chunk, the pool never merges chunks again.
#[derive(Debug)]
pub struct PagePool {
    state: SpinLock<PoolState>,
}

fn align_up(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

fn pages_for(size: usize) -> usize {
    (size + PAGESIZE - 1) / PAGESIZE
}

impl PagePool {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(PoolState {
                head: None,
                free_pages: 0,
            }),
        }
    }

    /// Donate the memory at `start` with a length of `size` bytes to the pool.
    ///
    /// Partial pages at either end of the region are ignored.
    /// Returns how many pages were added.
    ///
    /// # Safety
    /// The memory must be unused, writable through `start` and remain valid for as long as pages of it are handed out.
    pub unsafe fn add_chunk(&self, start: *mut u8, size: usize) -> usize {
        let begin = align_up(start as usize, PAGESIZE);
        let end = (start as usize + size) & !(PAGESIZE - 1);
        if end <= begin {
            log::trace!("ignoring chunk {:p} of {:#x} bytes which holds no whole page", start, size);
            return 0;
        }

        let pages = (end - begin) / PAGESIZE;
        self.push_chunk(begin as *mut FreeChunk, pages);
        log::trace!("added {} pages at {:#x} to page pool", pages, begin);
        pages
    }

    unsafe fn push_chunk(&self, chunk: *mut FreeChunk, pages: usize) {
        let mut state = self.state.spin_lock();
        chunk.write(FreeChunk {
            next: state.head,
            pages,
        });
        state.head = NonNull::new(chunk);
        state.free_pages += pages;
    }

    /// How many pages are currently available
    pub fn free_pages(&self) -> usize {
        self.state.spin_lock().free_pages
    }

    /// Allocate `count` contiguous pages whose first page is aligned to `align` bytes.
    ///
    /// The search is first-fit over the free chunks.
    pub fn alloc_pages(&self, count: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        assert!(count > 0, "cannot allocate zero pages");
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        let align = align.max(PAGESIZE);

        let mut state = self.state.spin_lock();
        let mut prev: Option<NonNull<FreeChunk>> = None;
        let mut cursor = state.head;
        while let Some(chunk) = cursor {
            let FreeChunk { next, pages } = unsafe { *chunk.as_ptr() };
            let start = chunk.as_ptr() as usize;
            let aligned = align_up(start, align);
            let skip = (aligned - start) / PAGESIZE;

            if skip + count <= pages {
                let tail_pages = pages - skip - count;
                let mut successor = next;
                if tail_pages > 0 {
                    let tail = (aligned + count * PAGESIZE) as *mut FreeChunk;
                    unsafe {
                        tail.write(FreeChunk {
                            next,
                            pages: tail_pages,
                        })
                    };
                    successor = NonNull::new(tail);
                }

                if skip > 0 {
                    // the unaligned head of the chunk stays free in place
                    unsafe {
                        chunk.as_ptr().write(FreeChunk {
                            next: successor,
                            pages: skip,
                        })
                    };
                } else {
                    match prev {
                        Some(prev) => unsafe { (*prev.as_ptr()).next = successor },
                        None => state.head = successor,
                    }
                }

                state.free_pages -= count;
                log::trace!("allocated {} pages at {:#x} from page pool", count, aligned);
                // Safety: aligned lies inside of a chunk and is thus never null
                return Ok(unsafe { NonNull::new_unchecked(aligned as *mut u8) });
            }

            prev = Some(chunk);
            cursor = next;
        }

        log::trace!("page pool cannot satisfy {} pages aligned to {:#x}", count, align);
        Err(AllocError::InsufficientMemory)
    }

    /// Return `count` pages starting at `ptr` to the pool.
    ///
    /// # Safety
    /// The pages must have been allocated from this pool and must no longer be used.
    pub unsafe fn free_pages_at(&self, ptr: NonNull<u8>, count: usize) {
        assert_eq!(
            ptr.as_ptr() as usize % PAGESIZE,
            0,
            "freed pages must be page aligned"
        );
        assert!(count > 0);
        log::trace!("returning {} pages at {:p} to page pool", count, ptr);
        self.push_chunk(ptr.as_ptr().cast(), count);
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator<'static> for PagePool {
    fn allocate(&self, layout: Layout, init: AllocInit) -> Result<&'static mut [u8], AllocError> {
        let count = pages_for(layout.size());
        let ptr = self.alloc_pages(count, layout.align())?;
        let memory = unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), count * PAGESIZE) };
        init.apply(memory);
        Ok(memory)
    }

    unsafe fn deallocate(&self, data_ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(data_ptr) else {
            panic!("cannot deallocate a null pointer");
        };
        self.free_pages_at(ptr, pages_for(layout.size()));
    }
}
