use aarch64::mem::PAddr;

/// Description of an area in accessible memory from which the physical memory is loadable
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PhysMapping {
    pub start: u64,
    pub size: u64,
}

impl PhysMapping {
    /// Return the mapping which describes addresses being identity-mapped.
    /// That is, physical addresses can be loaded from their value directly and do not need to be
    /// mapped.
    pub const fn identity() -> Self {
        Self {
            start: 0,
            size: u64::MAX,
        }
    }

    /// Create a new instance describing physical addresses being available from `start` and is `size` bytes large.
    ///
    /// This means that e.g. the physical address `0x0` is loadable from `start` and the mapping is
    /// only valid for the next `size` bytes after it.
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// Resolve the given physical address into a pointer that is loadable by the CPU right now.
    pub fn map<T>(&self, addr: PAddr) -> *mut T {
        assert!(
            addr.raw() < self.size,
            "{addr:?} lies outside of the mapped physical memory"
        );
        (self.start + addr.raw()) as *mut T
    }

    /// Reverse-resolve a loadable pointer to the hardware address it refers to.
    pub fn rev_map<T>(&self, ptr: *const T) -> PAddr {
        let addr = ptr as u64;
        assert!(
            addr >= self.start && addr - self.start < self.size,
            "{ptr:p} does not point into the mapped physical memory"
        );
        PAddr::new(addr - self.start)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_offset_mapping_round_trip() {
        let mapping = PhysMapping::new(0xffff_0000_0000_0000, 1 << 40);
        let ptr = mapping.map::<u8>(PAddr::new(0x4000_1000));
        assert_eq!(ptr as u64, 0xffff_0000_4000_1000);
        assert_eq!(mapping.rev_map(ptr), PAddr::new(0x4000_1000));
    }

    #[test]
    #[should_panic]
    fn test_out_of_window_is_rejected() {
        PhysMapping::new(0x1000, 0x1000).map::<u8>(PAddr::new(0x2000));
    }
}
