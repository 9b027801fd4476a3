use super::{PAGESIZE, PAGE_BITS};
use core::fmt::{Debug, Display, Formatter, LowerHex};

/// Common behavior of the different address newtypes.
///
/// Generic code like [`AddrRange`] is written against this trait so that it works the same for all address spaces
/// while still never mixing them up.
pub trait Address: Copy + Ord + Debug {
    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }

            /// The address `offset` bytes after this one.
            ///
            /// # Panics
            /// Panics if the result would wrap around the address space.
            pub const fn add(self, offset: u64) -> Self {
                match self.0.checked_add(offset) {
                    Some(raw) => Self(raw),
                    None => panic!("address arithmetic overflowed"),
                }
            }

            pub const fn align_down(self, align: u64) -> Self {
                Self(self.0 & !(align - 1))
            }

            pub const fn align_up(self, align: u64) -> Self {
                Self::new(self.0 + (align - 1)).align_down(align)
            }

            pub const fn is_aligned(self, align: u64) -> bool {
                self.0 & (align - 1) == 0
            }

            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(PAGESIZE as u64)
            }

            pub const fn page_offset(self) -> u64 {
                self.0 & ((1 << PAGE_BITS) - 1)
            }
        }

        impl Address for $name {
            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> u64 {
                value.0
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl LowerHex for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                LowerHex::fmt(&self.0, f)
            }
        }
    };
}

address_type! {
    /// A physical address as seen by the memory system.
    PAddr
}

address_type! {
    /// A virtual address in the hypervisor's own (stage 1) address space.
    VAddr
}

address_type! {
    /// An intermediate physical address, i.e. what a VM considers to be a physical address.
    ///
    /// It is translated to a [`PAddr`] by the VM's stage 2 page table.
    IpAddr
}

/// A half-open range `[begin, end)` of addresses from one address space.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct AddrRange<A> {
    pub begin: A,
    pub end: A,
}

impl<A: Address> AddrRange<A> {
    /// Construct a range from its bounds.
    ///
    /// # Panics
    /// Panics if `end` lies before `begin`.
    pub fn new(begin: A, end: A) -> Self {
        assert!(begin <= end, "range end {end:?} lies before its begin {begin:?}");
        Self { begin, end }
    }

    /// Construct the range of `len` bytes starting at `begin`.
    ///
    /// # Panics
    /// Panics if the range would wrap around the address space.
    pub fn from_len(begin: A, len: u64) -> Self {
        match Self::checked_from_len(begin, len) {
            Some(range) => range,
            None => panic!("range of {len:#x} bytes at {begin:?} wraps around the address space"),
        }
    }

    /// Construct the range of `len` bytes starting at `begin` unless it would wrap around the address space.
    ///
    /// Use this for addresses that come from guests.
    pub fn checked_from_len(begin: A, len: u64) -> Option<Self> {
        let end = begin.raw().checked_add(len)?;
        Some(Self {
            begin,
            end: A::from_raw(end),
        })
    }

    pub fn len(&self) -> u64 {
        self.end.raw() - self.begin.raw()
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn contains(&self, addr: A) -> bool {
        self.begin <= addr && addr < self.end
    }

    /// Whether `other` lies completely inside of this range.
    pub fn contains_range(&self, other: &Self) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn is_page_aligned(&self) -> bool {
        (self.begin.raw() | self.end.raw()) & (PAGESIZE as u64 - 1) == 0
    }

    /// Iterate over the start address of every page in this range.
    pub fn pages(&self) -> impl Iterator<Item = A> {
        (self.begin.raw()..self.end.raw())
            .step_by(PAGESIZE)
            .map(A::from_raw)
    }
}

impl<A: Address> Debug for AddrRange<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{:#x}..{:#x})", self.begin.raw(), self.end.raw())
    }
}
