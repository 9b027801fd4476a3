use super::page_table_entry::{Attrs, PTE_VALID};
use bitflags::bitflags;
use core::fmt::{Debug, Formatter, Write};

bitflags! {
    /// Architecture independent description of how memory is mapped.
    ///
    /// A mode is translated into the attribute bits of a concrete translation stage with
    /// [`stage1_attrs()`](Mode::stage1_attrs) or [`stage2_attrs()`](Mode::stage2_attrs).
    #[derive(Copy, Clone, Eq, PartialEq, Default)]
    pub struct Mode: u32 {
        /// The memory can be read
        const Read = 1 << 0;
        /// The memory can be written
        const Write = 1 << 1;
        /// Code stored in the memory can be executed
        const Execute = 1 << 2;
        /// The memory is device memory which must not be cached or reordered
        const Device = 1 << 3;

        /// The mapping is kept in the table but not used for translation
        const Invalid = 1 << 4;
        /// The memory is not owned by the address space it is mapped in
        const Unowned = 1 << 5;
        /// The memory is accessible from more than one address space
        const Shared = 1 << 6;

        const RWX = Self::Read.bits() | Self::Write.bits() | Self::Execute.bits();
    }
}

impl Debug for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        fn write_bit(flags: Mode, bit: Mode, c: char, f: &mut Formatter<'_>) -> core::fmt::Result {
            if flags.contains(bit) {
                f.write_char(c)
            } else {
                f.write_char('-')
            }
        }
        write_bit(*self, Mode::Read, 'R', f)?;
        write_bit(*self, Mode::Write, 'W', f)?;
        write_bit(*self, Mode::Execute, 'X', f)?;
        write_bit(*self, Mode::Device, 'D', f)?;
        write_bit(*self, Mode::Invalid, 'I', f)?;
        write_bit(*self, Mode::Unowned, 'U', f)?;
        write_bit(*self, Mode::Shared, 'S', f)?;
        Ok(())
    }
}

const OUTER_SHAREABLE: u64 = 2;

const STAGE1_XN: u64 = 1 << 54;
const STAGE1_AF: u64 = 1 << 10;
const fn stage1_sh(x: u64) -> u64 {
    x << 8
}
const fn stage1_ap(x: u64) -> u64 {
    x << 6
}
const fn stage1_attrindx(x: u64) -> u64 {
    x << 2
}
const STAGE1_READONLY: u64 = 2;
const STAGE1_READWRITE: u64 = 0;
const STAGE1_DEVICEINDX: u64 = 0;
const STAGE1_NORMALINDX: u64 = 1;
const STAGE1_ATTRINDX_MASK: u64 = stage1_attrindx(0b111);

const fn stage2_xn(x: u64) -> u64 {
    x << 53
}
const STAGE2_EXECUTE_ALL: u64 = 0;
const STAGE2_EXECUTE_NONE: u64 = 2;
const STAGE2_EXECUTE_MASK: u64 = 3;
const STAGE2_AF: u64 = 1 << 10;
const fn stage2_sh(x: u64) -> u64 {
    x << 8
}
const fn stage2_s2ap(x: u64) -> u64 {
    x << 6
}
const STAGE2_ACCESS_READ: u64 = 1;
const STAGE2_ACCESS_WRITE: u64 = 2;
const fn stage2_memattr(x: u64) -> u64 {
    x << 2
}
const STAGE2_WRITEBACK: u64 = 3;
const STAGE2_MEMATTR_NORMAL_WB: u64 = stage2_memattr((STAGE2_WRITEBACK << 2) | STAGE2_WRITEBACK);
const STAGE2_MEMATTR_DEVICE_NGNRNE: u64 = stage2_memattr(0);
const STAGE2_MEMATTR_TYPE_MASK: u64 = 3 << 4;

/// Software defined stage 2 bit: the address space owns the mapped memory.
///
/// Leaves carrying this bit count as present even when they are not valid, which is how memory that was lent away
/// stays attributed to its owner.
pub const STAGE2_SW_OWNED: u64 = 1 << 55;

/// Software defined stage 2 bit: no other address space has access to the mapped memory.
pub const STAGE2_SW_EXCLUSIVE: u64 = 1 << 56;

impl Mode {
    /// Encode this mode as the attributes of a leaf entry in a stage 1 (hypervisor) table.
    pub fn stage1_attrs(self) -> Attrs {
        let mut attrs = STAGE1_AF | stage1_sh(OUTER_SHAREABLE);

        if !self.contains(Mode::Execute) {
            attrs |= STAGE1_XN;
        }

        if self.contains(Mode::Write) {
            attrs |= stage1_ap(STAGE1_READWRITE);
        } else {
            attrs |= stage1_ap(STAGE1_READONLY);
        }

        if self.contains(Mode::Device) {
            attrs |= stage1_attrindx(STAGE1_DEVICEINDX);
        } else {
            attrs |= stage1_attrindx(STAGE1_NORMALINDX);
        }

        if !self.contains(Mode::Invalid) {
            attrs |= PTE_VALID;
        }

        Attrs::from_bits(attrs)
    }

    /// Decode the attributes of a stage 1 leaf.
    ///
    /// Stage 1 memory is always readable and always owned by the hypervisor.
    pub fn from_stage1_attrs(attrs: Attrs) -> Mode {
        let attrs = attrs.bits();
        let mut mode = Mode::Read;

        if attrs & stage1_ap(STAGE1_READONLY) == 0 {
            mode |= Mode::Write;
        }
        if attrs & STAGE1_XN == 0 {
            mode |= Mode::Execute;
        }
        if attrs & STAGE1_ATTRINDX_MASK == stage1_attrindx(STAGE1_DEVICEINDX) {
            mode |= Mode::Device;
        }
        if attrs & PTE_VALID == 0 {
            mode |= Mode::Invalid;
        }
        mode
    }

    /// Encode this mode as the attributes of a leaf entry in a stage 2 (VM) table.
    pub fn stage2_attrs(self) -> Attrs {
        let mut attrs = STAGE2_AF | stage2_sh(OUTER_SHAREABLE);

        let mut access = 0;
        if self.contains(Mode::Read) {
            access |= STAGE2_ACCESS_READ;
        }
        if self.contains(Mode::Write) {
            access |= STAGE2_ACCESS_WRITE;
        }
        attrs |= stage2_s2ap(access);

        if self.contains(Mode::Execute) {
            attrs |= stage2_xn(STAGE2_EXECUTE_ALL);
        } else {
            attrs |= stage2_xn(STAGE2_EXECUTE_NONE);
        }

        if self.contains(Mode::Device) {
            attrs |= STAGE2_MEMATTR_DEVICE_NGNRNE;
        } else {
            attrs |= STAGE2_MEMATTR_NORMAL_WB;
        }

        if !self.contains(Mode::Unowned) {
            attrs |= STAGE2_SW_OWNED;
        }
        if !self.contains(Mode::Shared) {
            attrs |= STAGE2_SW_EXCLUSIVE;
        }
        if !self.contains(Mode::Invalid) {
            attrs |= PTE_VALID;
        }

        Attrs::from_bits(attrs)
    }

    /// Decode the attributes of a stage 2 leaf.
    pub fn from_stage2_attrs(attrs: Attrs) -> Mode {
        let attrs = attrs.bits();
        let mut mode = Mode::empty();

        if attrs & stage2_s2ap(STAGE2_ACCESS_READ) != 0 {
            mode |= Mode::Read;
        }
        if attrs & stage2_s2ap(STAGE2_ACCESS_WRITE) != 0 {
            mode |= Mode::Write;
        }
        if attrs & stage2_xn(STAGE2_EXECUTE_MASK) == stage2_xn(STAGE2_EXECUTE_ALL) {
            mode |= Mode::Execute;
        }
        if attrs & STAGE2_MEMATTR_TYPE_MASK == 0 {
            mode |= Mode::Device;
        }
        if attrs & STAGE2_SW_OWNED == 0 {
            mode |= Mode::Unowned;
        }
        if attrs & STAGE2_SW_EXCLUSIVE == 0 {
            mode |= Mode::Shared;
        }
        if attrs & PTE_VALID == 0 {
            mode |= Mode::Invalid;
        }
        mode
    }
}
