use super::{entry_size, PAGE_BITS, PAGE_LEVEL_BITS};

/// The shape of a translation table tree: how many levels it has and how many pages its root consists of.
///
/// The shape is decided once per translation regime from the physical address range the hardware supports and never
/// changes afterwards.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TranslationLayout {
    /// The level of the entries stored in the root table(s)
    pub max_level: u8,
    /// How many concatenated pages the root table spans
    pub root_tables: usize,
}

/// The largest number of concatenated root tables the architecture allows for stage 2.
const MAX_ROOT_TABLE_BITS: u32 = 4;

impl TranslationLayout {
    /// The level count needed to cover `pa_bits` of physical address space.
    ///
    /// Mirrors the starting level selection of `VTCR_EL2.SL0`.
    const fn max_level_for(pa_bits: u8) -> u8 {
        if pa_bits >= 44 {
            3
        } else if pa_bits >= 35 {
            2
        } else {
            1
        }
    }

    /// Layout of the hypervisor's own stage 1 tables.
    ///
    /// Stage 1 cannot concatenate root tables so it uses one more level when a single root does not cover the
    /// physical address range.
    pub const fn stage1(pa_bits: u8) -> Self {
        let covered = PAGE_BITS + PAGE_LEVEL_BITS * (Self::max_level_for(pa_bits) as u32 + 1);
        let max_level = if (pa_bits as u32) > covered {
            Self::max_level_for(pa_bits) + 1
        } else {
            Self::max_level_for(pa_bits)
        };
        Self {
            max_level,
            root_tables: 1,
        }
    }

    /// Layout of a VM's stage 2 tables.
    ///
    /// Address bits that the root level does not cover are resolved by concatenating up to 16 root tables.
    pub const fn stage2(pa_bits: u8) -> Self {
        let max_level = Self::max_level_for(pa_bits);
        let covered = PAGE_BITS + PAGE_LEVEL_BITS * (max_level as u32 + 1);
        let extra_bits = if (pa_bits as u32) > covered {
            let extra = pa_bits as u32 - covered;
            if extra > MAX_ROOT_TABLE_BITS {
                MAX_ROOT_TABLE_BITS
            } else {
                extra
            }
        } else {
            0
        };
        Self {
            max_level,
            root_tables: 1 << extra_bits,
        }
    }

    /// The level a single entry covering the whole root table would live on.
    pub const fn root_level(&self) -> u8 {
        self.max_level + 1
    }

    /// The first address that this layout cannot translate anymore.
    pub const fn address_limit(&self) -> u64 {
        entry_size(self.root_level()) * self.root_tables as u64
    }

    /// How many entries the root of this layout holds in total.
    pub const fn root_entries(&self) -> usize {
        self.root_tables << PAGE_LEVEL_BITS
    }
}
