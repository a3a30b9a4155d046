//! Relocation records.
//!
//! Two record shapes exist: [`Rela`] carries an explicit addend, [`Rel`]
//! leaves the addend implicit in the patched word. The `r_info` split into
//! symbol index and relocation type differs by class and lives on
//! [`ElfClass::split_r_info`](crate::class::ElfClass::split_r_info).
//! Relocation *type* constants are architecture business and belong to the
//! strategy that patches memory, not to this crate.

/// A relocation entry with addend, width-normalized to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    /// Unbiased virtual address where the relocation applies.
    pub r_offset: u64,
    /// Packed symbol index and relocation type.
    pub r_info: u64,
    /// Addend value.
    pub r_addend: i64,
}

/// A relocation entry without addend, width-normalized to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rel {
    /// Unbiased virtual address where the relocation applies.
    pub r_offset: u64,
    /// Packed symbol index and relocation type.
    pub r_info: u64,
}
