//! ELF class selection.
//!
//! [`Elf32`] and [`Elf64`] are zero-sized selectors implementing
//! [`ElfClass`]. The trait fixes record sizes, field layouts, and the
//! `r_info` split for one ELF width; parsed records are width-normalized
//! to `u64`/`i64` so the rest of the crate is class-agnostic.

use crate::dynamic::DynEntry;
use crate::header::{le_i32, le_i64, le_u16, le_u32, le_u64, FileHeader};
use crate::reloc::{Rel, Rela};
use crate::segment::ProgramHeader;
use crate::symbol::Symbol;

/// Field layouts and record sizes for one ELF class.
///
/// All `parse_*` functions extract from a record slice whose length the
/// caller has already checked against the matching `*_SIZE` constant.
pub trait ElfClass: Copy + core::fmt::Debug {
    /// Value of the `EI_CLASS` identification byte for this class.
    const CLASS: u8;
    /// Width of an address/offset/word in bytes.
    const ADDR_SIZE: usize;
    /// Size of the ELF file header.
    const EHDR_SIZE: usize;
    /// Size of a program header entry.
    const PHDR_SIZE: usize;
    /// Size of a dynamic table entry.
    const DYN_SIZE: usize;
    /// Size of a symbol table entry.
    const SYM_SIZE: usize;
    /// Size of a relocation entry with addend.
    const RELA_SIZE: usize;
    /// Size of a relocation entry without addend.
    const REL_SIZE: usize;

    /// Extract the file header fields. Identification bytes are validated
    /// by the caller.
    fn parse_file_header(data: &[u8]) -> FileHeader;

    /// Extract a program header from a `PHDR_SIZE` record.
    fn parse_program_header(rec: &[u8]) -> ProgramHeader;

    /// Extract a dynamic entry from a `DYN_SIZE` record.
    fn parse_dyn(rec: &[u8]) -> DynEntry;

    /// Extract a symbol from a `SYM_SIZE` record.
    fn parse_symbol(rec: &[u8]) -> Symbol;

    /// Extract a relocation-with-addend from a `RELA_SIZE` record.
    fn parse_rela(rec: &[u8]) -> Rela;

    /// Extract a relocation-without-addend from a `REL_SIZE` record.
    fn parse_rel(rec: &[u8]) -> Rel;

    /// Split `r_info` into `(symbol index, relocation type)`.
    fn split_r_info(r_info: u64) -> (u32, u32);
}

/// The 32-bit ELF class (`ELFCLASS32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32;

/// The 64-bit ELF class (`ELFCLASS64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64;

impl ElfClass for Elf32 {
    const CLASS: u8 = 1;
    const ADDR_SIZE: usize = 4;
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;
    const DYN_SIZE: usize = 8;
    const SYM_SIZE: usize = 16;
    const RELA_SIZE: usize = 12;
    const REL_SIZE: usize = 8;

    fn parse_file_header(data: &[u8]) -> FileHeader {
        FileHeader {
            e_type: le_u16(data, 16),
            e_machine: le_u16(data, 18),
            e_entry: u64::from(le_u32(data, 24)),
            e_phoff: u64::from(le_u32(data, 28)),
            e_phentsize: le_u16(data, 42),
            e_phnum: le_u16(data, 44),
        }
    }

    fn parse_program_header(rec: &[u8]) -> ProgramHeader {
        ProgramHeader {
            p_type: le_u32(rec, 0),
            p_offset: u64::from(le_u32(rec, 4)),
            p_vaddr: u64::from(le_u32(rec, 8)),
            // p_paddr at 12..16 — skipped
            p_filesz: u64::from(le_u32(rec, 16)),
            p_memsz: u64::from(le_u32(rec, 20)),
            p_flags: le_u32(rec, 24),
            p_align: u64::from(le_u32(rec, 28)),
        }
    }

    fn parse_dyn(rec: &[u8]) -> DynEntry {
        DynEntry {
            d_tag: i64::from(le_i32(rec, 0)),
            d_val: u64::from(le_u32(rec, 4)),
        }
    }

    fn parse_symbol(rec: &[u8]) -> Symbol {
        Symbol {
            st_name: le_u32(rec, 0),
            st_value: u64::from(le_u32(rec, 4)),
            st_size: u64::from(le_u32(rec, 8)),
            st_info: rec[12],
            // st_other at 13 — skipped
            st_shndx: le_u16(rec, 14),
        }
    }

    fn parse_rela(rec: &[u8]) -> Rela {
        Rela {
            r_offset: u64::from(le_u32(rec, 0)),
            r_info: u64::from(le_u32(rec, 4)),
            r_addend: i64::from(le_i32(rec, 8)),
        }
    }

    fn parse_rel(rec: &[u8]) -> Rel {
        Rel {
            r_offset: u64::from(le_u32(rec, 0)),
            r_info: u64::from(le_u32(rec, 4)),
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "ELF32 r_info is sym << 8 | type by definition"
    )]
    fn split_r_info(r_info: u64) -> (u32, u32) {
        ((r_info >> 8) as u32, (r_info & 0xff) as u32)
    }
}

impl ElfClass for Elf64 {
    const CLASS: u8 = 2;
    const ADDR_SIZE: usize = 8;
    const EHDR_SIZE: usize = 64;
    const PHDR_SIZE: usize = 56;
    const DYN_SIZE: usize = 16;
    const SYM_SIZE: usize = 24;
    const RELA_SIZE: usize = 24;
    const REL_SIZE: usize = 16;

    fn parse_file_header(data: &[u8]) -> FileHeader {
        FileHeader {
            e_type: le_u16(data, 16),
            e_machine: le_u16(data, 18),
            e_entry: le_u64(data, 24),
            e_phoff: le_u64(data, 32),
            e_phentsize: le_u16(data, 54),
            e_phnum: le_u16(data, 56),
        }
    }

    fn parse_program_header(rec: &[u8]) -> ProgramHeader {
        ProgramHeader {
            p_type: le_u32(rec, 0),
            p_flags: le_u32(rec, 4),
            p_offset: le_u64(rec, 8),
            p_vaddr: le_u64(rec, 16),
            // p_paddr at 24..32 — skipped
            p_filesz: le_u64(rec, 32),
            p_memsz: le_u64(rec, 40),
            p_align: le_u64(rec, 48),
        }
    }

    fn parse_dyn(rec: &[u8]) -> DynEntry {
        DynEntry {
            d_tag: le_i64(rec, 0),
            d_val: le_u64(rec, 8),
        }
    }

    fn parse_symbol(rec: &[u8]) -> Symbol {
        Symbol {
            st_name: le_u32(rec, 0),
            st_info: rec[4],
            // st_other at 5 — skipped
            st_shndx: le_u16(rec, 6),
            st_value: le_u64(rec, 8),
            st_size: le_u64(rec, 16),
        }
    }

    fn parse_rela(rec: &[u8]) -> Rela {
        Rela {
            r_offset: le_u64(rec, 0),
            r_info: le_u64(rec, 8),
            r_addend: le_i64(rec, 16),
        }
    }

    fn parse_rel(rec: &[u8]) -> Rel {
        Rel {
            r_offset: le_u64(rec, 0),
            r_info: le_u64(rec, 8),
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "ELF64 r_info is sym << 32 | type by definition"
    )]
    fn split_r_info(r_info: u64) -> (u32, u32) {
        ((r_info >> 32) as u32, r_info as u32)
    }
}
