//! Class-generic ELF accessor for the elfrun loader.
//!
//! Parses ELF file headers, program headers, dynamic entries, symbols,
//! relocation records, and version records from raw byte slices using
//! safe field extraction (`from_le_bytes`). No unsafe code, no allocations.
//!
//! The crate is generic over the ELF class: [`Elf32`] and [`Elf64`] are
//! zero-sized selectors implementing [`ElfClass`], which fixes the record
//! sizes and field layouts. Only little-endian data encoding is supported.
//!
//! # Usage
//!
//! ```
//! use elfrun_elf::{Elf64, Image};
//!
//! fn inspect(data: &[u8]) {
//!     let image = Image::<Elf64>::parse(data).expect("valid ELF");
//!     for phdr in image.program_headers() {
//!         // Map phdr.p_filesz bytes from phdr.p_offset at phdr.p_vaddr
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod class;
pub mod dynamic;
pub mod header;
pub mod image;
pub mod reloc;
pub mod segment;
pub mod symbol;
pub mod version;

pub use class::{Elf32, Elf64, ElfClass};
pub use dynamic::DynEntry;
pub use header::{ElfError, FileHeader, ET_DYN, ET_EXEC};
pub use image::Image;
pub use reloc::{Rel, Rela};
pub use segment::{ProgramHeader, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_INTERP, PT_LOAD};
pub use symbol::{Symbol, SHN_UNDEF, STB_GLOBAL, STB_WEAK};
pub use version::{Vernaux, Verneed, VER_NDX_GLOBAL, VER_NDX_LOCAL};
