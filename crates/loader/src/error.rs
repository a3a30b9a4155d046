//! Load failure taxonomy.
//!
//! Every error is fatal to the current load; there is no local recovery.
//! Variants carry enough context to say which segment, relocation, or
//! symbol failed.

use core::fmt;
use std::io;

use elfrun_elf::ElfError;

use crate::arch::RelocError;

/// Errors that can occur while loading and linking an ELF image.
#[derive(Debug)]
pub enum LoadError {
    /// The validation policy rejected the image (wrong machine or type).
    InvalidElf(&'static str),
    /// The ELF accessor rejected the image structure.
    Elf(ElfError),
    /// The image has no `PT_LOAD` segments.
    NoSegments,
    /// An anonymous mapping could not be created.
    MapFailed {
        /// Requested mapping address (0 for OS-chosen).
        addr: u64,
        /// Requested mapping length.
        len: u64,
        /// The OS error.
        source: io::Error,
    },
    /// A mapping could not be removed.
    UnmapFailed {
        /// Mapping address.
        addr: u64,
        /// Mapping length.
        len: u64,
        /// The OS error.
        source: io::Error,
    },
    /// Final segment protection could not be applied.
    ProtectFailed {
        /// Mapping address.
        addr: u64,
        /// Mapping length.
        len: u64,
        /// The OS error.
        source: io::Error,
    },
    /// The exact address range required by an `ET_EXEC` image is occupied.
    AddressConflict {
        /// Start of the required range.
        addr: u64,
        /// Length of the required range.
        len: u64,
    },
    /// A required dynamic entry (`DT_STRTAB`, `DT_SYMTAB`) is missing.
    MalformedDynamic(&'static str),
    /// `DT_PLTREL` names neither `DT_RELA` nor `DT_REL`.
    BadPltRelType(i64),
    /// No search prefix could open a `DT_NEEDED` library.
    MissingDependency(String),
    /// A strong symbol was not found in the host's default scope.
    UnresolvedSymbol(String),
    /// The stack region could not be allocated or protected.
    StackAllocFailed(io::Error),
    /// The architecture strategy rejected a relocation.
    Relocation {
        /// Biased address the relocation applies to.
        offset: u64,
        /// The strategy's error.
        source: RelocError,
    },
    /// Reading the interpreter image from disk failed.
    Io(io::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidElf(reason) => write!(f, "invalid ELF image: {reason}"),
            Self::Elf(e) => write!(f, "malformed ELF image: {e}"),
            Self::NoSegments => write!(f, "no PT_LOAD segments in the ELF image"),
            Self::MapFailed { addr, len, source } => {
                write!(f, "mapping {len:#x} bytes at {addr:#x} failed: {source}")
            }
            Self::UnmapFailed { addr, len, source } => {
                write!(f, "unmapping {len:#x} bytes at {addr:#x} failed: {source}")
            }
            Self::ProtectFailed { addr, len, source } => {
                write!(f, "protecting {len:#x} bytes at {addr:#x} failed: {source}")
            }
            Self::AddressConflict { addr, len } => {
                write!(f, "address range {addr:#x}..{:#x} is not free", addr + len)
            }
            Self::MalformedDynamic(what) => write!(f, "malformed dynamic segment: {what}"),
            Self::BadPltRelType(tag) => {
                write!(f, "DT_PLTREL is {tag:#x}, expected DT_RELA or DT_REL")
            }
            Self::MissingDependency(name) => write!(f, "cannot open needed library {name}"),
            Self::UnresolvedSymbol(name) => write!(f, "unresolved symbol {name}"),
            Self::StackAllocFailed(source) => write!(f, "stack allocation failed: {source}"),
            Self::Relocation { offset, source } => {
                write!(f, "relocation at {offset:#x} failed: {source}")
            }
            Self::Io(source) => write!(f, "reading image failed: {source}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<ElfError> for LoadError {
    fn from(error: ElfError) -> Self {
        Self::Elf(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = LoadError::UnresolvedSymbol("__foo".into());
        assert_eq!(format!("{err}"), "unresolved symbol __foo");

        let err = LoadError::AddressConflict {
            addr: 0x40_0000,
            len: 0x1000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("0x400000"));
        assert!(msg.contains("0x401000"));

        let err = LoadError::BadPltRelType(42);
        assert!(format!("{err}").contains("0x2a"));
    }
}
