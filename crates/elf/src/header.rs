//! ELF file header parsing and identification.
//!
//! Validates the identification bytes (magic, class, data encoding) and
//! extracts the header fields the loader needs. Field layouts differ by
//! class and are delegated to [`ElfClass`].

use core::fmt;

use crate::class::ElfClass;

/// ELF magic bytes: `\x7fELF`.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF type: position-dependent executable.
pub const ET_EXEC: u16 = 2;

/// ELF type: shared object / position-independent executable.
pub const ET_DYN: u16 = 3;

/// Read a little-endian `u16` from `data` at byte offset `off`.
///
/// # Panics
///
/// Panics if `off + 2 > data.len()`. Callers must bounds-check first.
pub(crate) fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `u32` from `data` at byte offset `off`.
pub(crate) fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `u64` from `data` at byte offset `off`.
pub(crate) fn le_u64(data: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `i32` from `data` at byte offset `off`.
pub(crate) fn le_i32(data: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `i64` from `data` at byte offset `off`.
pub(crate) fn le_i64(data: &[u8], off: usize) -> i64 {
    i64::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Errors that can occur while accessing an ELF image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not start with the ELF magic bytes.
    BadMagic,
    /// The `EI_CLASS` byte does not match the requested class.
    WrongClass(u8),
    /// The ELF file is not little-endian.
    UnsupportedEncoding,
    /// The input data is too short for the declared structure.
    Truncated,
    /// A header offset or size is out of bounds.
    InvalidOffset,
    /// A string is unterminated or not valid UTF-8.
    BadString,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "invalid ELF magic bytes"),
            Self::WrongClass(c) => write!(f, "ELF class {c} does not match requested class"),
            Self::UnsupportedEncoding => {
                write!(f, "unsupported data encoding (expected little-endian)")
            }
            Self::Truncated => write!(f, "input data truncated"),
            Self::InvalidOffset => write!(f, "invalid offset or size"),
            Self::BadString => write!(f, "unterminated or non-UTF-8 string"),
        }
    }
}

impl core::error::Error for ElfError {}

/// Parsed ELF file header, width-normalized to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// ELF type (`ET_EXEC`, `ET_DYN`, ...).
    pub e_type: u16,
    /// Target machine architecture.
    pub e_machine: u16,
    /// Virtual address of the entry point.
    pub e_entry: u64,
    /// Offset of the program header table in the file.
    pub e_phoff: u64,
    /// Size of each program header entry.
    pub e_phentsize: u16,
    /// Number of program header entries.
    pub e_phnum: u16,
}

impl FileHeader {
    /// Parse an ELF file header from raw bytes.
    ///
    /// Validates the magic, class (against `C`), data encoding, and that
    /// the program header table fits within `data`. Machine and type are
    /// extracted but not validated — that is load policy, not structure.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if identification fails or the data is too short.
    pub fn parse<C: ElfClass>(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < C::EHDR_SIZE {
            return Err(ElfError::Truncated);
        }

        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }

        // Class byte (EI_CLASS, byte 4) must match the requested selector.
        if data[4] != C::CLASS {
            return Err(ElfError::WrongClass(data[4]));
        }

        // Data encoding (EI_DATA, byte 5) — must be little-endian.
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding);
        }

        let header = C::parse_file_header(data);

        // Validate program header table bounds.
        let ph_end = header
            .e_phoff
            .checked_add(u64::from(header.e_phnum) * u64::from(header.e_phentsize))
            .ok_or(ElfError::InvalidOffset)?;
        if ph_end > data.len() as u64 {
            return Err(ElfError::InvalidOffset);
        }

        // Validate program header entry size.
        if header.e_phnum > 0 && (header.e_phentsize as usize) < C::PHDR_SIZE {
            return Err(ElfError::InvalidOffset);
        }

        Ok(header)
    }
}
