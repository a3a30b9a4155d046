//! Program header (segment) records and type/flag constants.

/// Segment type: loadable segment.
pub const PT_LOAD: u32 = 1;

/// Segment type: dynamic linking information.
pub const PT_DYNAMIC: u32 = 2;

/// Segment type: interpreter path.
pub const PT_INTERP: u32 = 3;

/// Segment permission flag: executable.
pub const PF_X: u32 = 1;

/// Segment permission flag: writable.
pub const PF_W: u32 = 2;

/// Segment permission flag: readable.
pub const PF_R: u32 = 4;

/// Parsed program header entry, width-normalized to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type (`PT_LOAD`, `PT_DYNAMIC`, `PT_INTERP`, ...).
    pub p_type: u32,
    /// Segment permission flags (`PF_R | PF_W | PF_X`).
    pub p_flags: u32,
    /// Offset of the segment data in the file.
    pub p_offset: u64,
    /// Virtual address of the segment.
    pub p_vaddr: u64,
    /// Size of the segment data in the file.
    pub p_filesz: u64,
    /// Size of the segment in memory (`>= p_filesz`; the rest is zero-fill).
    pub p_memsz: u64,
    /// Required alignment of the segment.
    pub p_align: u64,
}
