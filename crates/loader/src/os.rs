//! Injected OS strategy seams.
//!
//! The loader decides *what* goes where; these traits decide *how* bits get
//! into memory. Separating the two keeps the loader hostable on different
//! kernels and testable against the mock backend in [`crate::mock`].

use std::io;

use bitflags::bitflags;
use elfrun_elf::{ElfClass, PF_R, PF_W, PF_X};

bitflags! {
    /// Memory protection for a mapped range, mirroring ELF `p_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perms: u32 {
        /// Readable.
        const READ = PF_R;
        /// Writable.
        const WRITE = PF_W;
        /// Executable.
        const EXEC = PF_X;
    }
}

impl Perms {
    /// Translates raw ELF `p_flags`, dropping any OS-specific extra bits.
    #[must_use]
    pub fn from_p_flags(p_flags: u32) -> Self {
        Self::from_bits_truncate(p_flags)
    }
}

/// Anonymous-mapping primitives over the process address space.
///
/// `map_fixed` must fail if the requested range is not free — the segment
/// loader relies on that to probe for address conflicts. Both `map_*`
/// primitives return initially writable, zero-filled memory.
pub trait MemoryMapper {
    /// Maps `len` bytes at exactly `addr`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the range is occupied or the mapping fails.
    fn map_fixed(&self, addr: u64, len: u64) -> io::Result<u64>;

    /// Maps `len` bytes at an OS-chosen address.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping fails.
    fn map_random(&self, len: u64) -> io::Result<u64>;

    /// Removes the mapping at `addr`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the range is not a mapping.
    fn unmap(&self, addr: u64, len: u64) -> io::Result<()>;

    /// Changes the protection of the mapping at `addr`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the protection cannot be applied.
    fn protect(&self, addr: u64, len: u64, perms: Perms) -> io::Result<()>;
}

/// Byte access to the (real or mocked) process image.
///
/// Reads and writes are infallible: the loader only touches addresses
/// inside mappings it created. The mock backend panics on anything else,
/// which turns loader bugs into test failures instead of silent corruption.
pub trait MemoryAccess {
    /// Reads `buf.len()` bytes starting at `addr`.
    fn read(&self, addr: u64, buf: &mut [u8]);

    /// Writes `bytes` starting at `addr`.
    fn write(&self, addr: u64, bytes: &[u8]);

    /// Reads a little-endian `u16` at `addr`.
    fn read_u16(&self, addr: u64) -> u16 {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf);
        u16::from_le_bytes(buf)
    }

    /// Reads a little-endian `u32` at `addr`.
    fn read_u32(&self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    /// Reads a little-endian `u64` at `addr`.
    fn read_u64(&self, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read(addr, &mut buf);
        u64::from_le_bytes(buf)
    }

    /// Reads a NUL-terminated byte string at `addr` (terminator excluded).
    fn read_cstr(&self, addr: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut cursor = addr;
        loop {
            let mut byte = [0u8; 1];
            self.read(cursor, &mut byte);
            if byte[0] == 0 {
                return bytes;
            }
            bytes.push(byte[0]);
            cursor += 1;
        }
    }
}

/// Reads a class-width little-endian word at `addr`, widened to `u64`.
pub fn read_word<C: ElfClass, M: MemoryAccess + ?Sized>(mem: &M, addr: u64) -> u64 {
    let mut buf = [0u8; 8];
    mem.read(addr, &mut buf[..C::ADDR_SIZE]);
    u64::from_le_bytes(buf)
}

/// Writes `value` as a class-width little-endian word at `addr`.
pub fn write_word<C: ElfClass, M: MemoryAccess + ?Sized>(mem: &M, addr: u64, value: u64) {
    let bytes = value.to_le_bytes();
    mem.write(addr, &bytes[..C::ADDR_SIZE]);
}

/// Bindings to the running process's dynamic linker.
///
/// `DT_NEEDED` resolution is delegated here: libraries are opened into the
/// host's global scope so subsequent symbol lookups see them.
pub trait HostLinker {
    /// An open library handle, released via [`HostLinker::close`].
    type Handle;

    /// Opens `path` lazily into the global scope. `None` if it cannot be
    /// opened.
    fn open(&self, path: &str) -> Option<Self::Handle>;

    /// Looks up `name` in the default scope. `None` if unresolved.
    fn symbol(&self, name: &str) -> Option<u64>;

    /// Looks up `name` with a specific `version` in the default scope.
    fn symbol_version(&self, name: &str, version: &str) -> Option<u64>;

    /// Releases a handle. Failures are the implementation's to report;
    /// by the time handles are released the symbol values are already
    /// patched into the image.
    fn close(&self, handle: Self::Handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMemory;

    #[test]
    fn perms_from_p_flags_drops_unknown_bits() {
        let perms = Perms::from_p_flags(PF_R | PF_X | 0x0ff0_0000);
        assert_eq!(perms, Perms::READ | Perms::EXEC);
    }

    #[test]
    fn word_helpers_respect_class_width() {
        use elfrun_elf::{Elf32, Elf64};

        let mem = MockMemory::new();
        let base = mem.map_random(0x1000).unwrap();

        write_word::<Elf64, _>(&mem, base, 0x1122_3344_5566_7788);
        assert_eq!(read_word::<Elf64, _>(&mem, base), 0x1122_3344_5566_7788);

        write_word::<Elf32, _>(&mem, base + 0x100, 0xAABB_CCDD);
        assert_eq!(read_word::<Elf32, _>(&mem, base + 0x100), 0xAABB_CCDD);
        // Only four bytes were written.
        assert_eq!(mem.read_u64(base + 0x100), 0xAABB_CCDD);
    }

    #[test]
    fn read_cstr_stops_at_nul() {
        let mem = MockMemory::new();
        let base = mem.map_random(0x1000).unwrap();
        mem.write(base, b"stdout\0junk");
        assert_eq!(mem.read_cstr(base), b"stdout");
        assert_eq!(mem.read_cstr(base + 6), b"");
    }
}
