//! POSIX implementations of the OS strategy seams.
//!
//! Memory comes from `mmap`/`munmap`/`mprotect`; the host linker is the
//! `dlopen` family. `map_fixed` uses `MAP_FIXED_NOREPLACE` so that an
//! occupied range fails the call instead of silently clobbering it, which
//! is what the `ET_EXEC` probe relies on.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::os::{HostLinker, MemoryAccess, MemoryMapper, Perms};

/// The process's own address space via the mmap family.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixMemory;

fn prot_bits(perms: Perms) -> libc::c_int {
    let mut prot = libc::PROT_NONE;
    if perms.contains(Perms::READ) {
        prot |= libc::PROT_READ;
    }
    if perms.contains(Perms::WRITE) {
        prot |= libc::PROT_WRITE;
    }
    if perms.contains(Perms::EXEC) {
        prot |= libc::PROT_EXEC;
    }
    prot
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "addresses and lengths fit usize on 64-bit hosts"
)]
fn mmap_at(addr: u64, len: u64, flags: libc::c_int) -> io::Result<u64> {
    // SAFETY: anonymous mapping request; no existing Rust references are
    // affected. MAP_FIXED_NOREPLACE refuses to clobber existing mappings.
    let ptr = unsafe {
        libc::mmap(
            addr as *mut libc::c_void,
            len as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            flags | libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr as u64)
    }
}

impl MemoryMapper for PosixMemory {
    fn map_fixed(&self, addr: u64, len: u64) -> io::Result<u64> {
        mmap_at(addr, len, libc::MAP_FIXED_NOREPLACE)
    }

    fn map_random(&self, len: u64) -> io::Result<u64> {
        mmap_at(0, len, 0)
    }

    #[expect(clippy::cast_possible_truncation, reason = "lengths fit usize")]
    fn unmap(&self, addr: u64, len: u64) -> io::Result<()> {
        // SAFETY: the loader only unmaps reservations it created.
        let ret = unsafe { libc::munmap(addr as *mut libc::c_void, len as usize) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[expect(clippy::cast_possible_truncation, reason = "lengths fit usize")]
    fn protect(&self, addr: u64, len: u64, perms: Perms) -> io::Result<()> {
        // SAFETY: the loader only protects mappings it created.
        let ret = unsafe { libc::mprotect(addr as *mut libc::c_void, len as usize, prot_bits(perms)) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl MemoryAccess for PosixMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) {
        // SAFETY: the loader only reads addresses inside mappings it
        // created (see the trait contract).
        unsafe { ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len()) };
    }

    fn write(&self, addr: u64, bytes: &[u8]) {
        // SAFETY: as above, for writes.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
    }
}

/// The running process's dynamic linker via the `dlopen` family.
///
/// Libraries are opened `RTLD_LAZY | RTLD_GLOBAL`: lazy because this
/// loader never forces binding in the dependencies, global so that the
/// default-scope symbol lookups see them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixLinker;

/// Clears any pending `dlerror` state, runs `lookup`, and distinguishes
/// "resolved to NULL" from "not found" via the `dlerror` protocol.
fn checked_lookup(lookup: impl FnOnce() -> *mut libc::c_void) -> Option<u64> {
    // SAFETY: dlerror only reads/clears libdl's thread-local error state.
    unsafe { libc::dlerror() };
    let value = lookup();
    // SAFETY: as above.
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        Some(value as u64)
    } else {
        None
    }
}

impl HostLinker for PosixLinker {
    type Handle = *mut libc::c_void;

    fn open(&self, path: &str) -> Option<Self::Handle> {
        let path = CString::new(path).ok()?;
        // SAFETY: `path` is a valid NUL-terminated string; dlopen has no
        // other preconditions.
        let handle = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            None
        } else {
            Some(handle)
        }
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        let name = CString::new(name).ok()?;
        // SAFETY: `name` is a valid NUL-terminated string; RTLD_DEFAULT
        // queries the global scope.
        checked_lookup(|| unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) })
    }

    fn symbol_version(&self, name: &str, version: &str) -> Option<u64> {
        let name = CString::new(name).ok()?;
        let version = CString::new(version).ok()?;
        // SAFETY: both strings are valid NUL-terminated strings.
        checked_lookup(|| unsafe {
            libc::dlvsym(libc::RTLD_DEFAULT, name.as_ptr(), version.as_ptr())
        })
    }

    fn close(&self, handle: Self::Handle) {
        // SAFETY: `handle` came from dlopen and is released exactly once.
        if unsafe { libc::dlclose(handle) } != 0 {
            log::warn!("dlclose failed; leaking the handle");
        }
    }
}

/// Fills 16 bytes of entropy for `AT_RANDOM` from `getrandom(2)`.
///
/// On persistent failure the remaining bytes stay zero; startup still
/// works, the program just gets weak stack-canary seed material.
#[must_use]
pub fn random_bytes() -> [u8; 16] {
    let mut buf = [0u8; 16];
    let mut filled = 0;
    while filled < buf.len() {
        // SAFETY: the pointer/length pair describes the unfilled tail of
        // a live buffer.
        let ret = unsafe {
            libc::getrandom(
                buf[filled..].as_mut_ptr().cast::<libc::c_void>(),
                buf.len() - filled,
                0,
            )
        };
        if ret < 0 {
            log::warn!("getrandom failed; AT_RANDOM is partially zeroed");
            break;
        }
        #[expect(clippy::cast_sign_loss, reason = "ret checked non-negative")]
        {
            filled += ret as usize;
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::MemoryMapper;

    #[test]
    fn map_copy_protect_unmap_cycle() {
        let mem = PosixMemory;
        let base = mem.map_random(0x2000).expect("anonymous mapping");

        mem.write(base, b"cycle");
        let mut back = [0u8; 5];
        mem.read(base, &mut back);
        assert_eq!(&back, b"cycle");

        mem.protect(base, 0x2000, Perms::READ).expect("mprotect");
        mem.unmap(base, 0x2000).expect("munmap");
    }

    #[test]
    fn fixed_probe_fails_on_occupied_range() {
        let mem = PosixMemory;
        let base = mem.map_random(0x1000).expect("anonymous mapping");
        // The same range cannot be fixed-mapped again without clobbering.
        assert!(mem.map_fixed(base, 0x1000).is_err());
        mem.unmap(base, 0x1000).expect("munmap");
    }

    #[test]
    fn host_linker_resolves_libc_symbols() {
        let linker = PosixLinker;
        // strlen lives in the already-loaded libc.
        let addr = linker.symbol("strlen").expect("strlen resolves");
        assert_ne!(addr, 0);
        assert_eq!(linker.symbol("definitely_not_a_symbol_9f3a"), None);
    }

    #[test]
    fn entropy_is_usually_nonzero() {
        // 16 zero bytes from getrandom would be a 2^-128 event.
        assert_ne!(random_bytes(), [0u8; 16]);
    }
}
