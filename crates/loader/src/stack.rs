//! Stack allocation and System V startup frame construction.
//!
//! The program gets a fresh anonymous R|W region; the frame at its high
//! end holds, from the returned stack pointer upward: `argc`, the argv
//! pointers, `NULL`, the envp pointers, `NULL`, and the auxiliary vector,
//! with the string payloads and `AT_RANDOM` entropy above them. The
//! returned pointer is the address of `argc`, 16-byte aligned as the entry
//! ABI requires.

use elfrun_elf::{ElfClass, Image};

use crate::error::LoadError;
use crate::os::{write_word, MemoryAccess, MemoryMapper, Perms};

/// Stack region size: 256 MiB.
pub const STACK_SIZE: u64 = 256 * 1024 * 1024;

/// Value reported through `AT_PAGESZ`.
pub const PAGE_SIZE: u64 = 4096;

/// Auxiliary vector: end of vector.
pub const AT_NULL: u64 = 0;
/// Auxiliary vector: address of the program headers in memory.
pub const AT_PHDR: u64 = 3;
/// Auxiliary vector: size of one program header entry.
pub const AT_PHENT: u64 = 4;
/// Auxiliary vector: number of program headers.
pub const AT_PHNUM: u64 = 5;
/// Auxiliary vector: page size.
pub const AT_PAGESZ: u64 = 6;
/// Auxiliary vector: interpreter base address (0 without interpreter).
pub const AT_BASE: u64 = 7;
/// Auxiliary vector: program entry point.
pub const AT_ENTRY: u64 = 9;
/// Auxiliary vector: address of 16 random bytes.
pub const AT_RANDOM: u64 = 25;

/// A stack region owned by the loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Lowest address of the region.
    pub base: u64,
    /// Region size in bytes.
    pub size: u64,
}

impl StackRegion {
    /// Highest address of the region.
    #[must_use]
    pub fn top(&self) -> u64 {
        self.base + self.size
    }
}

/// Allocates the program stack: one anonymous region of [`STACK_SIZE`]
/// bytes, zeroed (fresh anonymous mappings are zero-filled), protected
/// R|W. Ownership passes to the loaded program.
///
/// # Errors
///
/// Returns [`LoadError::StackAllocFailed`] if the mapping or protection
/// fails.
pub fn allocate_stack<M: MemoryMapper>(mem: &M) -> Result<StackRegion, LoadError> {
    let base = mem
        .map_random(STACK_SIZE)
        .map_err(LoadError::StackAllocFailed)?;
    mem.protect(base, STACK_SIZE, Perms::READ | Perms::WRITE)
        .map_err(LoadError::StackAllocFailed)?;
    Ok(StackRegion {
        base,
        size: STACK_SIZE,
    })
}

/// Builds the System V startup frame at the high end of `region` and
/// returns the stack pointer the entry ABI expects (the address of
/// `argc`).
///
/// `entry` is the program entry (also in `AT_ENTRY` when an interpreter
/// will run first), `interp_bias` the interpreter's load bias or 0, and
/// `load_min_addr` the lowest mapped address of the program image, from
/// which `AT_PHDR` is derived.
#[expect(clippy::too_many_arguments, reason = "one argument per frame ingredient")]
pub fn setup_stack<C: ElfClass, M: MemoryAccess>(
    mem: &M,
    region: &StackRegion,
    image: &Image<'_, C>,
    entry: u64,
    interp_bias: u64,
    load_min_addr: u64,
    argv: &[&str],
    envp: &[&str],
    random: [u8; 16],
) -> u64 {
    let mut cursor = region.top();

    // String payloads live at the very top, NUL-terminated, in argv order
    // then envp order.
    let mut argv_ptrs = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        cursor -= arg.len() as u64 + 1;
        mem.write(cursor, arg.as_bytes());
        mem.write(cursor + arg.len() as u64, &[0]);
        argv_ptrs.push(cursor);
    }
    argv_ptrs.reverse();

    let mut envp_ptrs = Vec::with_capacity(envp.len());
    for var in envp.iter().rev() {
        cursor -= var.len() as u64 + 1;
        mem.write(cursor, var.as_bytes());
        mem.write(cursor + var.len() as u64, &[0]);
        envp_ptrs.push(cursor);
    }
    envp_ptrs.reverse();

    cursor -= random.len() as u64;
    let random_addr = cursor;
    mem.write(random_addr, &random);

    let header = image.header();
    let auxv = [
        (AT_PHDR, load_min_addr + header.e_phoff),
        (AT_PHENT, u64::from(header.e_phentsize)),
        (AT_PHNUM, u64::from(header.e_phnum)),
        (AT_PAGESZ, PAGE_SIZE),
        (AT_BASE, interp_bias),
        (AT_ENTRY, entry),
        (AT_RANDOM, random_addr),
        (AT_NULL, 0),
    ];

    // argc + argv + NULL + envp + NULL + auxv pairs, padded down so the
    // stack pointer lands 16-byte aligned.
    let word = C::ADDR_SIZE as u64;
    let vector_words = 1 + argv_ptrs.len() as u64 + 1 + envp_ptrs.len() as u64 + 1
        + 2 * auxv.len() as u64;
    let stack_ptr = (cursor - word * vector_words) & !0xF;

    let mut at = stack_ptr;
    write_word::<C, M>(mem, at, argv.len() as u64);
    at += word;
    for ptr in &argv_ptrs {
        write_word::<C, M>(mem, at, *ptr);
        at += word;
    }
    write_word::<C, M>(mem, at, 0);
    at += word;
    for ptr in &envp_ptrs {
        write_word::<C, M>(mem, at, *ptr);
        at += word;
    }
    write_word::<C, M>(mem, at, 0);
    at += word;
    for (key, value) in auxv {
        write_word::<C, M>(mem, at, key);
        at += word;
        write_word::<C, M>(mem, at, value);
        at += word;
    }

    log::debug!(
        "stack frame at {stack_ptr:#x} (argc={}, {} env vars)",
        argv.len(),
        envp.len(),
    );

    stack_ptr
}
