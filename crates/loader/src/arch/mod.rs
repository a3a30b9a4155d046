//! Injected architecture strategies.
//!
//! The loader resolves a relocation down to `(offset, type, value, addend,
//! symbol, bias)` and hands it to the strategy, which owns the per-machine
//! arithmetic and word widths. The strategy also owns the entry trampoline.

pub mod x86_64;

use core::fmt;

use elfrun_elf::Symbol;

use crate::os::MemoryAccess;

pub use x86_64::X86_64;

/// Errors from the architecture strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocError {
    /// The relocation type is not supported.
    UnsupportedType(u32),
    /// The computed value overflows the target field width.
    Overflow,
}

impl fmt::Display for RelocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType(ty) => write!(f, "unsupported relocation type {ty}"),
            Self::Overflow => write!(f, "relocation value overflow"),
        }
    }
}

impl std::error::Error for RelocError {}

/// Architecture-specific patching and control transfer.
pub trait Arch {
    /// `e_machine` value this strategy implements; load policy rejects
    /// images for any other machine.
    const MACHINE: u16;

    /// Applies one relocation-with-addend: computes the value for `r_type`
    /// and writes it at `offset` with the correct word width.
    ///
    /// `offset` is already biased. `value` is the resolved symbol address
    /// (`S`), 0 for type-only and unresolved-weak relocations.
    ///
    /// # Errors
    ///
    /// Returns [`RelocError`] for unknown types or values that do not fit
    /// the target width.
    fn relocate_rela<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        offset: u64,
        r_type: u32,
        value: u64,
        addend: i64,
        sym: &Symbol,
        bias: u64,
    ) -> Result<(), RelocError>;

    /// Applies one relocation-without-addend; the addend is implicit in the
    /// word currently at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RelocError`] for unknown types or values that do not fit
    /// the target width.
    fn relocate_rel<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        offset: u64,
        r_type: u32,
        value: u64,
        sym: &Symbol,
        bias: u64,
    ) -> Result<(), RelocError>;

    /// Calls an initialization function at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be the mapped, relocated address of a function with the
    /// C ABI and no arguments.
    unsafe fn call_init(&self, addr: u64);

    /// Installs `stack_ptr` and transfers control to `entry` with clean
    /// registers. Never returns.
    ///
    /// # Safety
    ///
    /// `entry` must be mapped executable code expecting the System V
    /// process-entry ABI, and `stack_ptr` the address of `argc` in a valid
    /// startup frame. The caller gives up this thread of execution.
    unsafe fn jump(&self, entry: u64, stack_ptr: u64) -> !;
}
