//! Userspace ELF loader.
//!
//! Given an ELF executable or shared object, reserves address space, maps
//! the `PT_LOAD` segments at their correct bias, resolves dynamic linkage
//! (symbols with optional versioning, RELA/REL/PLT relocations) against
//! the host's already-loaded libraries, builds a System V startup stack,
//! and transfers control to the entry point. An alternate mode loads the
//! `PT_INTERP` interpreter and jumps to it instead, delegating linkage.
//!
//! The loader decides *what* goes where; *how* bits get into memory is
//! behind injected strategies: [`MemoryMapper`]/[`MemoryAccess`] for the
//! address space, [`HostLinker`] for the host's dynamic linker, [`Arch`]
//! for relocation arithmetic and the entry trampoline. POSIX and x86-64
//! implementations ship in [`host`] and [`arch`]; the [`mock`] module
//! provides in-memory stand-ins for tests.
//!
//! # Usage
//!
//! ```no_run
//! use elfrun_elf::{Elf64, Image};
//! use elfrun_loader::host::{PosixLinker, PosixMemory};
//! use elfrun_loader::{Loader, X86_64};
//!
//! fn run(bytes: &[u8]) -> elfrun_loader::LoadError {
//!     let image = match Image::<Elf64>::parse(bytes) {
//!         Ok(image) => image,
//!         Err(e) => return e.into(),
//!     };
//!     let loader = Loader::new(PosixMemory, PosixLinker, X86_64);
//!     match loader.load_and_run(&image, &["prog"], &[]) {
//!         Ok(never) => match never {},
//!         Err(e) => e, // the jump does not return on success
//!     }
//! }
//! ```
//!
//! Out of scope: lazy PLT binding (everything binds eagerly), TLS,
//! `STT_GNU_IFUNC`, `DT_FLAGS` honoring, and recursive dependency
//! resolution (`DT_NEEDED` opens are delegated to the host linker, so the
//! program sees symbols in the host's scope).

pub mod arch;
pub mod dynamic;
pub mod error;
pub mod host;
pub mod loader;
pub mod mock;
pub mod needed;
pub mod os;
pub mod reloc;
pub mod segments;
pub mod stack;
pub mod versions;

pub use arch::{Arch, RelocError, X86_64};
pub use dynamic::{scan_dynamic, DynInfo};
pub use error::LoadError;
pub use loader::{
    default_search_prefixes, FsImageSource, ImageSource, LoadOptions, Loader, Prepared,
};
pub use needed::NeededLibraries;
pub use os::{HostLinker, MemoryAccess, MemoryMapper, Perms};
pub use segments::{load_segments, LoadedImage};
pub use stack::{allocate_stack, setup_stack, StackRegion, STACK_SIZE};
pub use versions::decode_version_names;
