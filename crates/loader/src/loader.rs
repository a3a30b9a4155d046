//! Top-level load flow.
//!
//! Validate, map segments, then either load the `PT_INTERP` interpreter
//! (delegating all linkage to it) or walk the dynamic table, open the
//! needed libraries, and relocate in-process. Finally allocate the stack,
//! build the startup frame, and jump. Supported usage is "the load is the
//! entire process until it jumps": nothing else may mutate the address
//! space concurrently.

use std::convert::Infallible;
use std::io;

use elfrun_elf::{ElfClass, Image, ET_DYN, ET_EXEC, PT_INTERP};

use crate::arch::Arch;
use crate::dynamic::{self, DynInfo};
use crate::error::LoadError;
use crate::needed::{self, NeededLibraries};
use crate::os::{read_word, HostLinker, MemoryAccess, MemoryMapper};
use crate::reloc::relocate;
use crate::segments::load_segments;
use crate::stack::{allocate_stack, setup_stack};
use crate::versions::decode_version_names;

/// Default `DT_NEEDED` search prefixes, tried after `DT_RUNPATH` and
/// `DT_RPATH`.
#[must_use]
pub fn default_search_prefixes() -> Vec<String> {
    [
        "/lib/x86_64-linux-gnu/",
        "/usr/lib/x86_64-linux-gnu/",
        "/lib/",
        "/usr/lib/",
    ]
    .map(String::from)
    .to_vec()
}

/// Load-time configuration.
pub struct LoadOptions {
    /// Honor `PT_INTERP`: load the interpreter and jump to it instead of
    /// linking in-process.
    pub use_interp: bool,
    /// Invoke `DT_INIT` and the `DT_INIT_ARRAY` functions after
    /// relocation. Off by default.
    pub run_init: bool,
    /// Search prefixes for `DT_NEEDED` (each ending in `/`), tried after
    /// the image's own `DT_RUNPATH` / `DT_RPATH`.
    pub search_prefixes: Vec<String>,
    /// Entropy for `AT_RANDOM`. The host fills this; the loader has no
    /// entropy primitive of its own.
    pub stack_random: [u8; 16],
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_interp: false,
            run_init: false,
            search_prefixes: default_search_prefixes(),
            stack_random: [0; 16],
        }
    }
}

/// Opens ELF images by path (for the interpreter).
pub trait ImageSource {
    /// Reads the file at `path` into owned bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn read_image(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// The filesystem-backed [`ImageSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageSource;

impl ImageSource for FsImageSource {
    fn read_image(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// A load ready for control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepared {
    /// Jump target: the program entry, or the interpreter entry when
    /// `PT_INTERP` was honored.
    pub entry: u64,
    /// Stack pointer for the entry ABI (the address of `argc`).
    pub stack_ptr: u64,
}

/// The loader: injected OS, host-linker, and architecture strategies plus
/// load-time options.
pub struct Loader<M, L, A, S = FsImageSource> {
    mem: M,
    linker: L,
    arch: A,
    source: S,
    /// Load-time configuration.
    pub options: LoadOptions,
}

impl<M, L, A> Loader<M, L, A> {
    /// Creates a loader over the given strategies, reading interpreter
    /// images from the filesystem.
    pub fn new(mem: M, linker: L, arch: A) -> Self {
        Self {
            mem,
            linker,
            arch,
            source: FsImageSource,
            options: LoadOptions::default(),
        }
    }
}

impl<M, L, A, S> Loader<M, L, A, S>
where
    M: MemoryMapper + MemoryAccess,
    L: HostLinker,
    A: Arch,
    S: ImageSource,
{
    /// Creates a loader with a custom [`ImageSource`].
    pub fn with_source(mem: M, linker: L, arch: A, source: S) -> Self {
        Self {
            mem,
            linker,
            arch,
            source,
            options: LoadOptions::default(),
        }
    }

    /// Returns the memory strategy.
    pub fn mem(&self) -> &M {
        &self.mem
    }

    /// Returns the host-linker strategy.
    pub fn linker(&self) -> &L {
        &self.linker
    }

    /// Returns the architecture strategy.
    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Validation policy: the structural checks (magic, class, encoding)
    /// already passed at parse time; here the machine must match the
    /// architecture strategy and the type must be loadable.
    pub fn validate<C: ElfClass>(&self, image: &Image<'_, C>) -> bool {
        let header = image.header();
        header.e_machine == A::MACHINE && matches!(header.e_type, ET_EXEC | ET_DYN)
    }

    /// Runs the whole flow short of the jump: validate, map segments,
    /// link (or load the interpreter), allocate and fill the stack.
    ///
    /// Mappings created here are leaked into the running program — they
    /// are the program's memory. On error the address space is left as-is;
    /// the expected usage is a short-lived host process where OS teardown
    /// is the cleanup.
    ///
    /// # Errors
    ///
    /// Any [`LoadError`]; all are fatal to the load.
    pub fn load<C: ElfClass>(
        &self,
        image: &Image<'_, C>,
        argv: &[&str],
        envp: &[&str],
    ) -> Result<Prepared, LoadError> {
        if !self.validate(image) {
            return Err(LoadError::InvalidElf(
                "machine or type unsupported by this host",
            ));
        }

        let loaded = load_segments(image, &self.mem)?;
        let entry = loaded.bias + image.header().e_entry;
        log::info!(
            "loaded image: bias={:#x}, entry={entry:#x}, base={:#x}",
            loaded.bias,
            loaded.min_addr,
        );

        let mut interp_bias = 0;
        let mut target = entry;

        let interp_path = if self.options.use_interp {
            find_interpreter(image)?
        } else {
            None
        };

        if let Some(path) = interp_path {
            // The interpreter does its own relocation and then invokes the
            // program; skip the dynamic walk and relocation entirely.
            log::info!("delegating linkage to interpreter {path}");
            let bytes = self.source.read_image(&path).map_err(LoadError::Io)?;
            let interp_image = Image::<C>::parse(&bytes)?;
            let interp_loaded = load_segments(&interp_image, &self.mem)?;
            interp_bias = interp_loaded.bias;
            target = interp_bias + interp_image.header().e_entry;
        } else {
            let info = dynamic::scan_dynamic(image)?;
            let prefixes = needed::search_prefixes(&info, &self.options.search_prefixes);
            let needed = NeededLibraries::open_all(&self.linker, &info.needed, &prefixes)?;
            let versions = decode_version_names(&self.mem, &info, loaded.bias);
            relocate::<C, _, _, _>(
                &info,
                loaded.bias,
                &self.mem,
                &self.linker,
                &self.arch,
                &versions,
            )?;
            drop(needed);

            if self.options.run_init {
                self.run_init_hooks::<C>(&info, loaded.bias);
            }
        }

        let region = allocate_stack(&self.mem)?;
        let stack_ptr = setup_stack(
            &self.mem,
            &region,
            image,
            entry,
            interp_bias,
            loaded.min_addr,
            argv,
            envp,
            self.options.stack_random,
        );

        Ok(Prepared {
            entry: target,
            stack_ptr,
        })
    }

    /// Loads the image and transfers control. Does not return on success;
    /// the trampoline replaces this thread of execution with the program.
    ///
    /// # Errors
    ///
    /// Any [`LoadError`]; all are fatal to the load.
    pub fn load_and_run<C: ElfClass>(
        &self,
        image: &Image<'_, C>,
        argv: &[&str],
        envp: &[&str],
    ) -> Result<Infallible, LoadError> {
        let prepared = self.load(image, argv, envp)?;
        log::info!(
            "jumping to {:#x} with stack {:#x}",
            prepared.entry,
            prepared.stack_ptr,
        );
        // SAFETY: `entry` is the mapped entry of a validated, relocated
        // image (or its interpreter) and `stack_ptr` points at a complete
        // startup frame built above.
        unsafe { self.arch.jump(prepared.entry, prepared.stack_ptr) }
    }

    /// Calls `DT_INIT`, then each `DT_INIT_ARRAY` slot, at their biased
    /// addresses.
    fn run_init_hooks<C: ElfClass>(&self, info: &DynInfo, bias: u64) {
        if let Some(init) = info.init {
            log::debug!("calling DT_INIT at {:#x}", bias + init);
            // SAFETY: relocation is complete, so the init function is
            // mapped and patched.
            unsafe { self.arch.call_init(bias + init) };
        }
        if let Some(array) = info.init_array {
            let word = C::ADDR_SIZE as u64;
            for index in 0..info.init_array_size / word {
                let func = read_word::<C, M>(&self.mem, bias + array + word * index);
                if func != 0 {
                    log::debug!("calling DT_INIT_ARRAY[{index}] at {func:#x}");
                    // SAFETY: as above; array slots were relocated with
                    // the rest of the image.
                    unsafe { self.arch.call_init(func) };
                }
            }
        }
    }
}

/// Locates the first `PT_INTERP` segment and reads the interpreter path.
///
/// # Errors
///
/// Returns [`LoadError::Elf`] if the path string is out of bounds or
/// malformed.
fn find_interpreter<C: ElfClass>(image: &Image<'_, C>) -> Result<Option<String>, LoadError> {
    for phdr in image.program_headers() {
        if phdr.p_type == PT_INTERP {
            return Ok(Some(image.str_at(phdr.p_offset)?.to_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use elfrun_elf::{Elf64, PF_R, PF_X};

    use crate::mock::{ElfBuilder, MockArch, MockLinker, MockMemory};

    fn loader() -> Loader<MockMemory, MockLinker, MockArch> {
        Loader::new(MockMemory::new(), MockLinker::new(), MockArch::new())
    }

    #[test]
    fn validate_rejects_foreign_machine() {
        let mut b = ElfBuilder::new_exec(0x40_0000);
        b.set_machine(40); // EM_ARM
        b.load_segment(0x40_0000, PF_R | PF_X, &[0x90], 1, 0x1000);
        let bytes = b.build();
        let image = Image::<Elf64>::parse(&bytes).unwrap();

        let loader = loader();
        assert!(!loader.validate(&image));
        assert!(matches!(
            loader.load(&image, &[], &[]),
            Err(LoadError::InvalidElf(_))
        ));
    }

    #[test]
    fn finds_interpreter_path() {
        let mut b = ElfBuilder::new_exec(0x40_0000);
        b.load_segment(0x40_0000, PF_R | PF_X, &[0x90], 1, 0x1000);
        b.segment(PT_INTERP, PF_R, 0, b"/lib64/ld-linux-x86-64.so.2\0", 28, 1);
        let bytes = b.build();
        let image = Image::<Elf64>::parse(&bytes).unwrap();

        assert_eq!(
            find_interpreter(&image).unwrap().as_deref(),
            Some("/lib64/ld-linux-x86-64.so.2")
        );
    }

    #[test]
    fn no_interpreter_is_not_an_error() {
        let mut b = ElfBuilder::new_exec(0x40_0000);
        b.load_segment(0x40_0000, PF_R | PF_X, &[0x90], 1, 0x1000);
        let bytes = b.build();
        let image = Image::<Elf64>::parse(&bytes).unwrap();
        assert_eq!(find_interpreter(&image).unwrap(), None);
    }
}
