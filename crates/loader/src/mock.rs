//! Mock backends and synthetic-image builders.
//!
//! Everything here exists so the loader can be exercised end-to-end
//! without touching the real address space or the real dynamic linker:
//! [`MockMemory`] implements the mapper and access seams over owned
//! buffers, [`MockLinker`] serves a programmable symbol table,
//! [`MockArch`] records init calls and refuses to actually jump, and
//! [`ElfBuilder`] assembles small ELF64 images byte by byte.
//!
//! Out-of-bounds access through [`MockMemory`] panics with the offending
//! address, which turns loader bugs into test failures instead of silent
//! corruption.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io;

use elfrun_elf::{Symbol, ET_DYN, ET_EXEC, PT_LOAD};

use crate::arch::{Arch, RelocError, X86_64};
use crate::loader::ImageSource;
use crate::os::{HostLinker, MemoryAccess, MemoryMapper, Perms};

/// Base address for OS-chosen mappings, far from fixture vaddrs.
const RANDOM_BASE: u64 = 0x7f00_0000_0000;

/// Gap left between OS-chosen mappings.
const RANDOM_GAP: u64 = 0x10_000;

struct Region {
    base: u64,
    data: Vec<u8>,
    perms: Perms,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

struct State {
    regions: Vec<Region>,
    next_base: u64,
}

/// An in-memory address space honoring the mapper and access seams.
///
/// New regions are zero-filled, matching the fresh-anonymous-mapping
/// guarantee the loader relies on. `map_fixed` fails on overlap, which is
/// what powers the `ET_EXEC` conflict probe.
pub struct MockMemory {
    state: RefCell<State>,
}

impl MockMemory {
    /// Creates an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                regions: Vec::new(),
                next_base: RANDOM_BASE,
            }),
        }
    }

    /// Returns the number of live mappings.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.state.borrow().regions.len()
    }

    /// Returns the protection of the mapping containing `addr`.
    #[must_use]
    pub fn perms_at(&self, addr: u64) -> Option<Perms> {
        let state = self.state.borrow();
        state
            .regions
            .iter()
            .find(|region| region.contains(addr))
            .map(|region| region.perms)
    }

    /// Returns `true` if `addr` falls inside a live mapping.
    #[must_use]
    pub fn is_mapped(&self, addr: u64) -> bool {
        self.perms_at(addr).is_some()
    }

    /// Reads `len` bytes at `addr` into a fresh vector.
    ///
    /// # Panics
    ///
    /// Panics if any byte of the range is unmapped.
    #[must_use]
    pub fn read_vec(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf);
        buf
    }

    fn overlaps(state: &State, addr: u64, len: u64) -> bool {
        state
            .regions
            .iter()
            .any(|region| addr < region.end() && region.base < addr + len)
    }
}

impl Default for MockMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMapper for MockMemory {
    fn map_fixed(&self, addr: u64, len: u64) -> io::Result<u64> {
        let mut state = self.state.borrow_mut();
        if Self::overlaps(&state, addr, len) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "address range occupied",
            ));
        }
        state.regions.push(Region {
            base: addr,
            data: vec![0; usize::try_from(len).expect("mapping length fits usize")],
            perms: Perms::READ | Perms::WRITE,
        });
        Ok(addr)
    }

    fn map_random(&self, len: u64) -> io::Result<u64> {
        let base = self.state.borrow().next_base;
        self.state.borrow_mut().next_base = base + len.next_multiple_of(0x1000) + RANDOM_GAP;
        self.map_fixed(base, len)
    }

    fn unmap(&self, addr: u64, len: u64) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let index = state
            .regions
            .iter()
            .position(|region| region.base == addr && region.data.len() as u64 == len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a mapping"))?;
        state.regions.remove(index);
        Ok(())
    }

    fn protect(&self, addr: u64, len: u64, perms: Perms) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let region = state
            .regions
            .iter_mut()
            .find(|region| region.base <= addr && addr + len <= region.end())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a mapping"))?;
        region.perms = perms;
        Ok(())
    }
}

impl MemoryAccess for MockMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) {
        let state = self.state.borrow();
        let mut cursor = addr;
        let mut filled = 0;
        while filled < buf.len() {
            let region = state
                .regions
                .iter()
                .find(|region| region.contains(cursor))
                .unwrap_or_else(|| panic!("read of unmapped address {cursor:#x}"));
            let offset = usize::try_from(cursor - region.base).expect("offset fits usize");
            let chunk = (region.data.len() - offset).min(buf.len() - filled);
            buf[filled..filled + chunk].copy_from_slice(&region.data[offset..offset + chunk]);
            filled += chunk;
            cursor += chunk as u64;
        }
    }

    fn write(&self, addr: u64, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let mut cursor = addr;
        let mut written = 0;
        while written < bytes.len() {
            let region = state
                .regions
                .iter_mut()
                .find(|region| region.contains(cursor))
                .unwrap_or_else(|| panic!("write to unmapped address {cursor:#x}"));
            let offset = usize::try_from(cursor - region.base).expect("offset fits usize");
            let chunk = (region.data.len() - offset).min(bytes.len() - written);
            region.data[offset..offset + chunk].copy_from_slice(&bytes[written..written + chunk]);
            written += chunk;
            cursor += chunk as u64;
        }
    }
}

/// A host linker with a programmable library set and symbol table.
#[derive(Default)]
pub struct MockLinker {
    libraries: HashSet<String>,
    symbols: HashMap<String, u64>,
    versioned: HashMap<(String, String), u64>,
    opened: RefCell<Vec<String>>,
    closed: Cell<usize>,
}

impl MockLinker {
    /// Creates a linker that knows no libraries and no symbols.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a library path that [`HostLinker::open`] will accept.
    pub fn add_library(&mut self, path: &str) {
        self.libraries.insert(path.to_owned());
    }

    /// Registers an unversioned symbol.
    pub fn add_symbol(&mut self, name: &str, addr: u64) {
        self.symbols.insert(name.to_owned(), addr);
    }

    /// Registers a versioned symbol.
    pub fn add_versioned_symbol(&mut self, name: &str, version: &str, addr: u64) {
        self.versioned
            .insert((name.to_owned(), version.to_owned()), addr);
    }

    /// Returns the paths opened so far, in order.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }

    /// Returns how many handles have been released.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.closed.get()
    }
}

impl HostLinker for MockLinker {
    type Handle = String;

    fn open(&self, path: &str) -> Option<String> {
        if self.libraries.contains(path) {
            self.opened.borrow_mut().push(path.to_owned());
            Some(path.to_owned())
        } else {
            None
        }
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    fn symbol_version(&self, name: &str, version: &str) -> Option<u64> {
        self.versioned
            .get(&(name.to_owned(), version.to_owned()))
            .copied()
    }

    fn close(&self, _handle: String) {
        self.closed.set(self.closed.get() + 1);
    }
}

/// An architecture strategy that patches like [`X86_64`] but records init
/// calls and panics instead of transferring control.
#[derive(Default)]
pub struct MockArch {
    init_calls: RefCell<Vec<u64>>,
}

impl MockArch {
    /// Creates a recording strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the init-function addresses called so far, in order.
    #[must_use]
    pub fn init_calls(&self) -> Vec<u64> {
        self.init_calls.borrow().clone()
    }
}

impl Arch for MockArch {
    const MACHINE: u16 = <X86_64 as Arch>::MACHINE;

    fn relocate_rela<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        offset: u64,
        r_type: u32,
        value: u64,
        addend: i64,
        sym: &Symbol,
        bias: u64,
    ) -> Result<(), RelocError> {
        X86_64.relocate_rela(mem, offset, r_type, value, addend, sym, bias)
    }

    fn relocate_rel<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        offset: u64,
        r_type: u32,
        value: u64,
        sym: &Symbol,
        bias: u64,
    ) -> Result<(), RelocError> {
        X86_64.relocate_rel(mem, offset, r_type, value, sym, bias)
    }

    unsafe fn call_init(&self, addr: u64) {
        self.init_calls.borrow_mut().push(addr);
    }

    unsafe fn jump(&self, entry: u64, stack_ptr: u64) -> ! {
        panic!("mock jump to {entry:#x} with stack {stack_ptr:#x}")
    }
}

/// An image source serving interpreter bytes from a map instead of disk.
#[derive(Default)]
pub struct MockImageSource {
    images: HashMap<String, Vec<u8>>,
}

impl MockImageSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bytes served for `path`.
    pub fn add_image(&mut self, path: &str, bytes: Vec<u8>) {
        self.images.insert(path.to_owned(), bytes);
    }
}

impl ImageSource for MockImageSource {
    fn read_image(&self, path: &str) -> io::Result<Vec<u8>> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no image {path}")))
    }
}

// ---------------------------------------------------------------------------
// Synthetic ELF64 images
// ---------------------------------------------------------------------------

struct SegmentSpec {
    p_type: u32,
    p_flags: u32,
    p_vaddr: u64,
    data: Vec<u8>,
    p_memsz: u64,
    p_align: u64,
}

/// Builds small ELF64 little-endian images for tests.
///
/// Segments are declared with their payload; file offsets are assigned at
/// [`ElfBuilder::build`] time, headers first, payloads in declaration
/// order.
pub struct ElfBuilder {
    e_type: u16,
    e_machine: u16,
    entry: u64,
    segments: Vec<SegmentSpec>,
}

/// Size of the ELF64 file header.
const EHDR_SIZE: usize = 64;

/// Size of an ELF64 program header entry.
const PHDR_SIZE: usize = 56;

impl ElfBuilder {
    /// Starts an `ET_EXEC` image for `EM_X86_64`.
    #[must_use]
    pub fn new_exec(entry: u64) -> Self {
        Self {
            e_type: ET_EXEC,
            e_machine: 62,
            entry,
            segments: Vec::new(),
        }
    }

    /// Starts an `ET_DYN` image for `EM_X86_64`.
    #[must_use]
    pub fn new_dyn(entry: u64) -> Self {
        Self {
            e_type: ET_DYN,
            ..Self::new_exec(entry)
        }
    }

    /// Overrides the machine field (for validation-policy tests).
    pub fn set_machine(&mut self, machine: u16) {
        self.e_machine = machine;
    }

    /// Declares a segment of arbitrary type.
    pub fn segment(
        &mut self,
        p_type: u32,
        p_flags: u32,
        p_vaddr: u64,
        data: &[u8],
        p_memsz: u64,
        p_align: u64,
    ) {
        self.segments.push(SegmentSpec {
            p_type,
            p_flags,
            p_vaddr,
            data: data.to_vec(),
            p_memsz,
            p_align,
        });
    }

    /// Declares a `PT_LOAD` segment.
    pub fn load_segment(&mut self, p_vaddr: u64, p_flags: u32, data: &[u8], p_memsz: u64, p_align: u64) {
        self.segment(PT_LOAD, p_flags, p_vaddr, data, p_memsz, p_align);
    }

    /// Serializes the image.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut buf = vec![0u8; EHDR_SIZE];

        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2; // ELFCLASS64
        buf[5] = 1; // ELFDATA2LSB
        buf[6] = 1; // EI_VERSION
        buf[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        buf[18..20].copy_from_slice(&self.e_machine.to_le_bytes());
        buf[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
        buf[24..32].copy_from_slice(&self.entry.to_le_bytes());
        buf[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes()); // e_phoff
        buf[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
        buf[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        buf[56..58].copy_from_slice(&u16::try_from(phnum).expect("few segments").to_le_bytes());

        // Payloads follow the program header table, in declaration order.
        let mut payload_offset = (EHDR_SIZE + PHDR_SIZE * phnum) as u64;
        for spec in &self.segments {
            let mut phdr = [0u8; PHDR_SIZE];
            phdr[0..4].copy_from_slice(&spec.p_type.to_le_bytes());
            phdr[4..8].copy_from_slice(&spec.p_flags.to_le_bytes());
            phdr[8..16].copy_from_slice(&payload_offset.to_le_bytes());
            phdr[16..24].copy_from_slice(&spec.p_vaddr.to_le_bytes());
            phdr[32..40].copy_from_slice(&(spec.data.len() as u64).to_le_bytes());
            phdr[40..48].copy_from_slice(&spec.p_memsz.to_le_bytes());
            phdr[48..56].copy_from_slice(&spec.p_align.to_le_bytes());
            buf.extend_from_slice(&phdr);
            payload_offset += spec.data.len() as u64;
        }

        for spec in &self.segments {
            buf.extend_from_slice(&spec.data);
        }

        buf
    }
}

/// Serializes an ELF64 dynamic entry.
#[must_use]
pub fn dyn64(tag: i64, val: u64) -> [u8; 16] {
    let mut rec = [0u8; 16];
    rec[0..8].copy_from_slice(&tag.to_le_bytes());
    rec[8..16].copy_from_slice(&val.to_le_bytes());
    rec
}

/// Serializes an ELF64 symbol with the given binding.
#[must_use]
pub fn sym64(st_name: u32, bind: u8, st_shndx: u16, st_value: u64) -> [u8; 24] {
    let mut rec = [0u8; 24];
    rec[0..4].copy_from_slice(&st_name.to_le_bytes());
    rec[4] = bind << 4;
    rec[6..8].copy_from_slice(&st_shndx.to_le_bytes());
    rec[8..16].copy_from_slice(&st_value.to_le_bytes());
    rec
}

/// Serializes an ELF64 relocation with addend.
#[must_use]
pub fn rela64(r_offset: u64, sym: u32, r_type: u32, addend: i64) -> [u8; 24] {
    let mut rec = [0u8; 24];
    rec[0..8].copy_from_slice(&r_offset.to_le_bytes());
    let r_info = (u64::from(sym) << 32) | u64::from(r_type);
    rec[8..16].copy_from_slice(&r_info.to_le_bytes());
    rec[16..24].copy_from_slice(&addend.to_le_bytes());
    rec
}

/// Serializes an ELF64 relocation without addend.
#[must_use]
pub fn rel64(r_offset: u64, sym: u32, r_type: u32) -> [u8; 16] {
    let mut rec = [0u8; 16];
    rec[0..8].copy_from_slice(&r_offset.to_le_bytes());
    let r_info = (u64::from(sym) << 32) | u64::from(r_type);
    rec[8..16].copy_from_slice(&r_info.to_le_bytes());
    rec
}

/// Serializes a `verneed` record.
#[must_use]
pub fn verneed(vn_cnt: u16, vn_aux: u32, vn_next: u32) -> [u8; 16] {
    let mut rec = [0u8; 16];
    rec[0..2].copy_from_slice(&1u16.to_le_bytes()); // vn_version
    rec[2..4].copy_from_slice(&vn_cnt.to_le_bytes());
    rec[8..12].copy_from_slice(&vn_aux.to_le_bytes());
    rec[12..16].copy_from_slice(&vn_next.to_le_bytes());
    rec
}

/// Serializes a `vernaux` record.
#[must_use]
pub fn vernaux(vna_other: u16, vna_name: u32, vna_next: u32) -> [u8; 16] {
    let mut rec = [0u8; 16];
    rec[6..8].copy_from_slice(&vna_other.to_le_bytes());
    rec[8..12].copy_from_slice(&vna_name.to_le_bytes());
    rec[12..16].copy_from_slice(&vna_next.to_le_bytes());
    rec
}
