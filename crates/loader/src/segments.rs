//! `PT_LOAD` segment mapping.
//!
//! Reserves the image's address range with a probe-then-unmap cycle, then
//! maps, copies, zero-fills, and protects each loadable segment. The
//! probe/unmap pair is a portable "find me a hole of size `range`"
//! primitive: the same OS call serves as the hole test and the hole
//! creation, at the cost of a small window between unmap and remap that is
//! acceptable because the loader is the only agent mutating the address
//! space.

use elfrun_elf::{ElfClass, Image, ProgramHeader, ET_EXEC, PT_LOAD};

use crate::error::LoadError;
use crate::os::{MemoryAccess, MemoryMapper, Perms};

/// Result of mapping all `PT_LOAD` segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    /// Value added to the image's virtual addresses to obtain runtime
    /// addresses: 0 for `ET_EXEC`, the reservation base for `ET_DYN`.
    pub bias: u64,
    /// Lowest mapped address of the image.
    pub min_addr: u64,
}

/// Address bounds of the image after alignment normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadPlan {
    min: u64,
    max: u64,
}

impl LoadPlan {
    fn range(self) -> u64 {
        self.max - self.min
    }
}

fn round_down(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value - value % align
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        round_down(value + align - 1, align)
    }
}

/// The aligned mapping start and length for one segment at `bias`.
fn aligned_span(phdr: &ProgramHeader, bias: u64) -> (u64, u64) {
    let load_addr = bias + phdr.p_vaddr;
    let start = round_down(load_addr, phdr.p_align);
    let len = round_up(phdr.p_memsz + (load_addr - start), phdr.p_align);
    (start, len)
}

/// Computes the image's address bounds from all `PT_LOAD` segments.
fn compute_plan<C: ElfClass>(image: &Image<'_, C>) -> Result<LoadPlan, LoadError> {
    let mut plan = None;

    for phdr in image.program_headers() {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let (start, len) = aligned_span(&phdr, 0);
        let plan = plan.get_or_insert(LoadPlan {
            min: u64::MAX,
            max: 0,
        });
        plan.min = plan.min.min(start);
        plan.max = plan.max.max(start + len);
    }

    plan.ok_or(LoadError::NoSegments)
}

/// Writes `len` zero bytes starting at `addr`.
fn zero_fill<M: MemoryAccess>(mem: &M, addr: u64, len: u64) {
    const ZEROES: [u8; 4096] = [0; 4096];
    let mut cursor = addr;
    let end = addr + len;
    while cursor < end {
        let chunk = (end - cursor).min(ZEROES.len() as u64);
        #[expect(clippy::cast_possible_truncation, reason = "chunk <= 4096")]
        mem.write(cursor, &ZEROES[..chunk as usize]);
        cursor += chunk;
    }
}

/// Maps all `PT_LOAD` segments of `image` and returns the load bias and
/// the lowest mapped address.
///
/// For `ET_EXEC` the exact address range is probed and the bias is 0; for
/// `ET_DYN` a contiguous OS-chosen reservation supplies the bias.
///
/// # Errors
///
/// Returns [`LoadError::NoSegments`] for an image without `PT_LOAD`
/// segments, [`LoadError::AddressConflict`] if an `ET_EXEC` range is
/// occupied, and [`LoadError::MapFailed`] / [`LoadError::UnmapFailed`] /
/// [`LoadError::ProtectFailed`] when an OS primitive fails.
pub fn load_segments<C: ElfClass, M: MemoryMapper + MemoryAccess>(
    image: &Image<'_, C>,
    mem: &M,
) -> Result<LoadedImage, LoadError> {
    let plan = compute_plan(image)?;
    let range = plan.range();

    let bias = if image.header().e_type == ET_EXEC {
        // Probe that the exact range is free, then release it for the
        // per-segment mappings below.
        let probe = mem
            .map_fixed(plan.min, range)
            .map_err(|_| LoadError::AddressConflict {
                addr: plan.min,
                len: range,
            })?;
        mem.unmap(probe, range).map_err(|source| LoadError::UnmapFailed {
            addr: probe,
            len: range,
            source,
        })?;
        0
    } else {
        let base = mem.map_random(range).map_err(|source| LoadError::MapFailed {
            addr: 0,
            len: range,
            source,
        })?;
        mem.unmap(base, range).map_err(|source| LoadError::UnmapFailed {
            addr: base,
            len: range,
            source,
        })?;
        base
    };

    let mut min_addr = u64::MAX;
    for phdr in image.program_headers() {
        if phdr.p_type != PT_LOAD {
            continue;
        }

        let load_addr = bias + phdr.p_vaddr;
        let (start, len) = aligned_span(&phdr, bias);

        mem.map_fixed(start, len).map_err(|source| LoadError::MapFailed {
            addr: start,
            len,
            source,
        })?;

        if phdr.p_filesz > 0 {
            mem.write(load_addr, image.bytes(phdr.p_offset, phdr.p_filesz)?);
        }
        if phdr.p_filesz < phdr.p_memsz {
            zero_fill(mem, load_addr + phdr.p_filesz, phdr.p_memsz - phdr.p_filesz);
        }

        let perms = Perms::from_p_flags(phdr.p_flags);
        mem.protect(start, len, perms)
            .map_err(|source| LoadError::ProtectFailed {
                addr: start,
                len,
                source,
            })?;

        log::debug!(
            "mapped segment {start:#x}..{:#x} (vaddr={:#x}, filesz={:#x}, {perms:?})",
            start + len,
            phdr.p_vaddr,
            phdr.p_filesz,
        );

        min_addr = min_addr.min(start);
    }

    Ok(LoadedImage { bias, min_addr })
}
