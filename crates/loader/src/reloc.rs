//! The relocation engine.
//!
//! Assembles the work queue from the `DT_RELA`, `DT_REL`, and `DT_JMPREL`
//! tables, resolves each entry's symbol (with optional versioning and weak
//! semantics) against the host's default scope, and dispatches to the
//! injected architecture strategy. RELA items are applied first, then REL
//! items; within each kind, dynamic relocations precede PLT relocations in
//! file order.

use std::collections::HashMap;

use elfrun_elf::dynamic::{DT_REL, DT_RELA};
use elfrun_elf::version::{VER_NDX_GLOBAL, VER_NDX_LOCAL};
use elfrun_elf::{ElfClass, Symbol, STB_WEAK};

use crate::arch::Arch;
use crate::dynamic::DynInfo;
use crate::error::LoadError;
use crate::os::{HostLinker, MemoryAccess};

/// Biased addresses of the tables the engine reads symbols from.
struct Tables {
    symtab: u64,
    syment: u64,
    strtab: u64,
    versym: Option<u64>,
}

/// Applies every relocation of the image.
///
/// Addresses in `info` are unbiased; the engine biases them. No-op if the
/// image carries no relocation tables.
///
/// # Errors
///
/// Returns [`LoadError::MalformedDynamic`] if the symbol tables are
/// missing, [`LoadError::BadPltRelType`] for an unrecognized `DT_PLTREL`,
/// [`LoadError::UnresolvedSymbol`] for a strong symbol the host cannot
/// resolve, and [`LoadError::Relocation`] when the strategy rejects an
/// entry.
pub fn relocate<C, M, L, A>(
    info: &DynInfo,
    bias: u64,
    mem: &M,
    linker: &L,
    arch: &A,
    versions: &HashMap<u16, String>,
) -> Result<(), LoadError>
where
    C: ElfClass,
    M: MemoryAccess,
    L: HostLinker,
    A: Arch,
{
    if !info.has_reloc_work() {
        return Ok(());
    }

    let tables = Tables {
        symtab: bias
            + info
                .symtab
                .ok_or(LoadError::MalformedDynamic("missing DT_SYMTAB"))?,
        syment: if info.syment == 0 {
            C::SYM_SIZE as u64
        } else {
            info.syment
        },
        strtab: bias
            + info
                .strtab
                .ok_or(LoadError::MalformedDynamic("missing DT_STRTAB"))?,
        versym: info.versym.map(|versym| bias + versym),
    };

    // Record sizes default to the class layout when the entry-size tags
    // are absent.
    let rela_ent = if info.rela_ent == 0 {
        C::RELA_SIZE as u64
    } else {
        info.rela_ent
    };
    let rel_ent = if info.rel_ent == 0 {
        C::REL_SIZE as u64
    } else {
        info.rel_ent
    };

    // Work queues hold absolute record addresses, dynamic tables first.
    let mut rela_queue = Vec::new();
    let mut rel_queue = Vec::new();

    if let Some(rela) = info.rela {
        for i in 0..info.rela_size / rela_ent {
            rela_queue.push(bias + rela + rela_ent * i);
        }
    }
    if let Some(rel) = info.rel {
        for i in 0..info.rel_size / rel_ent {
            rel_queue.push(bias + rel + rel_ent * i);
        }
    }
    if let Some(jmprel) = info.jmprel {
        match info.plt_rel_type {
            DT_RELA => {
                for i in 0..info.plt_rel_size / rela_ent {
                    rela_queue.push(bias + jmprel + rela_ent * i);
                }
            }
            DT_REL => {
                for i in 0..info.plt_rel_size / rel_ent {
                    rel_queue.push(bias + jmprel + rel_ent * i);
                }
            }
            other => return Err(LoadError::BadPltRelType(other)),
        }
    }

    log::debug!(
        "applying {} RELA and {} REL relocations",
        rela_queue.len(),
        rel_queue.len(),
    );

    for record_addr in rela_queue {
        let mut buf = [0u8; 24];
        let rec = &mut buf[..C::RELA_SIZE];
        mem.read(record_addr, rec);
        let rela = C::parse_rela(rec);

        let (sym_index, r_type) = C::split_r_info(rela.r_info);
        let (sym, value) = resolve_symbol::<C, M, L>(mem, linker, &tables, versions, sym_index)?;

        let offset = bias + rela.r_offset;
        log::trace!("rela type {r_type} at {offset:#x} -> {value:#x}");
        arch.relocate_rela(mem, offset, r_type, value, rela.r_addend, &sym, bias)
            .map_err(|source| LoadError::Relocation { offset, source })?;
    }

    for record_addr in rel_queue {
        let mut buf = [0u8; 24];
        let rec = &mut buf[..C::REL_SIZE];
        mem.read(record_addr, rec);
        let rel = C::parse_rel(rec);

        let (sym_index, r_type) = C::split_r_info(rel.r_info);
        let (sym, value) = resolve_symbol::<C, M, L>(mem, linker, &tables, versions, sym_index)?;

        let offset = bias + rel.r_offset;
        log::trace!("rel type {r_type} at {offset:#x} -> {value:#x}");
        arch.relocate_rel(mem, offset, r_type, value, &sym, bias)
            .map_err(|source| LoadError::Relocation { offset, source })?;
    }

    Ok(())
}

/// Reads the symbol record for `sym_index` out of loaded memory and
/// resolves its value against the host scope.
///
/// Resolution rules: an empty name is a type-only relocation and resolves
/// to 0; a versioned name goes through the versioned lookup; a miss on a
/// weak symbol resolves to 0; a miss on anything else is fatal.
fn resolve_symbol<C: ElfClass, M: MemoryAccess, L: HostLinker>(
    mem: &M,
    linker: &L,
    tables: &Tables,
    versions: &HashMap<u16, String>,
    sym_index: u32,
) -> Result<(Symbol, u64), LoadError> {
    let mut buf = [0u8; 24];
    let rec = &mut buf[..C::SYM_SIZE];
    mem.read(tables.symtab + tables.syment * u64::from(sym_index), rec);
    let sym = C::parse_symbol(rec);

    let name_bytes = mem.read_cstr(tables.strtab + u64::from(sym.st_name));
    if name_bytes.is_empty() {
        return Ok((sym, 0));
    }
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    // versym index 0 (local) and 1 (base) carry no version name; anything
    // else indexes the verneed-derived map. An index absent from the map
    // falls back to unversioned lookup.
    let version = tables.versym.and_then(|versym| {
        let index = mem.read_u16(versym + 2 * u64::from(sym_index));
        match index {
            VER_NDX_LOCAL | VER_NDX_GLOBAL => None,
            other => versions.get(&other),
        }
    });

    let resolved = match version {
        Some(version) => linker.symbol_version(&name, version),
        None => linker.symbol(&name),
    };

    match resolved {
        Some(addr) => Ok((sym, addr)),
        None if sym.bind() == STB_WEAK => Ok((sym, 0)),
        None => Err(LoadError::UnresolvedSymbol(name)),
    }
}
