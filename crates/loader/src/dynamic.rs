//! Single-pass dynamic table walker.
//!
//! Scans the `PT_DYNAMIC` entries once and gathers every tag the linker
//! needs. Unknown tags are ignored, duplicate tags overwrite (last wins),
//! and the scan terminates at `DT_NULL`.

use elfrun_elf::dynamic::{
    DT_FINI, DT_FINI_ARRAY, DT_FINI_ARRAYSZ, DT_FLAGS, DT_FLAGS_1, DT_INIT, DT_INIT_ARRAY,
    DT_INIT_ARRAYSZ, DT_JMPREL, DT_NEEDED, DT_NULL, DT_PLTREL, DT_PLTRELSZ, DT_REL, DT_RELA,
    DT_RELAENT, DT_RELASZ, DT_RELENT, DT_RELSZ, DT_RPATH, DT_RUNPATH, DT_STRTAB, DT_SYMENT,
    DT_SYMTAB, DT_VERNEED, DT_VERNEEDNUM, DT_VERSYM,
};
use elfrun_elf::{ElfClass, Image, PT_DYNAMIC};

use crate::error::LoadError;

/// Everything the dynamic walker gathers from `PT_DYNAMIC`.
///
/// Addresses are unbiased virtual addresses as they appear in the file;
/// the relocation engine biases them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DynInfo {
    /// `DT_STRTAB`: dynamic string table address.
    pub strtab: Option<u64>,
    /// `DT_SYMTAB`: dynamic symbol table address.
    pub symtab: Option<u64>,
    /// `DT_SYMENT`: symbol record size (0 if absent).
    pub syment: u64,

    /// `DT_RELA`: relocation-with-addend table address.
    pub rela: Option<u64>,
    /// `DT_RELASZ`: total size of the `DT_RELA` table.
    pub rela_size: u64,
    /// `DT_RELAENT`: size of one `DT_RELA` record (0 if absent).
    pub rela_ent: u64,

    /// `DT_REL`: relocation-without-addend table address.
    pub rel: Option<u64>,
    /// `DT_RELSZ`: total size of the `DT_REL` table.
    pub rel_size: u64,
    /// `DT_RELENT`: size of one `DT_REL` record (0 if absent).
    pub rel_ent: u64,

    /// `DT_JMPREL`: PLT relocation table address.
    pub jmprel: Option<u64>,
    /// `DT_PLTRELSZ`: total size of the PLT relocation table.
    pub plt_rel_size: u64,
    /// `DT_PLTREL`: the PLT relocation kind (`DT_RELA` or `DT_REL`).
    pub plt_rel_type: i64,

    /// `DT_INIT`: initialization function address.
    pub init: Option<u64>,
    /// `DT_INIT_ARRAY`: initialization function array address.
    pub init_array: Option<u64>,
    /// `DT_INIT_ARRAYSZ`: initialization array size in bytes.
    pub init_array_size: u64,
    /// `DT_FINI`: termination function address.
    pub fini: Option<u64>,
    /// `DT_FINI_ARRAY`: termination function array address.
    pub fini_array: Option<u64>,
    /// `DT_FINI_ARRAYSZ`: termination array size in bytes.
    pub fini_array_size: u64,

    /// `DT_FLAGS` (gathered, not honored).
    pub flags: u64,
    /// `DT_FLAGS_1` (gathered, not honored).
    pub flags_1: u64,

    /// `DT_VERSYM`: symbol version table address.
    pub versym: Option<u64>,
    /// `DT_VERNEED`: version dependency table address.
    pub verneed: Option<u64>,
    /// `DT_VERNEEDNUM`: number of version dependency records.
    pub verneed_num: u64,

    /// `DT_NEEDED` library names, in table order.
    pub needed: Vec<String>,
    /// `DT_RPATH` search path, if present.
    pub rpath: Option<String>,
    /// `DT_RUNPATH` search path, if present.
    pub runpath: Option<String>,
}

impl DynInfo {
    /// Returns `true` if any relocation table is present.
    #[must_use]
    pub fn has_reloc_work(&self) -> bool {
        self.rela.is_some() || self.rel.is_some() || self.jmprel.is_some()
    }
}

/// Scans the first `PT_DYNAMIC` segment into a [`DynInfo`].
///
/// Returns an empty record if the image has no `PT_DYNAMIC` segment.
///
/// # Errors
///
/// Returns [`LoadError::MalformedDynamic`] if `DT_STRTAB` or `DT_SYMTAB`
/// is absent while relocation or needed-library work exists, and
/// [`LoadError::Elf`] if the table or a string runs out of bounds.
pub fn scan_dynamic<C: ElfClass>(image: &Image<'_, C>) -> Result<DynInfo, LoadError> {
    let Some(dynamic) = image
        .program_headers()
        .find(|phdr| phdr.p_type == PT_DYNAMIC)
    else {
        return Ok(DynInfo::default());
    };

    let mut info = DynInfo::default();

    // String values cannot be resolved mid-scan: DT_NEEDED may precede
    // DT_STRTAB. Raw offsets are collected and resolved afterwards.
    let mut needed_offsets = Vec::new();
    let mut rpath_offset = None;
    let mut runpath_offset = None;

    for index in 0u64.. {
        let entry = image.dyn_at(dynamic.p_offset + C::DYN_SIZE as u64 * index)?;
        let val = entry.d_val;

        match entry.d_tag {
            DT_NULL => break,

            DT_NEEDED => needed_offsets.push(val),
            DT_RPATH => rpath_offset = Some(val),
            DT_RUNPATH => runpath_offset = Some(val),

            DT_STRTAB => info.strtab = Some(val),
            DT_SYMTAB => info.symtab = Some(val),
            DT_SYMENT => info.syment = val,

            DT_RELA => info.rela = Some(val),
            DT_RELASZ => info.rela_size = val,
            DT_RELAENT => info.rela_ent = val,

            DT_REL => info.rel = Some(val),
            DT_RELSZ => info.rel_size = val,
            DT_RELENT => info.rel_ent = val,

            DT_JMPREL => info.jmprel = Some(val),
            DT_PLTRELSZ => info.plt_rel_size = val,
            #[expect(clippy::cast_possible_wrap, reason = "DT_PLTREL holds a tag value")]
            DT_PLTREL => info.plt_rel_type = val as i64,

            DT_INIT => info.init = Some(val),
            DT_INIT_ARRAY => info.init_array = Some(val),
            DT_INIT_ARRAYSZ => info.init_array_size = val,
            DT_FINI => info.fini = Some(val),
            DT_FINI_ARRAY => info.fini_array = Some(val),
            DT_FINI_ARRAYSZ => info.fini_array_size = val,

            DT_FLAGS => info.flags = val,
            DT_FLAGS_1 => info.flags_1 = val,

            DT_VERSYM => info.versym = Some(val),
            DT_VERNEED => info.verneed = Some(val),
            DT_VERNEEDNUM => info.verneed_num = val,

            _ => {} // Unknown tags are ignored.
        }
    }

    let has_work = info.has_reloc_work() || !needed_offsets.is_empty();
    if has_work && info.strtab.is_none() {
        return Err(LoadError::MalformedDynamic("missing DT_STRTAB"));
    }
    if has_work && info.symtab.is_none() {
        return Err(LoadError::MalformedDynamic("missing DT_SYMTAB"));
    }

    if let Some(strtab) = info.strtab {
        for offset in needed_offsets {
            info.needed
                .push(image.str_at_vaddr(strtab + offset)?.to_owned());
        }
        if let Some(offset) = rpath_offset {
            info.rpath = Some(image.str_at_vaddr(strtab + offset)?.to_owned());
        }
        if let Some(offset) = runpath_offset {
            info.runpath = Some(image.str_at_vaddr(strtab + offset)?.to_owned());
        }
    }

    log::debug!(
        "dynamic scan: {} needed, rela={:?} rel={:?} jmprel={:?}",
        info.needed.len(),
        info.rela,
        info.rel,
        info.jmprel,
    );

    Ok(info)
}
