//! Symbol version table decoding.
//!
//! Builds the map from `versym` index (`vna_other`) to version name by
//! walking the `verneed` linked list in loaded memory: `DT_VERNEEDNUM`
//! records chained by `vn_next`, each with `vn_cnt` aux records chained by
//! `vna_next`.

use std::collections::HashMap;

use elfrun_elf::version::{Vernaux, Verneed, VERNAUX_SIZE, VERNEED_SIZE};

use crate::dynamic::DynInfo;
use crate::os::MemoryAccess;

/// Decodes the version-name map from the loaded image.
///
/// Returns an empty map when the image carries no version tables.
#[must_use]
pub fn decode_version_names<M: MemoryAccess>(
    mem: &M,
    info: &DynInfo,
    bias: u64,
) -> HashMap<u16, String> {
    let mut names = HashMap::new();

    let (Some(_versym), Some(verneed), Some(strtab)) = (info.versym, info.verneed, info.strtab)
    else {
        return names;
    };

    let strtab = bias + strtab;
    let mut entry_addr = bias + verneed;

    for _ in 0..info.verneed_num {
        let mut rec = [0u8; VERNEED_SIZE];
        mem.read(entry_addr, &mut rec);
        let entry = Verneed::parse(&rec);

        let mut aux_addr = entry_addr + u64::from(entry.vn_aux);
        for _ in 0..entry.vn_cnt {
            let mut rec = [0u8; VERNAUX_SIZE];
            mem.read(aux_addr, &mut rec);
            let aux = Vernaux::parse(&rec);

            let name = mem.read_cstr(strtab + u64::from(aux.vna_name));
            names.insert(aux.vna_other, String::from_utf8_lossy(&name).into_owned());

            if aux.vna_next == 0 {
                break;
            }
            aux_addr += u64::from(aux.vna_next);
        }

        if entry.vn_next == 0 {
            break;
        }
        entry_addr += u64::from(entry.vn_next);
    }

    log::debug!("decoded {} symbol version names", names.len());
    names
}
