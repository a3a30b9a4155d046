//! End-to-end load scenarios against the mock backends.
//!
//! Each test assembles a synthetic ELF64 image, runs the full load flow
//! short of the jump, and checks the observable state: mapped bytes,
//! final protections, patched relocation words, the startup frame, and
//! host-linker handle lifecycles.

use elfrun_elf::dynamic::{
    DT_INIT, DT_INIT_ARRAY, DT_INIT_ARRAYSZ, DT_JMPREL, DT_NEEDED, DT_NULL, DT_PLTREL,
    DT_PLTRELSZ, DT_RELA, DT_RELAENT, DT_RELASZ, DT_STRTAB, DT_SYMENT, DT_SYMTAB, DT_VERNEED,
    DT_VERNEEDNUM, DT_VERSYM,
};
use elfrun_elf::{Elf64, Image, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_INTERP, STB_GLOBAL, STB_WEAK};
use elfrun_loader::arch::x86_64::{R_X86_64_GLOB_DAT, R_X86_64_JUMP_SLOT};
use elfrun_loader::mock::{
    dyn64, rela64, sym64, vernaux, verneed, ElfBuilder, MockArch, MockImageSource, MockLinker,
    MockMemory,
};
use elfrun_loader::os::MemoryAccess;
use elfrun_loader::{LoadError, Loader, Perms};

type MockLoader = Loader<MockMemory, MockLinker, MockArch, MockImageSource>;

fn loader_with(linker: MockLinker) -> MockLoader {
    Loader::with_source(
        MockMemory::new(),
        linker,
        MockArch::new(),
        MockImageSource::new(),
    )
}

fn libc_linker() -> MockLinker {
    let mut linker = MockLinker::new();
    linker.add_library("/lib/libc.so.6");
    linker
}

fn splice(blob: &mut [u8], offset: usize, bytes: &[u8]) {
    blob[offset..offset + bytes.len()].copy_from_slice(bytes);
}

// ---------------------------------------------------------------------------
// Scenario: static ET_EXEC, one PT_LOAD
// ---------------------------------------------------------------------------

#[test]
fn static_exec_maps_payload_and_builds_frame() {
    let mut payload = vec![0x90u8; 16];
    payload.push(0xC3);

    let mut b = ElfBuilder::new_exec(0x40_0000);
    b.load_segment(0x40_0000, PF_R | PF_X, &payload, 0x1000, 0x1000);
    let bytes = b.build();
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    let loader = loader_with(MockLinker::new());
    let prepared = loader.load(&image, &["a"], &[]).unwrap();

    let mem = loader.mem();
    assert_eq!(prepared.entry, 0x40_0000);
    assert_eq!(mem.read_vec(0x40_0000, 1), vec![0x90]);
    assert_eq!(mem.read_vec(0x40_000F, 1), vec![0x90]);
    assert_eq!(mem.read_vec(0x40_0010, 1), vec![0xC3]);
    assert_eq!(mem.perms_at(0x40_0000), Some(Perms::READ | Perms::EXEC));

    // Startup frame: argc=1, argv[0]="a", NULL, envp NULL.
    let sp = prepared.stack_ptr;
    assert_eq!(sp % 16, 0);
    assert_eq!(mem.read_u64(sp), 1);
    assert_eq!(mem.read_cstr(mem.read_u64(sp + 8)), b"a");
    assert_eq!(mem.read_u64(sp + 16), 0);
    assert_eq!(mem.read_u64(sp + 24), 0);
}

#[test]
fn load_and_run_reaches_the_trampoline_with_prepared_state() {
    let mut b = ElfBuilder::new_exec(0x40_0000);
    b.load_segment(0x40_0000, PF_R | PF_X, &[0x90u8; 16], 0x1000, 0x1000);
    let bytes = b.build();
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    // MockArch panics instead of jumping; the panic message carries the
    // entry it was handed.
    let loader = loader_with(MockLinker::new());
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = loader.load_and_run(&image, &["a"], &[]);
    }));
    let payload = result.unwrap_err();
    let message = payload
        .downcast_ref::<String>()
        .expect("panic message is a String");
    assert!(message.contains("0x400000"), "unexpected message: {message}");
}

// ---------------------------------------------------------------------------
// Scenario: ET_DYN with two PT_LOAD segments
// ---------------------------------------------------------------------------

#[test]
fn pie_gets_bias_and_zeroed_bss() {
    let mut b = ElfBuilder::new_dyn(0x10);
    b.load_segment(0x0, PF_R | PF_X, &[0xCCu8; 0x1000], 0x1000, 0x1000);
    b.load_segment(0x2000, PF_R | PF_W, &[0xDDu8; 0x1000], 0x2000, 0x1000);
    let bytes = b.build();
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    let loader = loader_with(MockLinker::new());
    let prepared = loader.load(&image, &["pie"], &[]).unwrap();

    let mem = loader.mem();
    let bias = prepared.entry - 0x10;
    assert_ne!(bias, 0);
    assert_eq!(bias % 0x1000, 0);
    assert_eq!(mem.read_vec(bias, 4), vec![0xCC; 4]);
    assert_eq!(mem.read_vec(bias + 0x2000, 4), vec![0xDD; 4]);
    // The BSS tail of the data segment is zero.
    assert_eq!(mem.read_vec(bias + 0x3000, 0x1000), vec![0u8; 0x1000]);
    assert_eq!(mem.perms_at(bias + 0x2000), Some(Perms::READ | Perms::WRITE));
}

// ---------------------------------------------------------------------------
// Dynamic fixtures
// ---------------------------------------------------------------------------

/// Builds an `ET_DYN` image: text at vaddr 0, a data segment at vaddr
/// 0x1000 holding strtab (0x1000), symtab (0x1100), one relocation table
/// (0x1200), and a GOT slot (0x1800), plus a `PT_DYNAMIC` table. `libc_off`
/// is the strtab offset of the `DT_NEEDED` name. With `rela_is_plt` the
/// relocation table is wired as `DT_JMPREL`/`DT_PLTREL` instead of
/// `DT_RELA`.
fn dynamic_image(
    strtab: &[u8],
    libc_off: u64,
    syms: &[[u8; 24]],
    relas: &[[u8; 24]],
    extra_blob: &[(usize, Vec<u8>)],
    extra_dyn: &[[u8; 16]],
    rela_is_plt: bool,
) -> Vec<u8> {
    let mut blob = vec![0u8; 0x900];
    splice(&mut blob, 0, strtab);
    splice(&mut blob, 0x100, &syms.concat());
    splice(&mut blob, 0x200, &relas.concat());
    for (offset, bytes) in extra_blob {
        splice(&mut blob, *offset, bytes);
    }

    let rela_size = (relas.len() * 24) as u64;
    let mut dynamic = vec![
        dyn64(DT_NEEDED, libc_off),
        dyn64(DT_STRTAB, 0x1000),
        dyn64(DT_SYMTAB, 0x1100),
        dyn64(DT_SYMENT, 24),
    ];
    if rela_is_plt {
        dynamic.push(dyn64(DT_JMPREL, 0x1200));
        dynamic.push(dyn64(DT_PLTRELSZ, rela_size));
        dynamic.push(dyn64(DT_PLTREL, DT_RELA as u64));
    } else {
        dynamic.push(dyn64(DT_RELA, 0x1200));
        dynamic.push(dyn64(DT_RELASZ, rela_size));
        dynamic.push(dyn64(DT_RELAENT, 24));
    }
    dynamic.extend_from_slice(extra_dyn);
    dynamic.push(dyn64(DT_NULL, 0));
    let dynamic: Vec<u8> = dynamic.concat();

    let mut b = ElfBuilder::new_dyn(0x0);
    b.load_segment(0x0, PF_R | PF_X, &[0x90u8; 16], 0x1000, 0x1000);
    b.load_segment(0x1000, PF_R | PF_W, &blob, 0x1000, 0x1000);
    b.segment(PT_DYNAMIC, PF_R, 0x3000, &dynamic, dynamic.len() as u64, 8);
    b.build()
}

// ---------------------------------------------------------------------------
// Scenario: GLOB_DAT against a host symbol
// ---------------------------------------------------------------------------

#[test]
fn glob_dat_patches_host_stdout_address() {
    // strtab: 1 = "stdout", 8 = "libc.so.6"
    let bytes = dynamic_image(
        b"\0stdout\0libc.so.6\0",
        8,
        &[sym64(0, 0, 0, 0), sym64(1, STB_GLOBAL, 0, 0)],
        &[rela64(0x1800, 1, R_X86_64_GLOB_DAT, 0)],
        &[],
        &[],
        false,
    );
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    let mut linker = libc_linker();
    linker.add_symbol("stdout", 0x7f12_3456_7000);

    let loader = loader_with(linker);
    let prepared = loader.load(&image, &["dyn"], &[]).unwrap();

    let bias = prepared.entry; // e_entry is 0
    assert_eq!(loader.mem().read_u64(bias + 0x1800), 0x7f12_3456_7000);

    // libc was opened through a default prefix and released again before
    // the jump.
    assert_eq!(loader.linker().opened(), vec!["/lib/libc.so.6"]);
    assert_eq!(loader.linker().closed_count(), 1);
}

// ---------------------------------------------------------------------------
// Scenario: weak vs. strong unresolved symbols
// ---------------------------------------------------------------------------

#[test]
fn unresolved_weak_jump_slot_becomes_zero() {
    // strtab: 1 = "__foo", 7 = "libc.so.6"
    let bytes = dynamic_image(
        b"\0__foo\0libc.so.6\0",
        7,
        &[sym64(0, 0, 0, 0), sym64(1, STB_WEAK, 0, 0)],
        &[rela64(0x1800, 1, R_X86_64_JUMP_SLOT, 0)],
        // Pre-fill the slot in the file image so the zero write is
        // observable.
        &[(0x800, u64::MAX.to_le_bytes().to_vec())],
        &[],
        true,
    );
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    let loader = loader_with(libc_linker());
    let prepared = loader.load(&image, &["weak"], &[]).unwrap();

    let bias = prepared.entry;
    assert_eq!(loader.mem().read_u64(bias + 0x1800), 0);
}

#[test]
fn unresolved_strong_symbol_fails_the_load() {
    let bytes = dynamic_image(
        b"\0__foo\0libc.so.6\0",
        7,
        &[sym64(0, 0, 0, 0), sym64(1, STB_GLOBAL, 0, 0)],
        &[rela64(0x1800, 1, R_X86_64_JUMP_SLOT, 0)],
        &[],
        &[],
        true,
    );
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    let loader = loader_with(libc_linker());
    let err = loader.load(&image, &["strong"], &[]).unwrap_err();

    assert!(matches!(err, LoadError::UnresolvedSymbol(name) if name == "__foo"));
    // The needed-library handle was still released.
    assert_eq!(loader.linker().closed_count(), 1);
}

// ---------------------------------------------------------------------------
// Scenario: versioned symbol resolution
// ---------------------------------------------------------------------------

#[test]
fn versioned_symbol_resolves_through_specific_version() {
    // strtab: 1 = "pthread_create", 16 = "libc.so.6", 26 = "GLIBC_2.2.5"
    let strtab = b"\0pthread_create\0libc.so.6\0GLIBC_2.2.5\0";

    // versym at vaddr 0x1300 (blob 0x300): sym 0 -> 0, sym 1 -> index 2.
    let versym: Vec<u8> = [0u16, 2u16].iter().flat_map(|v| v.to_le_bytes()).collect();
    // verneed at vaddr 0x1400 (blob 0x400): one record, one aux naming
    // version index 2 as "GLIBC_2.2.5".
    let mut verneed_bytes = Vec::new();
    verneed_bytes.extend_from_slice(&verneed(1, 16, 0));
    verneed_bytes.extend_from_slice(&vernaux(2, 26, 0));

    let bytes = dynamic_image(
        strtab,
        16,
        &[sym64(0, 0, 0, 0), sym64(1, STB_GLOBAL, 0, 0)],
        &[rela64(0x1800, 1, R_X86_64_JUMP_SLOT, 0)],
        &[(0x300, versym), (0x400, verneed_bytes)],
        &[
            dyn64(DT_VERSYM, 0x1300),
            dyn64(DT_VERNEED, 0x1400),
            dyn64(DT_VERNEEDNUM, 1),
        ],
        true,
    );
    let image = Image::<Elf64>::parse(&bytes).unwrap();

    let mut linker = libc_linker();
    // The unversioned lookup would give the wrong answer; the versioned
    // one must be used.
    linker.add_symbol("pthread_create", 0x1111_0000);
    linker.add_versioned_symbol("pthread_create", "GLIBC_2.2.5", 0x2222_0000);

    let loader = loader_with(linker);
    let prepared = loader.load(&image, &["versioned"], &[]).unwrap();

    let bias = prepared.entry;
    assert_eq!(loader.mem().read_u64(bias + 0x1800), 0x2222_0000);
}

// ---------------------------------------------------------------------------
// Scenario: interpreter delegation
// ---------------------------------------------------------------------------

#[test]
fn interp_mode_loads_interpreter_and_skips_relocation() {
    let mut b = ElfBuilder::new_dyn(0x40);
    b.load_segment(0x0, PF_R | PF_X, &[0x90u8; 16], 0x1000, 0x1000);
    b.segment(PT_INTERP, PF_R, 0x2000, b"/lib64/ld-test.so\0", 18, 1);
    let prog_bytes = b.build();

    let mut interp = ElfBuilder::new_dyn(0x80);
    interp.load_segment(0x0, PF_R | PF_X, &[0xEEu8; 32], 0x1000, 0x1000);
    let interp_bytes = interp.build();

    let mut source = MockImageSource::new();
    source.add_image("/lib64/ld-test.so", interp_bytes);

    let mut loader = Loader::with_source(
        MockMemory::new(),
        MockLinker::new(),
        MockArch::new(),
        source,
    );
    loader.options.use_interp = true;

    let image = Image::<Elf64>::parse(&prog_bytes).unwrap();
    let prepared = loader.load(&image, &["prog"], &[]).unwrap();

    let mem = loader.mem();
    // The jump target is the interpreter's entry, not the program's.
    let interp_bias = prepared.entry - 0x80;
    assert_eq!(mem.read_vec(interp_bias, 4), vec![0xEE; 4]);

    // AT_BASE (key 7) carries the interpreter bias; AT_ENTRY (key 9) the
    // program entry. The auxv starts after argc, argv[0], NULL, NULL.
    let mut at_base = None;
    let mut at_entry = None;
    let mut at = prepared.stack_ptr + 8 * 4;
    loop {
        let key = mem.read_u64(at);
        let value = mem.read_u64(at + 8);
        match key {
            0 => break,
            7 => at_base = Some(value),
            9 => at_entry = Some(value),
            _ => {}
        }
        at += 16;
    }
    assert_eq!(at_base, Some(interp_bias));
    let program_bias = at_entry.expect("AT_ENTRY present") - 0x40;
    assert_eq!(mem.read_vec(program_bias, 4), vec![0x90; 4]);

    // No libraries were opened: linkage was delegated.
    assert!(loader.linker().opened().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: init hooks behind the option flag
// ---------------------------------------------------------------------------

#[test]
fn init_hooks_run_only_when_requested() {
    let init_array: Vec<u8> = [0x1500u64, 0, 0x1600u64]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let build = || {
        // strtab: 1 = "libc.so.6"; init array at vaddr 0x1700 (blob 0x700).
        dynamic_image(
            b"\0libc.so.6\0",
            1,
            &[sym64(0, 0, 0, 0)],
            &[],
            &[(0x700, init_array.clone())],
            &[
                dyn64(DT_INIT, 0x1440),
                dyn64(DT_INIT_ARRAY, 0x1700),
                dyn64(DT_INIT_ARRAYSZ, 24),
            ],
            false,
        )
    };

    // Default: hooks stay no-ops.
    let bytes = build();
    let image = Image::<Elf64>::parse(&bytes).unwrap();
    let loader = loader_with(libc_linker());
    loader.load(&image, &["noinit"], &[]).unwrap();
    assert!(loader.arch().init_calls().is_empty());

    // Opted in: DT_INIT first (biased), then the non-null DT_INIT_ARRAY
    // slots as stored (array entries hold already-relocated values).
    let bytes = build();
    let image = Image::<Elf64>::parse(&bytes).unwrap();
    let mut loader = loader_with(libc_linker());
    loader.options.run_init = true;
    let prepared = loader.load(&image, &["init"], &[]).unwrap();

    let bias = prepared.entry;
    assert_eq!(
        loader.arch().init_calls(),
        vec![bias + 0x1440, 0x1500, 0x1600]
    );
}
