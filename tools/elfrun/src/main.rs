//! elfrun — run an ELF executable through the userspace loader.
//!
//! Maps the program's `PT_LOAD` segments, resolves its dynamic linkage
//! against the host's dynamic linker (or defers to the program's
//! `PT_INTERP` interpreter with `--interp`), builds a System V startup
//! stack, and jumps to the entry point. The jump does not return: on
//! success this process *becomes* the loaded program.

mod cli;
mod logger;

use anyhow::{Context, Result};
use clap::Parser;
use elfrun_elf::{Elf64, Image};
use elfrun_loader::host::{random_bytes, PosixLinker, PosixMemory};
use elfrun_loader::{default_search_prefixes, Loader, X86_64};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logger::init(args.verbose, args.quiet);

    let bytes =
        std::fs::read(&args.program).with_context(|| format!("reading {}", args.program))?;
    let image = Image::<Elf64>::parse(&bytes)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", args.program))?;

    let mut loader = Loader::new(PosixMemory, PosixLinker, X86_64);
    loader.options.use_interp = args.interp;
    loader.options.run_init = args.init;
    loader.options.stack_random = random_bytes();
    loader.options.search_prefixes = search_prefixes(&args.library_path);

    // argv[0] is the program path; the loaded program inherits this
    // process's environment (skipping non-UTF-8 entries).
    let mut argv = vec![args.program.as_str()];
    argv.extend(args.args.iter().map(String::as_str));
    let env: Vec<String> = std::env::vars_os()
        .filter_map(|(key, value)| Some(format!("{}={}", key.to_str()?, value.to_str()?)))
        .collect();
    let envp: Vec<&str> = env.iter().map(String::as_str).collect();

    let err = match loader.load_and_run(&image, &argv, &envp) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    Err(anyhow::Error::new(err).context(format!("loading {}", args.program)))
}

/// `-L` directories (slash-normalized, in order) followed by the default
/// prefixes.
fn search_prefixes(library_paths: &[String]) -> Vec<String> {
    let mut prefixes: Vec<String> = library_paths
        .iter()
        .map(|dir| {
            if dir.ends_with('/') {
                dir.clone()
            } else {
                format!("{dir}/")
            }
        })
        .collect();
    prefixes.extend(default_search_prefixes());
    prefixes
}
