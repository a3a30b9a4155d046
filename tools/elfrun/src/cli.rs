//! Command-line interface definitions for elfrun.

use clap::Parser;

/// Userspace ELF loader: map, link, and run an ELF executable in-process.
#[derive(Parser)]
#[command(name = "elfrun", version, about)]
pub struct Cli {
    /// Path to the ELF executable or shared object to run.
    pub program: String,

    /// Arguments passed to the loaded program (use `--` before arguments
    /// that start with a dash).
    pub args: Vec<String>,

    /// Honor PT_INTERP: load the program's interpreter and let it do the
    /// linking.
    #[arg(long)]
    pub interp: bool,

    /// Invoke DT_INIT and the DT_INIT_ARRAY functions after relocation.
    #[arg(long)]
    pub init: bool,

    /// Extra DT_NEEDED search directory, tried after the image's own
    /// DT_RUNPATH / DT_RPATH (repeatable).
    #[arg(long = "library-path", short = 'L', value_name = "DIR")]
    pub library_path: Vec<String>,

    /// Enable verbose output (repeat for trace-level detail).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Show errors only.
    #[arg(long, short = 'q')]
    pub quiet: bool,
}
