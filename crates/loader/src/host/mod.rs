//! Host-OS strategy implementations.

#[cfg(target_os = "linux")]
pub mod posix;

#[cfg(target_os = "linux")]
pub use posix::{random_bytes, PosixLinker, PosixMemory};
