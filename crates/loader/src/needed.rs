//! `DT_NEEDED` library opening.
//!
//! Dependency resolution is delegated to the host dynamic linker: each
//! needed name is opened lazily into the global scope so that the
//! relocation engine's symbol lookups can see it. Handles are held in an
//! RAII guard and released on every exit path.

use crate::dynamic::DynInfo;
use crate::error::LoadError;
use crate::os::HostLinker;

/// Assembles the search prefix list: `DT_RUNPATH`, then `DT_RPATH`, then
/// the caller-supplied defaults. The dynamic paths get a trailing slash;
/// callers supply theirs with one already.
#[must_use]
pub fn search_prefixes(info: &DynInfo, defaults: &[String]) -> Vec<String> {
    let mut prefixes = Vec::with_capacity(defaults.len() + 2);
    if let Some(runpath) = info.runpath.as_deref() {
        if !runpath.is_empty() {
            prefixes.push(format!("{runpath}/"));
        }
    }
    if let Some(rpath) = info.rpath.as_deref() {
        if !rpath.is_empty() {
            prefixes.push(format!("{rpath}/"));
        }
    }
    prefixes.extend(defaults.iter().cloned());
    prefixes
}

/// Host-linker handles for the image's `DT_NEEDED` libraries.
///
/// Dropping the guard releases every handle, whether relocation succeeded
/// or not. Releasing before the jump is fine: the symbol values are
/// already patched into the image.
pub struct NeededLibraries<'l, L: HostLinker> {
    linker: &'l L,
    handles: Vec<L::Handle>,
}

impl<'l, L: HostLinker> std::fmt::Debug for NeededLibraries<'l, L>
where
    L::Handle: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeededLibraries")
            .field("handles", &self.handles)
            .finish()
    }
}

impl<'l, L: HostLinker> NeededLibraries<'l, L> {
    /// Opens every name in `needed`, trying each prefix in order.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::MissingDependency`] for the first name no
    /// prefix can open. Libraries opened up to that point are released by
    /// the guard's drop.
    pub fn open_all(
        linker: &'l L,
        needed: &[String],
        prefixes: &[String],
    ) -> Result<Self, LoadError> {
        let mut guard = Self {
            linker,
            handles: Vec::with_capacity(needed.len()),
        };

        for name in needed {
            let handle = prefixes
                .iter()
                .find_map(|prefix| linker.open(&format!("{prefix}{name}")));
            match handle {
                Some(handle) => {
                    log::debug!("opened needed library {name}");
                    guard.handles.push(handle);
                }
                None => return Err(LoadError::MissingDependency(name.clone())),
            }
        }

        Ok(guard)
    }

    /// Returns how many libraries are held open.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no libraries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<L: HostLinker> Drop for NeededLibraries<'_, L> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.linker.close(handle);
        }
    }
}
