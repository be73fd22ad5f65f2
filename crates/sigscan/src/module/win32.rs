use std::{
    iter,
    os::windows::prelude::OsStrExt,
    path::{Path, PathBuf},
};

use pelite::pe::{Pe, PeView};
use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{FreeLibrary, HMODULE},
        System::LibraryLoader::{GetModuleFileNameW, GetModuleHandleW, LoadLibraryW},
    },
};

use super::{Module, ModuleError, Section};
use crate::Address;

/// A handle based type which keeps the library loaded, which ensures the
/// base address is always correct as long as the handle exists
pub(crate) struct ModuleHandle(HMODULE);

// SAFETY: library refcounts are process wide, FreeLibrary may be called from any thread
unsafe impl Send for ModuleHandle {}
// SAFETY: the handle is only read
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    fn new(path: &Path) -> Result<Self, ModuleError> {
        let path = to_wide(path.as_os_str());

        // increase library refcount
        // SAFETY: path is a nul terminated wide string
        let module = unsafe { LoadLibraryW(PCWSTR(path.as_ptr()))? };

        Ok(Self(module))
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        // decrease library refcount when done
        // SAFETY: the refcount was increased in new
        _ = unsafe { FreeLibrary(self.0) };
    }
}

fn to_wide(value: &std::ffi::OsStr) -> Vec<u16> {
    value.encode_wide().chain(iter::once(0)).collect()
}

/// Longest path `GetModuleFileNameW` can return, in wide chars
const MAX_PATH_LEN: usize = 32 * 1024;

fn module_path(module: HMODULE) -> Result<Option<PathBuf>, ModuleError> {
    module_path_with(module, 1024)
}

fn module_path_with(module: HMODULE, capacity: usize) -> Result<Option<PathBuf>, ModuleError> {
    let mut buffer = vec![0; capacity.max(1)];

    loop {
        // SAFETY: buffer is a valid, writable slice
        let n = unsafe { GetModuleFileNameW(module, &mut buffer) } as usize;

        // also what an address which isn't a module base gets
        if n == 0 {
            return Ok(None);
        }

        // a full buffer means the path was truncated
        if n < buffer.len() {
            let path: PathBuf = String::from_utf16(&buffer[..n])?.into();
            return Ok(Some(path));
        }

        if buffer.len() >= MAX_PATH_LEN {
            return Ok(None);
        }

        buffer.resize(buffer.len() * 2, 0);
    }
}

fn from_hmodule(module: HMODULE) -> Result<Option<Module>, ModuleError> {
    let Some(path) = module_path(module)? else {
        return Ok(None);
    };

    let handle = ModuleHandle::new(&path)?;

    Ok(Some(Module::new(handle, module.0 as Address, path)))
}

pub(super) fn process_module() -> Result<Module, ModuleError> {
    // SAFETY: null asks for the process executable
    let module = unsafe { GetModuleHandleW(PCWSTR::null())? };

    from_hmodule(module)?.ok_or(ModuleError::NoProcessModule)
}

pub(super) fn get_module(name: &str) -> Result<Option<Module>, ModuleError> {
    let wide = to_wide(name.as_ref());

    // SAFETY: wide is a nul terminated wide string
    match unsafe { GetModuleHandleW(PCWSTR(wide.as_ptr())) } {
        Ok(module) => from_hmodule(module),
        // not loaded
        Err(_) => Ok(None),
    }
}

pub(super) fn module_at(base: Address) -> Result<Option<Module>, ModuleError> {
    from_hmodule(HMODULE(base as _))
}

/// Reads the section headers from the mapped image
pub(super) fn sections(module: &Module) -> Result<Vec<Section>, ModuleError> {
    let base = module.handle.0 .0 as Address;

    // SAFETY: the module is loaded and mapped as an image at base while the handle lives
    let view = unsafe { PeView::module(base as *const u8) };

    let sections = view
        .section_headers()
        .iter()
        .filter_map(|header| {
            let name = header.name().ok()?;

            Some(Section {
                name: name.to_owned(),
                address: base + header.VirtualAddress as Address,
                size: header.VirtualSize as usize,
            })
        })
        .filter(|section| section.size != 0)
        .collect();

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_path_buffer() {
        // SAFETY: null asks for the process executable
        let module = unsafe { GetModuleHandleW(PCWSTR::null()) }.unwrap();
        let exe = std::env::current_exe().unwrap();

        assert_eq!(module_path_with(module, 4).unwrap(), Some(exe.clone()));
        assert_eq!(module_path(module).unwrap(), Some(exe));
    }

    #[test]
    fn no_path_for_non_module() {
        assert!(module_path(HMODULE(8 as _)).unwrap().is_none());
    }
}
