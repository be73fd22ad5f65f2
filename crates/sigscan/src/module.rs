//! Modules loaded into the current process, and the sections inside them

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;
#[cfg(windows)]
mod win32;

#[cfg(target_os = "linux")]
use linux as sys;
#[cfg(not(any(target_os = "linux", windows)))]
use unsupported as sys;
#[cfg(windows)]
use win32 as sys;

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use tracing::trace;

use crate::{
    image::ImageError,
    scan::{self, Region, ScanAlignment},
    Address, Signature,
};

/// An error for the [module](crate::module) module
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// the module's backing file couldn't be read
    #[error(transparent)]
    Io(#[from] io::Error),
    /// the module's backing file couldn't be parsed
    #[error(transparent)]
    Image(#[from] ImageError),
    /// the main program isn't in the loaded module list
    #[error("current process module not found")]
    NoProcessModule,
    /// module lookup isn't implemented for this platform
    #[error("modules are not supported on this platform")]
    Unsupported,
    #[cfg(windows)]
    #[allow(missing_docs)]
    #[error(transparent)]
    Utf16Conversion(#[from] std::string::FromUtf16Error),
    #[cfg(windows)]
    #[allow(missing_docs)]
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
}

/// A section of a loaded module, relocated to where it lives in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// section name, e.g. `.text`
    pub name: String,
    /// address of the first byte in memory
    pub address: Address,
    /// size in memory
    pub size: usize,
}

/// A module loaded in the current process
///
/// The module is kept loaded for as long as this exists, so its base address and
/// sections stay valid.
pub struct Module {
    handle: sys::ModuleHandle,
    base: Address,
    path: PathBuf,
    name: String,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("base", &format_args!("{:#x}", self.base))
            .field("path", &self.path)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Module {{ base: {:#x}, path: {}, name: {} }}",
            self.base,
            self.path.display(),
            self.name
        )
    }
}

impl Module {
    fn new(handle: sys::ModuleHandle, base: Address, path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            handle,
            base,
            path,
            name,
        }
    }

    /// Address of the module's first mapped byte
    pub fn base(&self) -> Address {
        self.base
    }

    /// Path of the file the module was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the module, e.g. `libc.so.6` or `kernel32.dll`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All sections which are mapped into memory
    pub fn sections(&self) -> Result<Vec<Section>, ModuleError> {
        sys::sections(self)
    }

    /// The in-memory bytes of section `name`, or `None` if the module has no such section
    pub fn section(&self, name: &str) -> Result<Option<Region<'_>>, ModuleError> {
        let Some(section) = self.sections()?.into_iter().find(|s| s.name == name) else {
            return Ok(None);
        };

        trace!(
            module = %self.name,
            section = name,
            address = section.address,
            size = section.size,
            "resolved section"
        );

        // SAFETY: the section is mapped for as long as the module is loaded, and `self`
        //         keeps it loaded for the lifetime of the region
        let region = unsafe { Region::from_raw(section.address as *const u8, section.size) };

        Ok(Some(region))
    }
}

/// The main program of the current process
pub fn process_module() -> Result<Module, ModuleError> {
    sys::process_module()
}

/// A loaded module by file name, or the main program for `None`
///
/// A module that isn't loaded is `Ok(None)`.
pub fn get_module(name: Option<&str>) -> Result<Option<Module>, ModuleError> {
    match name {
        Some(name) => sys::get_module(name),
        None => process_module().map(Some),
    }
}

/// The loaded module whose base address is `base`
pub fn module_at(base: Address) -> Result<Option<Module>, ModuleError> {
    sys::module_at(base)
}

/// Find the first match of `signature` in section `section` of `module`
///
/// `None` searches the main program. A missing section is `Ok(None)`, same as no match.
pub fn find_in_section(
    signature: &Signature,
    module: Option<&Module>,
    section: &str,
    alignment: ScanAlignment,
) -> Result<Option<Address>, ModuleError> {
    let process;
    let module = match module {
        Some(module) => module,
        None => {
            process = process_module()?;
            &process
        }
    };

    let Some(region) = module.section(section)? else {
        return Ok(None);
    };

    let found = scan::find_first(signature, &region, alignment);
    Ok(found.map(|offset| region.address_of(offset)))
}

#[cfg(all(test, any(target_os = "linux", windows)))]
mod tests {
    use super::*;

    #[test]
    fn process_module_text() {
        let module = process_module().unwrap();
        assert_ne!(module.base(), 0);
        assert_eq!(
            module.path().file_name(),
            std::env::current_exe().unwrap().file_name()
        );

        let text = module.section(".text").unwrap().expect("text section");
        assert!(!text.is_empty());

        let head = &text.as_slice()[..16.min(text.len())];
        let sig = Signature::from_bytes(head).unwrap();
        assert_eq!(scan::find_first(&sig, &text, ScanAlignment::X1), Some(0));

        let found = find_in_section(&sig, None, ".text", ScanAlignment::X1).unwrap();
        assert_eq!(found, Some(text.base()));
    }

    #[test]
    fn missing_section() {
        let module = process_module().unwrap();
        assert!(module.section(".definitely_not_a_section").unwrap().is_none());

        let sig = Signature::parse("90").unwrap();
        let found =
            find_in_section(&sig, Some(&module), ".definitely_not_a_section", ScanAlignment::X1);
        assert_eq!(found.unwrap(), None);
    }

    #[test]
    fn missing_module() {
        assert!(get_module(Some("definitely-not-loaded-4242.so")).unwrap().is_none());
    }

    #[test]
    fn lookup_by_name_and_base() {
        let process = process_module().unwrap();

        let by_name = get_module(Some(process.name())).unwrap().unwrap();
        assert_eq!(by_name.base(), process.base());

        let by_base = module_at(process.base()).unwrap().unwrap();
        assert_eq!(by_base.path(), process.path());

        assert!(get_module(None).unwrap().is_some());
    }
}
