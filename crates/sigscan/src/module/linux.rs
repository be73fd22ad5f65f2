use std::{
    ffi::{c_int, c_void, CStr, CString},
    fs::File,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    slice,
};

use memmap2::Mmap;

use super::{Module, ModuleError, Section};
use crate::{image::Image, Address};

/// A `dlopen` reference which keeps the object loaded
pub(crate) struct ModuleHandle {
    handle: NonNull<c_void>,
    /// difference between the addresses in the file and in memory
    bias: Address,
}

// SAFETY: a dlopen handle is a process wide reference, dlclose may be called from any thread
unsafe impl Send for ModuleHandle {}
// SAFETY: the handle is never used for anything but dlclose
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    /// `None` opens the main program
    fn open(path: Option<&Path>, bias: Address) -> Option<Self> {
        let path = match path {
            Some(path) => Some(CString::new(path.as_os_str().as_bytes()).ok()?),
            None => None,
        };

        let filename = path.as_ref().map_or(ptr::null(), |path| path.as_ptr());

        // increase refcount, but never load anything new
        // SAFETY: filename is null or a valid c string
        let handle = unsafe { libc::dlopen(filename, libc::RTLD_LAZY | libc::RTLD_NOLOAD) };

        NonNull::new(handle).map(|handle| Self { handle, bias })
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        // decrease refcount when done
        // SAFETY: handle came from a successful dlopen and is closed once
        _ = unsafe { libc::dlclose(self.handle.as_ptr()) };
    }
}

/// An entry of the dynamic linker's object list
struct LoadedObject {
    /// empty for the main program
    name: String,
    bias: Address,
    /// lowest mapped address
    base: Address,
}

impl LoadedObject {
    fn path(&self) -> Result<PathBuf, ModuleError> {
        if self.name.is_empty() {
            Ok(std::env::current_exe()?)
        } else {
            Ok(PathBuf::from(&self.name))
        }
    }

    fn into_module(self) -> Result<Option<Module>, ModuleError> {
        let path = self.path()?;
        let handle_path = (!self.name.is_empty()).then_some(path.as_path());

        // objects without a file (the vdso) can't be opened
        let Some(handle) = ModuleHandle::open(handle_path, self.bias) else {
            return Ok(None);
        };

        Ok(Some(Module::new(handle, self.base, path)))
    }
}

unsafe extern "C" fn collect(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> c_int {
    // SAFETY: data is the vec handed to dl_iterate_phdr, info is valid during the callback
    let (objects, info) = unsafe { (&mut *data.cast::<Vec<LoadedObject>>(), &*info) };

    let name = if info.dlpi_name.is_null() {
        String::new()
    } else {
        // SAFETY: a non-null name is a valid c string
        unsafe { CStr::from_ptr(info.dlpi_name) }
            .to_string_lossy()
            .into_owned()
    };

    let phdrs = if info.dlpi_phdr.is_null() {
        &[][..]
    } else {
        // SAFETY: the linker provides dlpi_phnum headers at dlpi_phdr
        unsafe { slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) }
    };

    let first_load = phdrs
        .iter()
        .filter(|phdr| phdr.p_type == libc::PT_LOAD)
        .map(|phdr| phdr.p_vaddr as Address)
        .min()
        .unwrap_or(0);

    let bias = info.dlpi_addr as Address;

    objects.push(LoadedObject {
        name,
        bias,
        base: bias.wrapping_add(first_load),
    });

    0
}

fn loaded_objects() -> Vec<LoadedObject> {
    let mut objects = Vec::new();

    // SAFETY: collect only touches the vec it is given
    unsafe {
        libc::dl_iterate_phdr(Some(collect), ptr::addr_of_mut!(objects).cast());
    }

    objects
}

pub(super) fn process_module() -> Result<Module, ModuleError> {
    // the main program is always the first entry, and the only one without a name
    let object = loaded_objects()
        .into_iter()
        .find(|object| object.name.is_empty())
        .ok_or(ModuleError::NoProcessModule)?;

    object.into_module()?.ok_or(ModuleError::NoProcessModule)
}

/// `name` is the full path the linker reports, or its file name
fn name_matches(object_name: &str, name: &str) -> bool {
    object_name == name || Path::new(object_name).file_name().is_some_and(|file| file == name)
}

pub(super) fn get_module(name: &str) -> Result<Option<Module>, ModuleError> {
    let mut main = None;

    for object in loaded_objects() {
        if object.name.is_empty() {
            main.get_or_insert(object);
            continue;
        }

        if name_matches(&object.name, name) {
            if let Some(module) = object.into_module()? {
                return Ok(Some(module));
            }
        }
    }

    // the main program is only known by the executable's path
    let Some(main) = main else {
        return Ok(None);
    };

    let Ok(exe) = std::env::current_exe() else {
        return Ok(None);
    };

    match exe.to_str() {
        Some(exe) if name_matches(exe, name) => main.into_module(),
        _ => Ok(None),
    }
}

pub(super) fn module_at(base: Address) -> Result<Option<Module>, ModuleError> {
    match loaded_objects().into_iter().find(|object| object.base == base) {
        Some(object) => object.into_module(),
        None => Ok(None),
    }
}

/// Reads the section headers from the file the module was loaded from
pub(super) fn sections(module: &Module) -> Result<Vec<Section>, ModuleError> {
    let file = File::open(module.path())?;
    // SAFETY: the map is only read, and a loaded object's file isn't rewritten in place
    let map = unsafe { Mmap::map(&file)? };
    let image = Image::parse(&map)?;

    let bias = module.handle.bias;

    let sections = image
        .sections()
        .iter()
        .filter(|section| section.address != 0 && section.size != 0)
        .filter_map(|section| {
            Some(Section {
                name: section.name.clone(),
                address: bias.wrapping_add(Address::try_from(section.address).ok()?),
                size: usize::try_from(section.size).ok()?,
            })
        })
        .collect();

    Ok(sections)
}
