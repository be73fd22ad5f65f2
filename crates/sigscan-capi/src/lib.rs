//! C ABI for sigscan
//!
//! Signatures cross the boundary as opaque [`SigscanHandle`]s which must be released with
//! [`sigscan_free_signature`]. Module handles are module base addresses. Every "absent"
//! result (no match, no module, no section) is a null pointer. No function unwinds into the
//! caller; a panic is reported as [`Status::ErrUnknown`] or null.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

use std::{
    ffi::{c_char, c_void, CStr},
    panic::{self, AssertUnwindSafe},
    ptr, slice,
};

use sigscan::{
    handle::{self, Handle},
    module::{self, Module},
    scan::{self, Region, ScanAlignment},
    Address, Signature, SignatureError, Status,
};
use tracing::debug;

/// An opaque signature handle, `0` is null
pub type SigscanHandle = u64;

/// `align` value for every byte
pub const SIGSCAN_ALIGN_NONE: u32 = 0;
/// `align` value for 16 byte aligned start addresses
pub const SIGSCAN_ALIGN_16: u32 = 1;

fn alignment(value: u32) -> Option<ScanAlignment> {
    match value {
        SIGSCAN_ALIGN_NONE => Some(ScanAlignment::X1),
        SIGSCAN_ALIGN_16 => Some(ScanAlignment::X16),
        _ => None,
    }
}

/// Run `f`, turning a panic into `fallback`
fn guard<T>(name: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        debug!(function = name, "caught panic at the c boundary");
        fallback
    })
}

fn store(result: Result<Signature, SignatureError>, out: &mut SigscanHandle) -> Status {
    let status = Status::from(&result);
    *out = result.map_or(0, |signature| handle::register(signature).get());
    status
}

/// Parse an IDA-style signature like `48 8B 8D ? ? ? ? 48`
///
/// On success `*out` receives a handle, otherwise it is set to `0`.
///
/// # Safety
///
/// * `text` - is a valid pointer to a nul terminated string
///
/// * `out` - is a valid pointer to writable memory
#[no_mangle]
pub unsafe extern "C" fn sigscan_parse_signature(
    text: *const c_char,
    out: *mut SigscanHandle,
) -> Status {
    guard("sigscan_parse_signature", Status::ErrUnknown, || {
        // SAFETY: caller guarantees out is null or valid
        let Some(out) = (unsafe { out.as_mut() }) else {
            return Status::ErrUnknown;
        };

        *out = 0;

        if text.is_null() {
            return Status::ErrUnknown;
        }

        // SAFETY: caller guarantees text is a nul terminated string
        let text = unsafe { CStr::from_ptr(text) };
        let Ok(text) = text.to_str() else {
            return Status::SigInvalid;
        };

        store(Signature::parse(text), out)
    })
}

/// Create a signature from `size` data bytes and `size` mask bytes. A `0` mask byte is a wildcard.
///
/// On success `*out` receives a handle, otherwise it is set to `0`.
///
/// # Safety
///
/// * `bytes` - is valid for reads of `size` bytes
///
/// * `mask` - is valid for reads of `size` bytes
///
/// * `out` - is a valid pointer to writable memory
#[no_mangle]
pub unsafe extern "C" fn sigscan_create_signature(
    bytes: *const u8,
    mask: *const u8,
    size: usize,
    out: *mut SigscanHandle,
) -> Status {
    guard("sigscan_create_signature", Status::ErrUnknown, || {
        // SAFETY: caller guarantees out is null or valid
        let Some(out) = (unsafe { out.as_mut() }) else {
            return Status::ErrUnknown;
        };

        *out = 0;

        if size == 0 {
            return Status::SigEmpty;
        }

        if bytes.is_null() || mask.is_null() {
            return Status::ErrUnknown;
        }

        // SAFETY: caller guarantees both are valid for size bytes
        let (bytes, mask) = unsafe {
            (
                slice::from_raw_parts(bytes, size),
                slice::from_raw_parts(mask, size),
            )
        };

        store(Signature::from_bytes_and_mask(bytes, mask), out)
    })
}

/// Find the first match of a signature in `size` bytes at `buffer`
///
/// Returns the address of the match, or null if there is none, the handle was released,
/// or `align` is unknown.
///
/// # Safety
///
/// * `buffer` - is valid for reads of `size` bytes and not written to during the call
#[no_mangle]
pub unsafe extern "C" fn sigscan_find_pattern(
    signature: SigscanHandle,
    buffer: *const u8,
    size: usize,
    align: u32,
) -> *const u8 {
    guard("sigscan_find_pattern", ptr::null(), || {
        let Some(signature) = Handle::from_raw(signature).and_then(handle::lookup) else {
            return ptr::null();
        };

        let Some(alignment) = alignment(align) else {
            return ptr::null();
        };

        if buffer.is_null() {
            return ptr::null();
        }

        // SAFETY: caller guarantees buffer is valid for size bytes
        let region = unsafe { Region::from_raw(buffer, size) };

        match scan::find_first(&signature, &region, alignment) {
            Some(offset) => buffer.wrapping_add(offset),
            None => ptr::null(),
        }
    })
}

/// Find the first match of a signature in a section of a loaded module
///
/// `module` is a handle from [`sigscan_get_module`], or null for the main program.
/// Returns null when the module, the section or a match doesn't exist.
///
/// # Safety
///
/// * `section` - is a valid pointer to a nul terminated string
#[no_mangle]
pub unsafe extern "C" fn sigscan_find_pattern_mod(
    signature: SigscanHandle,
    module: *const c_void,
    section: *const c_char,
    align: u32,
) -> *const u8 {
    guard("sigscan_find_pattern_mod", ptr::null(), || {
        let Some(signature) = Handle::from_raw(signature).and_then(handle::lookup) else {
            return ptr::null();
        };

        let Some(alignment) = alignment(align) else {
            return ptr::null();
        };

        if section.is_null() {
            return ptr::null();
        }

        // SAFETY: caller guarantees section is a nul terminated string
        let Ok(section) = unsafe { CStr::from_ptr(section) }.to_str() else {
            return ptr::null();
        };

        let module = if module.is_null() {
            module::process_module().map(Some)
        } else {
            module::module_at(module as Address)
        };

        let module = match module {
            Ok(Some(module)) => module,
            Ok(None) => return ptr::null(),
            Err(e) => {
                debug!(error = %e, "module lookup failed");
                return ptr::null();
            }
        };

        match module::find_in_section(&signature, Some(&module), section, alignment) {
            Ok(Some(address)) => address as *const u8,
            Ok(None) => ptr::null(),
            Err(e) => {
                debug!(error = %e, module = %module.name(), section, "section lookup failed");
                ptr::null()
            }
        }
    })
}

/// Get a loaded module by file name, or the main program for null
///
/// The handle is the module's base address; null if the module isn't loaded.
///
/// # Safety
///
/// * `name` - is null or a valid pointer to a nul terminated string
#[no_mangle]
pub unsafe extern "C" fn sigscan_get_module(name: *const c_char) -> *const c_void {
    guard("sigscan_get_module", ptr::null(), || {
        let name = if name.is_null() {
            None
        } else {
            // SAFETY: caller guarantees name is a nul terminated string
            match unsafe { CStr::from_ptr(name) }.to_str() {
                Ok(name) => Some(name),
                Err(_) => return ptr::null(),
            }
        };

        match module::get_module(name) {
            Ok(module) => module.as_ref().map_or(ptr::null(), base_ptr),
            Err(e) => {
                debug!(error = %e, ?name, "module lookup failed");
                ptr::null()
            }
        }
    })
}

fn base_ptr(module: &Module) -> *const c_void {
    module.base() as *const c_void
}

/// Release a signature handle
///
/// Releasing `0`, an unknown handle or an already released handle does nothing.
#[no_mangle]
pub extern "C" fn sigscan_free_signature(signature: SigscanHandle) {
    guard("sigscan_free_signature", (), || {
        if let Some(handle) = Handle::from_raw(signature) {
            handle::release(handle);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;

    static BINARY: [u8; 10] = [0x00, 0x48, 0x8B, 0x8D, 0x12, 0x34, 0x56, 0x78, 0x48, 0x99];

    fn parse(text: &str) -> (Status, SigscanHandle) {
        let text = CString::new(text).unwrap();
        let mut handle = SigscanHandle::MAX;
        let status = unsafe { sigscan_parse_signature(text.as_ptr(), &mut handle) };
        (status, handle)
    }

    #[test]
    fn parse_and_find() {
        let (status, handle) = parse("48 8B 8D ? ? ? ? 48");
        assert_eq!(status, Status::Success);
        assert_ne!(handle, 0);

        let found = unsafe {
            sigscan_find_pattern(handle, BINARY.as_ptr(), BINARY.len(), SIGSCAN_ALIGN_NONE)
        };
        assert_eq!(found, BINARY[1..].as_ptr());

        // unknown alignment
        let found = unsafe { sigscan_find_pattern(handle, BINARY.as_ptr(), BINARY.len(), 7) };
        assert!(found.is_null());

        sigscan_free_signature(handle);
    }

    #[test]
    fn parse_errors_null_the_handle() {
        for (text, expected) in [
            ("", Status::SigEmpty),
            ("  ", Status::SigEmpty),
            ("??", Status::SigNoByte),
            ("4", Status::SigInvalid),
            ("GG", Status::SigInvalid),
        ] {
            assert_eq!(parse(text), (expected, 0), "{text:?}");
        }

        let mut handle = 0;
        let status = unsafe { sigscan_parse_signature(ptr::null(), &mut handle) };
        assert_eq!(status, Status::ErrUnknown);

        let text = CString::new("48").unwrap();
        let status = unsafe { sigscan_parse_signature(text.as_ptr(), ptr::null_mut()) };
        assert_eq!(status, Status::ErrUnknown);
    }

    #[test]
    fn create_matches_parse() {
        let mut handle = 0;
        let status = unsafe {
            sigscan_create_signature([0x10, 0x20].as_ptr(), [0xFF, 0x00].as_ptr(), 2, &mut handle)
        };
        assert_eq!(status, Status::Success);

        let created = handle::lookup(Handle::from_raw(handle).unwrap()).unwrap();
        assert_eq!(*created, Signature::parse("10 ?").unwrap());
        sigscan_free_signature(handle);

        let status = unsafe {
            sigscan_create_signature([0x10].as_ptr(), [0x00].as_ptr(), 1, &mut handle)
        };
        assert_eq!((status, handle), (Status::SigNoByte, 0));

        let status =
            unsafe { sigscan_create_signature(ptr::null(), ptr::null(), 0, &mut handle) };
        assert_eq!(status, Status::SigEmpty);
    }

    #[test]
    fn free_is_idempotent() {
        let (_, a) = parse("48 8B");
        let (_, b) = parse("8D");

        sigscan_free_signature(a);
        sigscan_free_signature(a);
        sigscan_free_signature(0);

        // released handles find nothing, others are unaffected
        let found = unsafe { sigscan_find_pattern(a, BINARY.as_ptr(), BINARY.len(), 0) };
        assert!(found.is_null());

        let found = unsafe { sigscan_find_pattern(b, BINARY.as_ptr(), BINARY.len(), 0) };
        assert_eq!(found, BINARY[3..].as_ptr());

        sigscan_free_signature(b);
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn module_section_scan() {
        let process = unsafe { sigscan_get_module(ptr::null()) };
        assert!(!process.is_null());

        let missing = CString::new("definitely-not-loaded-4242.so").unwrap();
        assert!(unsafe { sigscan_get_module(missing.as_ptr()) }.is_null());

        let text = module::process_module()
            .unwrap()
            .section(".text")
            .unwrap()
            .unwrap()
            .as_slice()[..8]
            .to_vec();

        let mut handle = 0;
        let mask = [0xFF; 8];
        let status =
            unsafe { sigscan_create_signature(text.as_ptr(), mask.as_ptr(), 8, &mut handle) };
        assert_eq!(status, Status::Success);

        let section = CString::new(".text").unwrap();
        let by_null = unsafe { sigscan_find_pattern_mod(handle, ptr::null(), section.as_ptr(), 0) };
        let by_handle = unsafe { sigscan_find_pattern_mod(handle, process, section.as_ptr(), 0) };
        assert!(!by_null.is_null());
        assert_eq!(by_null, by_handle);

        let nothing = CString::new(".definitely_not_a_section").unwrap();
        let found = unsafe { sigscan_find_pattern_mod(handle, ptr::null(), nothing.as_ptr(), 0) };
        assert!(found.is_null());

        sigscan_free_signature(handle);
    }
}
