//! Opaque signature handles with explicit, idempotent release
//!
//! Callers on the far side of a foreign boundary can't hold a [`Signature`] directly.
//! Instead a signature is registered in a process wide table and referred to by a [`Handle`].
//! Releasing a handle twice, or using a released one, is harmless: lookups simply fail.

use std::{
    collections::HashMap,
    num::NonZeroU64,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, LazyLock, PoisonError, RwLock,
    },
};

use crate::{Signature, SignatureError};

/// Result codes reported across the boundary
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::Display)]
#[repr(C)]
pub enum Status {
    /// the operation was successful
    Success = 0,
    /// an error that fits no other category
    ErrUnknown = 1,
    /// the signature contained an invalid token
    SigInvalid = 2,
    /// the signature is empty
    SigEmpty = 3,
    /// the signature did not contain a known byte, only wildcards
    SigNoByte = 4,
}

impl From<&SignatureError> for Status {
    fn from(value: &SignatureError) -> Self {
        match value {
            SignatureError::Invalid => Status::SigInvalid,
            SignatureError::Empty => Status::SigEmpty,
            SignatureError::NoByte => Status::SigNoByte,
            SignatureError::LengthMismatch => Status::ErrUnknown,
        }
    }
}

impl From<SignatureError> for Status {
    fn from(value: SignatureError) -> Self {
        (&value).into()
    }
}

impl<T> From<&Result<T, SignatureError>> for Status {
    fn from(value: &Result<T, SignatureError>) -> Self {
        match value {
            Ok(_) => Status::Success,
            Err(e) => e.into(),
        }
    }
}

/// An opaque reference to a registered [`Signature`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// The raw id, never 0
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Rebuild a handle from a raw id. 0 is not a handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static SIGNATURES: LazyLock<RwLock<HashMap<Handle, Arc<Signature>>>> =
    LazyLock::new(Default::default);

/// Register a signature and get a handle to it
pub fn register(signature: Signature) -> Handle {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    // ids start at 1 and a u64 doesn't wrap in practice
    let handle = Handle(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN));

    SIGNATURES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(handle, Arc::new(signature));

    handle
}

/// Get the signature behind a handle, if it hasn't been released
///
/// The returned [`Arc`] stays valid even if the handle is released while it is in use.
pub fn lookup(handle: Handle) -> Option<Arc<Signature>> {
    SIGNATURES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&handle)
        .cloned()
}

/// Release a handle. Returns whether it was still registered.
pub fn release(handle: Handle) -> bool {
    SIGNATURES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&handle)
        .is_some()
}

/// A registered signature that is released when dropped
#[derive(Debug)]
pub struct OwnedHandle(Handle);

impl OwnedHandle {
    /// Register `signature`
    pub fn new(signature: Signature) -> Self {
        Self(register(signature))
    }

    /// The handle, still owned by `self`
    pub fn handle(&self) -> Handle {
        self.0
    }

    /// The signature
    pub fn signature(&self) -> Option<Arc<Signature>> {
        lookup(self.0)
    }

    /// Give up ownership without releasing; the caller must [`release`] it
    pub fn into_raw(self) -> Handle {
        let handle = self.0;
        std::mem::forget(self);
        handle
    }

    /// Release now instead of at scope end
    pub fn release(self) {
        // drop does it
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        release(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(text: &str) -> Signature {
        Signature::parse(text).unwrap()
    }

    #[test]
    fn release_is_idempotent() {
        let a = register(sig("48 8B"));
        let b = register(sig("CC"));

        assert!(release(a));
        assert!(!release(a));
        assert!(lookup(a).is_none());

        // others stay alive
        assert_eq!(lookup(b).as_deref(), Some(&sig("CC")));
        assert!(release(b));
    }

    #[test]
    fn released_while_in_use() {
        let handle = register(sig("90 90"));
        let in_use = lookup(handle).unwrap();

        release(handle);
        assert_eq!(in_use.len(), 2);
    }

    #[test]
    fn owned_handle_releases_on_drop() {
        let owned = OwnedHandle::new(sig("E8 ? ? ? ?"));
        let handle = owned.handle();
        assert!(lookup(handle).is_some());

        drop(owned);
        assert!(lookup(handle).is_none());
    }

    #[test]
    fn into_raw_keeps_registration() {
        let handle = OwnedHandle::new(sig("C3")).into_raw();
        assert!(lookup(handle).is_some());
        assert!(release(handle));
    }

    #[test]
    fn status_codes() {
        assert_eq!(Status::from(&Signature::parse("")), Status::SigEmpty);
        assert_eq!(Status::from(&Signature::parse("??")), Status::SigNoByte);
        assert_eq!(Status::from(&Signature::parse("GG")), Status::SigInvalid);
        assert_eq!(Status::from(&Signature::parse("48")), Status::Success);
        assert_eq!(Status::SigNoByte as i32, 4);
        assert_eq!(Handle::from_raw(0), None);
    }
}
