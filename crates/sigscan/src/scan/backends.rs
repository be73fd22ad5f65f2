#[cfg(target_arch = "x86_64")]
mod avx2;
mod single;

use tracing::trace;

use super::{ScanContext, ScanMode};
use crate::Address;

/// A resolved scanning implementation
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Backend {
    Single,
    #[cfg(target_arch = "x86_64")]
    Avx2,
}

impl Backend {
    /// Find the first match starting at or after `from`
    pub(crate) fn find(
        self,
        context: &ScanContext<'_>,
        haystack: &[u8],
        base: Address,
        from: usize,
    ) -> Option<usize> {
        match self {
            Backend::Single => single::find(context, haystack, base, from),

            // SAFETY: only resolved when the cpu supports avx2
            #[cfg(target_arch = "x86_64")]
            Backend::Avx2 => unsafe { avx2::find(context, haystack, base, from) },
        }
    }
}

/// Pick the backend for a mode, falling back to [`Backend::Single`] when the requested one
/// can't be used on this cpu or with this signature
pub(crate) fn resolve(mode: ScanMode, context: &ScanContext<'_>) -> Backend {
    let backend = match mode {
        ScanMode::Single => Backend::Single,
        ScanMode::Auto | ScanMode::Avx2 => vectorized(context).unwrap_or(Backend::Single),
    };

    trace!(%mode, ?backend, "resolved scan backend");

    backend
}

#[cfg(target_arch = "x86_64")]
fn vectorized(context: &ScanContext<'_>) -> Option<Backend> {
    use super::ScanAlignment;

    let usable = context.anchor.is_some() && context.alignment == ScanAlignment::X1;

    (usable && is_x86_feature_detected!("avx2")).then_some(Backend::Avx2)
}

#[cfg(not(target_arch = "x86_64"))]
fn vectorized(_context: &ScanContext<'_>) -> Option<Backend> {
    None
}
