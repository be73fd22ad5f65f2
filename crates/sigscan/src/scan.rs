//! This module allows one to scan memory for signatures

mod anchor;
mod backends;
mod region;

use std::iter::FusedIterator;

use tracing::trace;

use crate::{Address, Signature};

pub(crate) use self::anchor::Anchor;
pub use self::region::{Match, Region};

/// Which start addresses are considered for a match
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanAlignment {
    /// every byte
    #[default]
    #[strum(to_string = "x1", serialize = "none")]
    X1,
    /// only addresses that are a multiple of 16
    #[strum(to_string = "x16", serialize = "align16")]
    X16,
}

impl ScanAlignment {
    /// The distance between two candidate addresses
    pub const fn stride(self) -> usize {
        match self {
            ScanAlignment::X1 => 1,
            ScanAlignment::X16 => 16,
        }
    }
}

/// Knowledge about the scanned data which helps pick a better anchor
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ScanHint {
    /// nothing is known
    #[default]
    #[strum(serialize = "none")]
    None,
    /// the data is x86-64 machine code
    #[strum(to_string = "x86-64", serialize = "x86_64")]
    X86_64,
}

/// Scanning backend selection
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanMode {
    /// pick the fastest backend the cpu supports
    #[default]
    #[strum(serialize = "auto")]
    Auto,
    /// byte at a time anchor search
    #[strum(serialize = "single")]
    Single,
    /// 32 bytes at a time anchor search
    #[strum(serialize = "avx2")]
    Avx2,
}

/// Everything a backend needs for one signature
#[derive(Debug, Clone)]
pub(crate) struct ScanContext<'s> {
    pub(crate) signature: &'s Signature,
    pub(crate) alignment: ScanAlignment,
    pub(crate) anchor: Option<Anchor>,
}

impl ScanContext<'_> {
    /// The last offset a match may start at
    #[inline]
    pub(crate) fn last_start(&self, haystack: &[u8]) -> Option<usize> {
        haystack.len().checked_sub(self.signature.len())
    }

    /// First offset at or after `from` which is a candidate for the alignment
    #[inline]
    pub(crate) fn first_candidate(&self, base: Address, from: usize) -> usize {
        let stride = self.alignment.stride();
        let misalign = base.wrapping_add(from) % stride;

        if misalign == 0 {
            from
        } else {
            from + (stride - misalign)
        }
    }

    #[inline]
    pub(crate) fn verify(&self, haystack: &[u8], start: usize) -> bool {
        self.signature.matches(&haystack[start..])
    }
}

/// A reusable, configured signature scanner
///
/// # Example
///
/// ```rust
/// # use sigscan::{scan::{Region, ScanAlignment, Scanner}, Signature};
/// let binary = [0xab, 0xec, 0x48, 0x89, 0x5c, 0x24, 0xee, 0x48, 0x89, 0x6c];
/// let signature = Signature::parse("48 89 ?").unwrap();
///
/// let scanner = Scanner::new(&signature).alignment(ScanAlignment::X1);
/// let all = scanner.find_all(&Region::new(&binary)).collect::<Vec<_>>();
///
/// assert_eq!(all, [2, 7]);
/// ```
#[derive(Debug, Clone)]
pub struct Scanner<'s> {
    signature: &'s Signature,
    alignment: ScanAlignment,
    hint: ScanHint,
    mode: ScanMode,
}

impl<'s> Scanner<'s> {
    /// Create a scanner with default options (no alignment, no hint, auto backend)
    pub fn new(signature: &'s Signature) -> Self {
        Self {
            signature,
            alignment: ScanAlignment::X1,
            hint: ScanHint::None,
            mode: ScanMode::Auto,
        }
    }

    /// Set the alignment of match start addresses
    pub fn alignment(mut self, alignment: ScanAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the hint about the scanned data
    pub fn hint(mut self, hint: ScanHint) -> Self {
        self.hint = hint;
        self
    }

    /// Force a backend
    pub fn mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// The signature being searched for
    pub fn signature(&self) -> &'s Signature {
        self.signature
    }

    fn context(&self) -> ScanContext<'s> {
        let anchor = Anchor::select(self.signature, self.alignment, self.hint);
        trace!(
            signature = %self.signature,
            ?anchor,
            alignment = %self.alignment,
            "selected anchor"
        );

        ScanContext {
            signature: self.signature,
            alignment: self.alignment,
            anchor,
        }
    }

    /// Find the lowest offset in `region` where the signature matches
    pub fn find_first(&self, region: &Region<'_>) -> Option<usize> {
        let context = self.context();
        let backend = backends::resolve(self.mode, &context);
        backend.find(&context, region.as_slice(), region.base(), 0)
    }

    /// Like [`Scanner::find_first`], but keeps the region around for address math
    pub fn find_match<'a>(&self, region: &Region<'a>) -> Option<Match<'a>> {
        self.find_first(region).map(|offset| Match::new(*region, offset))
    }

    /// Lazily find every match in ascending order
    ///
    /// After a match at `i` the search continues at the next candidate after `i`.
    /// Calling this again starts over from the beginning of the region.
    pub fn find_all<'a>(&self, region: &Region<'a>) -> Matches<'s, 'a> {
        let context = self.context();
        let backend = backends::resolve(self.mode, &context);

        Matches {
            context,
            backend,
            region: *region,
            next: Some(0),
        }
    }
}

/// Iterator over every match of a signature in a region
#[derive(Debug, Clone)]
pub struct Matches<'s, 'a> {
    context: ScanContext<'s>,
    backend: backends::Backend,
    region: Region<'a>,
    next: Option<usize>,
}

impl Iterator for Matches<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;

        let found = self.backend.find(
            &self.context,
            self.region.as_slice(),
            self.region.base(),
            from,
        );

        self.next = found.map(|offset| offset + self.context.alignment.stride());
        found
    }
}

impl FusedIterator for Matches<'_, '_> {}

/// Find the first occurrence of `signature` in `region`
///
/// The returned offset is relative to the start of the region.
pub fn find_first(
    signature: &Signature,
    region: &Region<'_>,
    alignment: ScanAlignment,
) -> Option<usize> {
    Scanner::new(signature)
        .alignment(alignment)
        .find_first(region)
}

/// Find every occurrence of `signature` in `region`, in ascending order
pub fn find_all<'s, 'a>(
    signature: &'s Signature,
    region: &Region<'a>,
    alignment: ScanAlignment,
) -> Matches<'s, 'a> {
    Scanner::new(signature).alignment(alignment).find_all(region)
}
