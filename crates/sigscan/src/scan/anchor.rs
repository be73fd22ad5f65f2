//! Choosing which part of a signature the fast search looks for first

use crate::Signature;

use super::{ScanAlignment, ScanHint};

/// The position the backends search for before verifying a whole candidate
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Anchor {
    /// index of a fully known element
    pub(crate) index: usize,
    pub(crate) byte: u8,
    /// the element after `index` is also fully known
    pub(crate) next: Option<u8>,
}

impl Anchor {
    /// Pick an anchor, or `None` if the signature has no fully known byte
    pub(crate) fn select(
        signature: &Signature,
        alignment: ScanAlignment,
        hint: ScanHint,
    ) -> Option<Self> {
        let elements = signature.elements();

        let pairs = || {
            elements
                .windows(2)
                .enumerate()
                .filter(|(_, w)| w[0].is_byte() && w[1].is_byte())
                .map(|(i, w)| (i, w[0].value(), w[1].value()))
        };

        // aligned scans only test one position per 16 bytes, a pair gains nothing there
        if alignment == ScanAlignment::X1 {
            let pair = match hint {
                ScanHint::X86_64 => rarest(pairs()),
                ScanHint::None => pairs().next(),
            };

            if let Some((index, byte, next)) = pair {
                return Some(Self {
                    index,
                    byte,
                    next: Some(next),
                });
            }
        }

        elements
            .iter()
            .position(|e| e.is_byte())
            .map(|index| Self {
                index,
                byte: elements[index].value(),
                next: None,
            })
    }
}

/// The least common pair, first one on ties
fn rarest(pairs: impl Iterator<Item = (usize, u8, u8)>) -> Option<(usize, u8, u8)> {
    let mut best: Option<((usize, u8, u8), usize)> = None;

    for pair in pairs {
        let score = pair_score(pair.1, pair.2);
        if best.map_or(true, |(_, best)| score > best) {
            best = Some((pair, score));
        }
    }

    best.map(|(pair, _)| pair)
}

/// How uncommon a byte pair is in x86-64 code; higher is rarer
fn pair_score(a: u8, b: u8) -> usize {
    PAIRS_X86_64
        .iter()
        .position(|&pair| pair == (a, b))
        .unwrap_or(PAIRS_X86_64.len())
}

/// The 100 most frequent adjacent byte pairs in x86-64 executable sections, most frequent first
#[rustfmt::skip]
static PAIRS_X86_64: [(u8, u8); 100] = [
    (0x00, 0x00), (0x48, 0x8B), (0xCC, 0xCC), (0x48, 0x8D), (0x48, 0x89),
    (0x00, 0x48), (0x48, 0x83), (0x44, 0x24), (0x01, 0x00), (0x49, 0x8B),
    (0x48, 0x85), (0x4C, 0x24), (0xFF, 0xFF), (0x0F, 0x11), (0x4C, 0x8B),
    (0x08, 0x48), (0x24, 0x20), (0x5C, 0x24), (0x01, 0x48), (0xFF, 0x48),
    (0x4C, 0x89), (0x4C, 0x8D), (0xCC, 0x48), (0xFF, 0x15), (0x10, 0x48),
    (0x24, 0x30), (0x03, 0x48), (0x89, 0x44), (0x00, 0xE8), (0x90, 0x48),
    (0x8D, 0x05), (0x83, 0xC4), (0xC3, 0xCC), (0x20, 0x48), (0x0F, 0x57),
    (0x30, 0x48), (0x02, 0x00), (0xF3, 0x0F), (0x00, 0x0F), (0x54, 0x24),
    (0x85, 0xC9), (0xC0, 0x0F), (0x48, 0xC7), (0x48, 0x81), (0x85, 0xC0),
    (0x74, 0x24), (0x02, 0x48), (0x89, 0x5C), (0x0F, 0x10), (0x83, 0xEC),
    (0xC9, 0x74), (0x8D, 0x4D), (0x24, 0x40), (0x57, 0xC0), (0x24, 0x28),
    (0x8D, 0x4C), (0x24, 0x38), (0x00, 0x4C), (0x8B, 0xCB), (0x38, 0x48),
    (0x48, 0x3B), (0xF8, 0x48), (0x8D, 0x0D), (0xC0, 0x48), (0x04, 0x48),
    (0x0F, 0x84), (0x03, 0x00), (0x00, 0x49), (0xC3, 0x48), (0x8B, 0xCF),
    (0xC0, 0x74), (0x89, 0x45), (0x57, 0x48), (0x40, 0x48), (0x48, 0x33),
    (0x24, 0x48), (0x24, 0x50), (0x0F, 0xB6), (0x8D, 0x15), (0x18, 0x48),
    (0x28, 0x48), (0x0F, 0x7F), (0x7C, 0x24), (0x8D, 0x54), (0x8B, 0x40),
    (0x8B, 0xC8), (0x8B, 0x01), (0x8D, 0x8D), (0xC1, 0x48), (0x8B, 0x5C),
    (0xFE, 0x48), (0x89, 0x74), (0xC7, 0x44), (0x66, 0x0F), (0x83, 0xF8),
    (0xCB, 0xE8), (0x24, 0x60), (0xCC, 0xE8), (0xC4, 0x20), (0x8B, 0x4D),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(sig: &str, alignment: ScanAlignment, hint: ScanHint) -> Option<Anchor> {
        Anchor::select(&Signature::parse(sig).unwrap(), alignment, hint)
    }

    #[test]
    fn first_pair_without_hint() {
        let a = anchor("? 48 ? 8B 8D 05", ScanAlignment::X1, ScanHint::None).unwrap();
        assert_eq!(a, Anchor { index: 3, byte: 0x8B, next: Some(0x8D) });
    }

    #[test]
    fn single_byte_when_no_pair() {
        let a = anchor("? 48 ? 8B", ScanAlignment::X1, ScanHint::None).unwrap();
        assert_eq!(a, Anchor { index: 1, byte: 0x48, next: None });
    }

    #[test]
    fn aligned_uses_first_byte() {
        let a = anchor("? 48 8B", ScanAlignment::X16, ScanHint::X86_64).unwrap();
        assert_eq!(a, Anchor { index: 1, byte: 0x48, next: None });
    }

    #[test]
    fn hint_prefers_rare_pair() {
        // 48 8B is very common, 8B 05 isn't in the table at all
        let a = anchor("48 8B 05", ScanAlignment::X1, ScanHint::X86_64).unwrap();
        assert_eq!(a.index, 1);

        let a = anchor("48 8B 05", ScanAlignment::X1, ScanHint::None).unwrap();
        assert_eq!(a.index, 0);
    }

    #[test]
    fn rarest_keeps_first_on_ties() {
        let pairs = [(0, 0x48, 0x8B), (2, 0x12, 0x13), (4, 0x12, 0x13), (6, 0xCC, 0xCC)];
        assert_eq!(rarest(pairs.into_iter()), Some((2, 0x12, 0x13)));
        assert_eq!(rarest(std::iter::empty()), None);
    }

    #[test]
    fn partial_masks_have_no_anchor() {
        let sig = Signature::from_bytes_and_mask(&[0x40, 0x50], &[0xF0, 0xF0]).unwrap();
        assert_eq!(Anchor::select(&sig, ScanAlignment::X1, ScanHint::None), None);
    }
}
