//! IDA-style byte signatures

use std::{fmt, str::FromStr};

/// Signature creation errors
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// A token was neither a byte nor a wildcard
    #[error("invalid signature token, expected 2 hex digits, 8 binary digits or a ?/?? wildcard")]
    Invalid,
    /// No tokens at all
    #[error("signature is empty")]
    Empty,
    /// Only wildcards, nothing that can be anchored on
    #[error("signature does not contain a fully known byte")]
    NoByte,
    /// Data and mask have different lengths
    #[error("mask is not the same length as the data")]
    LengthMismatch,
}

/// A single position of a [`Signature`]
///
/// A byte `b` matches the element when `b & mask == value`. A zero mask is a full wildcard,
/// `0xFF` a known byte.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Element {
    value: u8,
    mask: u8,
}

impl Element {
    /// A wildcard matching any byte
    pub const WILDCARD: Element = Element { value: 0, mask: 0 };

    /// A fully known byte
    pub const fn byte(value: u8) -> Self {
        Self { value, mask: 0xFF }
    }

    /// A byte where only the bits set in `mask` are compared
    pub const fn masked(value: u8, mask: u8) -> Self {
        Self {
            value: value & mask,
            mask,
        }
    }

    /// The expected value (already masked)
    pub const fn value(&self) -> u8 {
        self.value
    }

    /// The bits of the byte that are compared
    pub const fn mask(&self) -> u8 {
        self.mask
    }

    /// Matches any byte
    pub const fn is_wildcard(&self) -> bool {
        self.mask == 0x00
    }

    /// Matches exactly one byte value
    pub const fn is_byte(&self) -> bool {
        self.mask == 0xFF
    }

    /// Whether `byte` satisfies this element
    #[inline(always)]
    pub const fn matches(&self, byte: u8) -> bool {
        byte & self.mask == self.value
    }

    fn parse_token(token: &str) -> Result<Self, SignatureError> {
        let radix = match token.len() {
            1 | 2 if token.bytes().all(|c| c == b'?') => return Ok(Self::WILDCARD),
            2 => 16,
            8 => 2,
            _ => return Err(SignatureError::Invalid),
        };

        // bits covered by one digit
        let (width, digit_mask) = if radix == 16 { (4, 0xF) } else { (1, 0x1) };

        let mut value = 0u8;
        let mut mask = 0u8;

        for c in token.chars() {
            value <<= width;
            mask <<= width;

            if c == '?' {
                continue;
            }

            let digit = c.to_digit(radix).ok_or(SignatureError::Invalid)? as u8;
            value |= digit;
            mask |= digit_mask;
        }

        Ok(Self::masked(value, mask))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        let hi = self.mask & 0xF0 == 0xF0;
        let lo = self.mask & 0x0F == 0x0F;

        if self.is_wildcard() {
            return f.write_str("?");
        }

        let nibble_aligned = (hi || self.mask & 0xF0 == 0) && (lo || self.mask & 0x0F == 0);
        if nibble_aligned {
            let hi = if hi { HEX[(self.value >> 4) as usize] } else { b'?' };
            let lo = if lo { HEX[(self.value & 0xF) as usize] } else { b'?' };
            return write!(f, "{}{}", hi as char, lo as char);
        }

        for bit in (0..8).rev() {
            let c = match (self.mask >> bit & 1, self.value >> bit & 1) {
                (0, _) => '?',
                (_, 1) => '1',
                _ => '0',
            };
            write!(f, "{c}")?;
        }

        Ok(())
    }
}

/// An immutable, non-empty IDA-style byte pattern
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    elements: Box<[Element]>,
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, r#"Signature("{self}")"#)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{element}")?;
        }

        Ok(())
    }
}

impl Signature {
    /// Parse an IDA-style signature
    ///
    /// Tokens are whitespace separated. Each is `?`/`??`, two hex digits (`?` allowed per nibble),
    /// or eight binary digits (`?` allowed per bit).
    ///
    /// # Example
    ///
    /// ```rust
    /// # use sigscan::Signature;
    /// let sig = Signature::parse("48 8B 8D ? ? ? ? 48").unwrap();
    /// assert_eq!(sig.len(), 8);
    /// ```
    pub fn parse(text: &str) -> Result<Self, SignatureError> {
        let elements = text
            .split_ascii_whitespace()
            .map(Element::parse_token)
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_elements(elements)
    }

    /// Create a signature from raw data and a per-byte bit mask. A `0x00` mask byte is a wildcard.
    pub fn from_bytes_and_mask(bytes: &[u8], mask: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != mask.len() {
            return Err(SignatureError::LengthMismatch);
        }

        if bytes.is_empty() {
            return Err(SignatureError::Empty);
        }

        if mask.iter().all(|&m| m == 0) {
            return Err(SignatureError::NoByte);
        }

        let elements = bytes
            .iter()
            .zip(mask)
            .map(|(&b, &m)| Element::masked(b, m))
            .collect();

        Ok(Self { elements })
    }

    /// Create a signature that matches `bytes` exactly
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.is_empty() {
            return Err(SignatureError::Empty);
        }

        let elements = bytes.iter().copied().map(Element::byte).collect();
        Ok(Self { elements })
    }

    /// Create a signature from already built elements
    pub fn from_elements(elements: Vec<Element>) -> Result<Self, SignatureError> {
        if elements.is_empty() {
            return Err(SignatureError::Empty);
        }

        if !elements.iter().any(Element::is_byte) {
            return Err(SignatureError::NoByte);
        }

        Ok(Self {
            elements: elements.into_boxed_slice(),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Always false, signatures are never empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The elements in order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Whether `window` starts with bytes satisfying every element
    #[inline]
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.elements.len()
            && self
                .elements
                .iter()
                .zip(window)
                .all(|(element, &byte)| element.matches(byte))
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Signature {
    type Error = SignatureError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = SignatureError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bytes_and_wildcards() {
        let sig = Signature::parse("48 8B 8D ? ? ? ? 48").unwrap();

        let expected = [
            Element::byte(0x48),
            Element::byte(0x8B),
            Element::byte(0x8D),
            Element::WILDCARD,
            Element::WILDCARD,
            Element::WILDCARD,
            Element::WILDCARD,
            Element::byte(0x48),
        ];
        assert_eq!(sig.elements(), expected);
    }

    #[test]
    fn hex_is_case_insensitive() {
        assert_eq!(
            Signature::parse("ab Cd ??").unwrap(),
            Signature::parse("AB CD ?").unwrap()
        );
    }

    #[test]
    fn any_whitespace_separates() {
        let sig = Signature::parse("  48\t8B\n?  ").unwrap();
        assert_eq!(sig.len(), 3);
    }

    #[test]
    fn empty_input() {
        assert_eq!(Signature::parse(""), Err(SignatureError::Empty));
        assert_eq!(Signature::parse("  \t \n"), Err(SignatureError::Empty));
    }

    #[test]
    fn only_wildcards() {
        assert_eq!(Signature::parse("??"), Err(SignatureError::NoByte));
        assert_eq!(Signature::parse("? ?? ?"), Err(SignatureError::NoByte));
        // a partial byte cannot be anchored on either
        assert_eq!(Signature::parse("4? ?"), Err(SignatureError::NoByte));
    }

    #[test]
    fn invalid_tokens() {
        assert_eq!(Signature::parse("4"), Err(SignatureError::Invalid));
        assert_eq!(Signature::parse("GG"), Err(SignatureError::Invalid));
        assert_eq!(Signature::parse("48 8B5"), Err(SignatureError::Invalid));
        assert_eq!(Signature::parse("???"), Err(SignatureError::Invalid));
        assert_eq!(Signature::parse("10102010"), Err(SignatureError::Invalid));
    }

    #[test]
    fn nibble_and_bit_wildcards() {
        let sig = Signature::parse("48 4? 1?0?1010").unwrap();
        let [a, b, c] = sig.elements() else {
            panic!("expected 3 elements");
        };

        assert!(a.is_byte());
        assert_eq!((b.value(), b.mask()), (0x40, 0xF0));
        assert_eq!((c.value(), c.mask()), (0b1000_1010, 0b1010_1111));

        assert!(b.matches(0x4F));
        assert!(!b.matches(0x5F));
        assert!(c.matches(0b1101_1010));
        assert!(!c.matches(0b0101_1010));
    }

    #[test]
    fn bytes_with_mask_equals_parsed() {
        let created = Signature::from_bytes_and_mask(&[0x10, 0x20], &[0xFF, 0x00]).unwrap();
        assert_eq!(created, Signature::parse("10 ?").unwrap());
    }

    #[test]
    fn bytes_with_mask_errors() {
        assert_eq!(
            Signature::from_bytes_and_mask(&[], &[]),
            Err(SignatureError::Empty)
        );
        assert_eq!(
            Signature::from_bytes_and_mask(&[1, 2], &[0, 0]),
            Err(SignatureError::NoByte)
        );
        assert_eq!(
            Signature::from_bytes_and_mask(&[1, 2], &[0xFF]),
            Err(SignatureError::LengthMismatch)
        );
    }

    #[test]
    fn display_round_trips() {
        for text in ["48 8B ? ? 05", "?F 4? 01", "1?0?1010 CC"] {
            let sig = Signature::parse(text).unwrap();
            assert_eq!(sig.to_string(), text);
            assert_eq!(Signature::parse(&sig.to_string()).unwrap(), sig);
        }
    }
}
