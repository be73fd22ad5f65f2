//! Borrowed views of scannable memory

use std::{fmt, slice};

use crate::Address;

/// A read-only view of bytes, together with the address its first byte lives at
///
/// The base address is what alignment is computed against. By default it is the
/// address of the slice itself, but a region can also describe data at another
/// address, for example a file section that is mapped at some virtual address.
#[derive(Copy, Clone)]
pub struct Region<'a> {
    bytes: &'a [u8],
    base: Address,
}

impl fmt::Debug for Region<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl<'a> Region<'a> {
    /// A region over `bytes` at their own address
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            base: bytes.as_ptr() as Address,
        }
    }

    /// A region over `bytes` which pretends to start at `base`
    pub fn with_base(bytes: &'a [u8], base: Address) -> Self {
        Self { bytes, base }
    }

    /// A region over raw memory
    ///
    /// # Safety
    ///
    /// * `ptr` - is valid for reads of `len` bytes for all of `'a`
    ///
    /// * the memory is not written to while the region is alive
    pub unsafe fn from_raw(ptr: *const u8, len: usize) -> Self {
        if len == 0 || ptr.is_null() {
            return Self {
                bytes: &[],
                base: ptr as Address,
            };
        }

        // SAFETY: upheld by caller
        let bytes = unsafe { slice::from_raw_parts(ptr, len) };
        Self::new(bytes)
    }

    /// The address of the first byte
    pub fn base(&self) -> Address {
        self.base
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the region has no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The underlying bytes
    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// Address of the byte at `offset`
    pub fn address_of(&self, offset: usize) -> Address {
        self.base.wrapping_add(offset)
    }

    /// A sub view, keeping addresses consistent
    pub fn subregion(&self, offset: usize, len: usize) -> Option<Region<'a>> {
        let end = offset.checked_add(len)?;
        let bytes = self.bytes.get(offset..end)?;

        Some(Self {
            bytes,
            base: self.address_of(offset),
        })
    }
}

impl<'a> From<&'a [u8]> for Region<'a> {
    fn from(value: &'a [u8]) -> Self {
        Self::new(value)
    }
}

/// A match of a signature inside a [`Region`]
#[derive(Debug, Copy, Clone)]
pub struct Match<'a> {
    region: Region<'a>,
    offset: usize,
}

impl fmt::Display for Match<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Match {{ addr: {:#x}, offset: {:#x} }}", self.address(), self.offset)
    }
}

impl<'a> Match<'a> {
    pub(crate) fn new(region: Region<'a>, offset: usize) -> Self {
        Self { region, offset }
    }

    /// Offset of the match from the start of the region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Address of the match
    pub fn address(&self) -> Address {
        self.region.address_of(self.offset)
    }

    /// The region bytes starting at the match
    pub fn bytes(&self) -> &'a [u8] {
        &self.region.as_slice()[self.offset..]
    }

    /// Read a little endian `i32` located `offset` bytes after the match
    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        let start = self.offset.checked_add(offset)?;
        let bytes = self.region.as_slice().get(start..start.checked_add(4)?)?;

        Some(i32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Resolve a rip-relative displacement located `offset` bytes after the match
    ///
    /// `remaining` is the amount of instruction bytes that follow the displacement.
    ///
    /// ```text
    ///        | match           | displacement at +3, remaining 0
    ///   0x0: 48 8D 05 BE 53 23 01    lea  rax, [rip+0x12353be]
    ///
    ///        | match  | displacement at +2, remaining 1
    ///   0x0: 83 3D BE 53 23 01 00    cmp  dword ptr [rip+0x12353be], 0x0
    /// ```
    pub fn rel(&self, offset: usize, remaining: usize) -> Option<Address> {
        let displacement = self.read_i32(offset)?;

        let next_instruction = self
            .address()
            .checked_add(offset)?
            .checked_add(4)?
            .checked_add(remaining)?;

        next_instruction.checked_add_signed(displacement as isize)
    }
}
