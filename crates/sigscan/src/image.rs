//! Section tables of executable images on disk (ELF, PE and Mach-O)

use std::ops::Range;

use goblin::{
    elf::{
        section_header::{SHF_ALLOC, SHF_TLS, SHT_NOBITS},
        Elf,
    },
    mach::{Mach, MachO},
    pe::PE,
    Object,
};

use crate::{scan::Region, Address};

/// An error for the [image](crate::image) module
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// goblin could not parse the headers
    #[error(transparent)]
    Parse(#[from] goblin::error::Error),
    /// recognized, but not something with sections
    #[error("unsupported image format: {0}")]
    Unsupported(&'static str),
}

/// A section of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    /// section name, e.g. `.text` or `__text`
    pub name: String,
    /// the address the section is loaded at, before relocation. 0 if it isn't loaded
    pub address: u64,
    /// size in memory
    pub size: u64,
    /// where the section's bytes are in the file, if it has any
    pub file_range: Option<Range<usize>>,
}

/// The parsed section table of an image
#[derive(Debug, Clone)]
pub struct Image {
    format: &'static str,
    sections: Vec<SectionInfo>,
}

impl Image {
    /// Parse the headers of an image
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        let image = match Object::parse(bytes)? {
            Object::Elf(elf) => Self::from_elf(&elf),
            Object::PE(pe) => Self::from_pe(&pe, bytes.len()),
            Object::Mach(Mach::Binary(macho)) => Self::from_macho(&macho)?,
            Object::Mach(Mach::Fat(_)) => return Err(ImageError::Unsupported("fat mach-o")),
            Object::Archive(_) => return Err(ImageError::Unsupported("archive")),
            _ => return Err(ImageError::Unsupported("unknown")),
        };

        Ok(image)
    }

    fn from_elf(elf: &Elf<'_>) -> Self {
        let sections = elf
            .section_headers
            .iter()
            .filter_map(|header| {
                let name = elf.shdr_strtab.get_at(header.sh_name)?;
                if name.is_empty() {
                    return None;
                }

                // tls sections are templates, they don't live at their address
                let loaded = header.sh_flags & u64::from(SHF_ALLOC) != 0
                    && header.sh_flags & u64::from(SHF_TLS) == 0;
                let file_range = (header.sh_type != SHT_NOBITS)
                    .then(|| file_range(header.sh_offset, header.sh_size))
                    .flatten();

                Some(SectionInfo {
                    name: name.to_owned(),
                    address: if loaded { header.sh_addr } else { 0 },
                    size: header.sh_size,
                    file_range,
                })
            })
            .collect();

        Self {
            format: "elf",
            sections,
        }
    }

    fn from_pe(pe: &PE<'_>, file_len: usize) -> Self {
        let image_base = pe.image_base as u64;

        let sections = pe
            .sections
            .iter()
            .filter_map(|section| {
                let name = section.name().ok()?.to_owned();

                // raw data is padded to the file alignment, virtual size is the real size
                let raw_size = match section.virtual_size {
                    0 => section.size_of_raw_data,
                    virtual_size => section.size_of_raw_data.min(virtual_size),
                };

                let file_range =
                    file_range(u64::from(section.pointer_to_raw_data), u64::from(raw_size))
                        .filter(|range| !range.is_empty() && range.end <= file_len);

                Some(SectionInfo {
                    name,
                    address: image_base + u64::from(section.virtual_address),
                    size: u64::from(section.virtual_size),
                    file_range,
                })
            })
            .collect();

        Self {
            format: "pe",
            sections,
        }
    }

    fn from_macho(macho: &MachO<'_>) -> Result<Self, ImageError> {
        let mut sections = Vec::new();

        for segment in macho.segments.iter() {
            for (section, _) in segment.sections()? {
                let zerofill = section.flags & 0xFF == goblin::mach::constants::S_ZEROFILL;
                let file_range = (!zerofill)
                    .then(|| file_range(u64::from(section.offset), section.size))
                    .flatten();

                sections.push(SectionInfo {
                    name: section.name()?.to_owned(),
                    address: section.addr,
                    size: section.size,
                    file_range,
                });
            }
        }

        Ok(Self {
            format: "mach-o",
            sections,
        })
    }

    /// Short name of the container format
    pub fn format(&self) -> &'static str {
        self.format
    }

    /// All named sections in header order
    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    /// Find a section by exact name
    pub fn section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|section| section.name == name)
    }

    /// The file bytes of section `name` as a region based at the section's load address
    ///
    /// `bytes` must be the same bytes the image was parsed from. Returns `None` when the
    /// section doesn't exist or has no bytes in the file.
    pub fn region<'a>(&self, bytes: &'a [u8], name: &str) -> Option<Region<'a>> {
        let section = self.section(name)?;
        let range = section.file_range.clone()?;
        let data = bytes.get(range)?;

        Some(Region::with_base(data, section.address as Address))
    }
}

fn file_range(offset: u64, size: u64) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    Some(start..end)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{scan, Signature};

    fn own_image() -> (Vec<u8>, Image) {
        let bytes = fs::read(std::env::current_exe().unwrap()).unwrap();
        let image = Image::parse(&bytes).unwrap();
        (bytes, image)
    }

    #[test]
    fn parses_own_executable() {
        let (_, image) = own_image();

        let text = if cfg!(target_os = "macos") { "__text" } else { ".text" };
        let section = image.section(text).expect("text section");

        assert!(section.size > 0);
        assert!(section.file_range.is_some());
        assert!(image.section(".definitely_not_a_section").is_none());
    }

    #[test]
    fn region_scans_at_virtual_addresses() {
        let (bytes, image) = own_image();

        let text = if cfg!(target_os = "macos") { "__text" } else { ".text" };
        let region = image.region(&bytes, text).unwrap();
        let section = image.section(text).unwrap();
        assert_eq!(region.base() as u64, section.address);

        let head = &region.as_slice()[..16.min(region.len())];
        let sig = Signature::from_bytes(head).unwrap();
        let found = scan::find_first(&sig, &region, scan::ScanAlignment::X1);
        assert_eq!(found, Some(0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Image::parse(&[0u8; 64]).is_err());
    }
}
