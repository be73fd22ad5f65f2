use std::{fs::File, path::Path};

use eyre::{eyre, OptionExt, Result, WrapErr};
use memmap2::Mmap;
use sigscan::{
    image::Image,
    module,
    scan::{Region, ScanAlignment, ScanHint, ScanMode, Scanner},
    Address, Signature, Status,
};
use tracing::debug;

/// How a scan is run, after merging config and flags
#[derive(Debug, Copy, Clone, Default)]
pub struct ScanOptions {
    pub alignment: ScanAlignment,
    pub hint: ScanHint,
    pub mode: ScanMode,
    /// report every match instead of the first
    pub all: bool,
}

/// One match
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Hit {
    /// from the start of the scanned region
    pub offset: usize,
    /// virtual address for sections, in-process address for modules
    pub address: Address,
    /// position in the file, for file scans
    pub file_offset: Option<usize>,
}

pub fn parse_signature(text: &str) -> Result<Signature> {
    Signature::parse(text).map_err(|e| {
        let status = Status::from(&e);
        eyre!("`{text}`: {e} (status {} = {status})", status as i32)
    })
}

fn scan_region(
    signature: &Signature,
    region: &Region<'_>,
    options: ScanOptions,
    file_start: Option<usize>,
) -> Vec<Hit> {
    let scanner = Scanner::new(signature)
        .alignment(options.alignment)
        .hint(options.hint)
        .mode(options.mode);

    let take = if options.all { usize::MAX } else { 1 };

    scanner
        .find_all(region)
        .take(take)
        .map(|offset| Hit {
            offset,
            address: region.address_of(offset),
            file_offset: file_start.map(|start| start + offset),
        })
        .collect()
}

/// Scan a whole file, or one section of it when it is an executable
pub fn scan_file(
    path: &Path,
    signature: &Signature,
    section: Option<&str>,
    options: ScanOptions,
) -> Result<Vec<Hit>> {
    let file = File::open(path).wrap_err_with(|| format!("failed to open {}", path.display()))?;

    // empty files can't be mapped
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }

    // SAFETY: the map is only read; a file changing underneath is the user's problem
    let map = unsafe { Mmap::map(&file)? };

    let Some(section) = section else {
        return Ok(scan_region(signature, &Region::with_base(&map, 0), options, Some(0)));
    };

    let image = Image::parse(&map)?;
    let info = image
        .section(section)
        .ok_or_else(|| eyre!("{} has no section named `{section}`", path.display()))?;

    let region = image
        .region(&map, section)
        .ok_or_eyre("section has no data in the file")?;

    let file_start = info.file_range.as_ref().map(|range| range.start);
    debug!(section, address = info.address, size = info.size, ?file_start, "scanning section");

    Ok(scan_region(signature, &region, options, file_start))
}

/// The section table of an executable file
pub fn sections(path: &Path) -> Result<Image> {
    let file = File::open(path).wrap_err_with(|| format!("failed to open {}", path.display()))?;
    // SAFETY: see scan_file
    let map = unsafe { Mmap::map(&file)? };

    Ok(Image::parse(&map)?)
}

/// Scan a section of a module loaded in this process. `Ok(None)` if the module isn't loaded.
pub fn scan_module(
    name: Option<&str>,
    section: &str,
    signature: &Signature,
    options: ScanOptions,
) -> Result<Option<(module::Module, Vec<Hit>)>> {
    let Some(module) = module::get_module(name)? else {
        return Ok(None);
    };

    let hits = {
        let region = module
            .section(section)?
            .ok_or_else(|| eyre!("{} has no section named `{section}`", module.name()))?;

        scan_region(signature, &region, options, None)
    };

    Ok(Some((module, hits)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const DATA: [u8; 10] = [0x00, 0x48, 0x8B, 0x8D, 0x12, 0x34, 0x56, 0x78, 0x48, 0x99];

    fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn scans_plain_file() {
        let file = temp_file(&DATA);
        let sig = parse_signature("48 ? ?").unwrap();

        let first = scan_file(file.path(), &sig, None, ScanOptions::default()).unwrap();
        assert_eq!(
            first,
            [Hit {
                offset: 1,
                address: 1,
                file_offset: Some(1)
            }]
        );

        let options = ScanOptions {
            all: true,
            ..Default::default()
        };
        let all = scan_file(file.path(), &sig, None, options).unwrap();
        assert_eq!(all.iter().map(|hit| hit.offset).collect::<Vec<_>>(), [1]);

        let sig = parse_signature("48").unwrap();
        let all = scan_file(file.path(), &sig, None, options).unwrap();
        assert_eq!(all.iter().map(|hit| hit.offset).collect::<Vec<_>>(), [1, 8]);
    }

    #[test]
    fn empty_file_has_no_hits() {
        let file = temp_file(&[]);
        let sig = parse_signature("48").unwrap();

        assert!(scan_file(file.path(), &sig, None, ScanOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn section_of_own_executable() {
        let exe = std::env::current_exe().unwrap();
        let text = if cfg!(target_os = "macos") { "__text" } else { ".text" };

        let image = sections(&exe).unwrap();
        let info = image.section(text).unwrap();

        let bytes = std::fs::read(&exe).unwrap();
        let region = image.region(&bytes, text).unwrap();
        let sig = Signature::from_bytes(&region.as_slice()[..16]).unwrap();

        let hits = scan_file(&exe, &sig, Some(text), ScanOptions::default()).unwrap();
        let start = info.file_range.as_ref().unwrap().start;

        assert_eq!(hits[0].offset, 0);
        assert_eq!(hits[0].address as u64, info.address);
        assert_eq!(hits[0].file_offset, Some(start));

        let missing = scan_file(
            &exe,
            &sig,
            Some(".definitely_not_a_section"),
            ScanOptions::default(),
        );
        assert!(missing.is_err());
    }

    #[test]
    fn reports_status_for_bad_signatures() {
        let err = parse_signature("GG").unwrap_err();
        assert!(err.to_string().contains("status 2"));
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn scans_own_process() {
        let process = module::process_module().unwrap();
        let head = process.section(".text").unwrap().unwrap().as_slice()[..16].to_vec();
        let sig = Signature::from_bytes(&head).unwrap();

        let (module, hits) = scan_module(None, ".text", &sig, ScanOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(module.base(), process.base());
        assert_eq!(hits[0].offset, 0);

        let missing = scan_module(
            Some("definitely-not-loaded-4242.so"),
            ".text",
            &sig,
            ScanOptions::default(),
        );
        assert!(missing.unwrap().is_none());
    }
}
