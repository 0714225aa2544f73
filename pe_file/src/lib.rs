//! Defensive parser for PE32/PE32+ images.
//!
//! Opens a Portable Executable from disk or memory, walks its headers,
//! section table, imports, resources and Rich header, and exposes the
//! pieces the fingerprinting side needs: bounded reads, an RVA resolver
//! and the materialized header region. Parsing is strict about the
//! headers and forgiving about everything after them, since real inputs
//! are routinely corrupted on purpose.

mod consts;
pub mod headers;
pub mod imports;
mod map;
pub mod resources;
pub mod rich;
pub mod section;
pub mod symbols;
mod utils;

#[cfg(test)]
pub(crate) mod testpe;

use std::path::Path;

use log::{debug, warn};
use thiserror::Error;

pub use consts::*;
pub use headers::{
    DataDirectory, DosHeader, FileHeader, NtHeader, OptionalHeader, OptionalHeader32,
    OptionalHeader64,
};
pub use imports::{
    DelayImport, Import, ImportFunction, ImageDelayImportDescriptor, ImageImportDescriptor,
};
pub use resources::{
    ImageResourceDataEntry, ImageResourceDirectory, ImageResourceDirectoryEntry,
    ResourceDataEntry, ResourceDirectory, ResourceDirectoryEntry, ResourceEntryKind,
};
pub use rich::{CompId, RichHeader};
pub use section::{Reloc, Section};
pub use symbols::{CoffSymbol, StringTable, Symbol};
pub use utils::{hex_string, shannon_entropy};

use map::FileMap;

#[derive(Debug, Error)]
pub enum PeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a PE file, smaller than tiny PE")]
    InvalidSize,
    #[error("invalid PE file signature")]
    InvalidSignature,
    #[error("corrupt header: {0}")]
    CorruptHeader(&'static str),
    #[error("reading data outside boundary")]
    OutsideBoundary,
    #[error("damaged import table, ILT and IAT appear to be broken")]
    DamagedImportTable,
    #[error("too many invalid import names, aborting descriptor")]
    TooManyInvalid,
}

/// A parsed PE image. Immutable once constructed; the byte source is
/// owned exclusively and released on drop.
#[derive(Debug)]
pub struct PeFile {
    pub dos_header: DosHeader,
    pub nt_header: NtHeader,
    pub rich_header: Option<RichHeader>,
    pub string_table: StringTable,
    pub coff_symbols: Vec<CoffSymbol>,
    pub symbols: Vec<Symbol>,
    /// Sorted by virtual address.
    pub sections: Vec<Section>,
    pub imports: Vec<Import>,
    pub delay_imports: Vec<DelayImport>,
    pub resources: Option<ResourceDirectory>,
    /// The header region: everything before the first section's raw data.
    pub header: Vec<u8>,
    map: FileMap,
    size: u32,
}

impl PeFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PeError> {
        let map = FileMap::open(path.as_ref())?;
        Self::parse(map)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, PeError> {
        Self::parse(FileMap::from_bytes(data))
    }

    fn parse(map: FileMap) -> Result<Self, PeError> {
        if map.len() > u32::MAX as usize || (map.len() as u64) < u64::from(MIN_FILE_SIZE) {
            return Err(PeError::InvalidSize);
        }
        let size = map.size();

        let dos_header = DosHeader::parse(&map, size)?;
        let nt_header = NtHeader::parse(&map, &dos_header)?;
        debug!(
            "machine {:#06x}, {} sections, optional header {}",
            nt_header.file_header.machine,
            nt_header.file_header.number_of_sections,
            if nt_header.optional_header.is_some() { "present" } else { "absent" },
        );

        let rich_header = rich::read_rich_header(&map, dos_header.address_of_new_exe_header);

        let string_table = symbols::read_string_table(&map, &nt_header.file_header)?;
        let coff_symbols = symbols::read_coff_symbols(&map, &nt_header.file_header)?;
        let symbols = symbols::fold_aux_symbols(&coff_symbols, &string_table)?;

        let mut file = PeFile {
            dos_header,
            nt_header,
            rich_header,
            string_table,
            coff_symbols,
            symbols,
            sections: Vec::new(),
            imports: Vec::new(),
            delay_imports: Vec::new(),
            resources: None,
            header: Vec::new(),
            map,
            size,
        };

        section::read_sections(&mut file)?;
        file.imports = imports::read_import_directory(&file);
        file.delay_imports = imports::read_delay_import_directory(&file);
        file.resources = resources::read_resource_directory(&file);
        Ok(file)
    }

    /// File size in bytes. Construction guarantees it fits in a `u32`.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The raw bytes of the whole file.
    pub fn data(&self) -> &[u8] {
        self.map.as_bytes()
    }

    pub fn is64(&self) -> bool {
        matches!(self.nt_header.optional_header, Some(OptionalHeader::Pe32Plus(_)))
    }

    pub fn read_u16(&self, offset: u32) -> Result<u16, PeError> {
        self.map.read_u16(offset)
    }

    pub fn read_u32(&self, offset: u32) -> Result<u32, PeError> {
        self.map.read_u32(offset)
    }

    pub fn read_u64(&self, offset: u32) -> Result<u64, PeError> {
        self.map.read_u64(offset)
    }

    pub fn byte(&self, offset: u32) -> Result<u8, PeError> {
        self.map.read_u8(offset)
    }

    pub(crate) fn slice(&self, offset: u32, len: u32) -> Result<&[u8], PeError> {
        self.map.slice(offset, len)
    }

    pub(crate) fn read_padded(&self, offset: u32, len: u32) -> Vec<u8> {
        self.map.read_padded(offset, len)
    }

    /// Looks a section up by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn alignments(&self) -> (u32, u32) {
        match &self.nt_header.optional_header {
            Some(oh) => (oh.file_alignment(), oh.section_alignment()),
            None => (0, 0),
        }
    }

    /// Section alignment as the loader would apply it: below 0x1000 the
    /// file alignment takes over, and misaligned addresses round down.
    pub(crate) fn adjust_section_alignment(&self, va: u32) -> u32 {
        let (file_alignment, mut section_alignment) = self.alignments();
        if section_alignment < 0x1000 {
            section_alignment = file_alignment;
        }
        if section_alignment != 0 && va % section_alignment != 0 {
            return section_alignment * (va / section_alignment);
        }
        va
    }

    /// Raw pointers round down to 0x200 once the declared file alignment
    /// reaches that value; smaller alignments are taken literally.
    pub(crate) fn adjust_file_alignment(&self, va: u32) -> u32 {
        let (file_alignment, _) = self.alignments();
        if file_alignment < FILE_ALIGNMENT_HARDCODED {
            return va;
        }
        (va / 0x200) * 0x200
    }

    /// Whether `rva` falls inside the section at `index`, taking both
    /// alignment regimes and the next section's start into account.
    fn section_contains(&self, rva: u32, index: usize) -> bool {
        let section = &self.sections[index];
        let adjusted_pointer = self.adjust_file_alignment(section.offset);
        let mut size = if self.size.wrapping_sub(adjusted_pointer) < section.size {
            section.virtual_size
        } else {
            section.size.max(section.virtual_size)
        };
        let va_adj = self.adjust_section_alignment(section.virtual_address);

        // A section that would run into its successor gets cut short.
        if let Some(next) = self.sections.get(index + 1) {
            if next.virtual_address > section.virtual_address
                && u64::from(va_adj) + u64::from(size) > u64::from(next.virtual_address)
            {
                size = next.virtual_address - va_adj;
            }
        }

        u64::from(va_adj) <= u64::from(rva)
            && u64::from(rva) < u64::from(va_adj) + u64::from(size)
    }

    pub(crate) fn section_index_by_rva(&self, rva: u32) -> Option<usize> {
        (0..self.sections.len()).find(|&i| self.section_contains(rva, i))
    }

    /// The section containing `rva`, if any.
    pub fn section_by_rva(&self, rva: u32) -> Option<&Section> {
        self.section_index_by_rva(rva).map(|i| &self.sections[i])
    }

    /// Maps an RVA to a file offset. An RVA outside every section is
    /// treated as a header-region offset when it is inside the file;
    /// `None` means there is no valid offset at all.
    pub fn offset_from_rva(&self, rva: u32) -> Option<u32> {
        match self.section_index_by_rva(rva) {
            None => (rva < self.size).then_some(rva),
            Some(i) => {
                let section = &self.sections[i];
                let section_alignment = self.adjust_section_alignment(section.virtual_address);
                let file_alignment = self.adjust_file_alignment(section.offset);
                Some(rva.wrapping_sub(section_alignment).wrapping_add(file_alignment))
            }
        }
    }

    /// Bytes at `rva`. `length == 0` means "to the end of the region".
    /// Falls back to the header region, then to a direct file read, for
    /// RVAs outside every section.
    pub fn get_data(&self, rva: u32, length: u32) -> Result<Vec<u8>, PeError> {
        match self.section_index_by_rva(rva) {
            Some(i) => Ok(self.sections[i].get_data(rva, length, self)),
            None => {
                if (rva as usize) < self.header.len() {
                    let end = if length != 0 {
                        (rva as usize).saturating_add(length as usize).min(self.header.len())
                    } else {
                        self.header.len()
                    };
                    return Ok(self.header[rva as usize..end].to_vec());
                }
                if rva < self.size {
                    let len = if length != 0 { length } else { self.size - rva };
                    return Ok(self.read_padded(rva, len));
                }
                warn!("data at rva {rva:#x} cannot be fetched");
                Err(PeError::OutsideBoundary)
            }
        }
    }

    /// NUL-terminated ASCII at `rva`, read through the containing section
    /// when there is one. Empty on any failure.
    pub(crate) fn string_at_rva(&self, rva: u32, max_len: u32) -> String {
        if rva == 0 {
            return String::new();
        }
        match self.section_index_by_rva(rva) {
            None => {
                if rva > self.size {
                    return String::new();
                }
                let end = u64::from(rva)
                    .saturating_add(u64::from(max_len))
                    .min(u64::from(self.size));
                let data = self.read_padded(rva, (end - u64::from(rva)) as u32);
                utils::c_string(&data)
            }
            Some(i) => utils::c_string(&self.sections[i].get_data(rva, max_len, self)),
        }
    }

    /// Length-prefix-driven UTF-16LE read used for resource names.
    pub(crate) fn unicode_string_at_rva(&self, rva: u32, units: u32) -> String {
        let Some(offset) = self.offset_from_rva(rva) else {
            return String::new();
        };
        let mut data = Vec::with_capacity(units as usize);
        for i in 0..units {
            let Some(o) = offset.checked_add(i * 2) else { break };
            match self.map.read_u16(o) {
                Ok(unit) => data.push(unit),
                Err(_) => break,
            }
        }
        String::from_utf16_lossy(&data)
    }
}
