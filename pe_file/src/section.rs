//! Section table: header decoding, long-name resolution, relocation
//! records and the header-region computation.

use md5::{Digest, Md5};

use crate::consts::SECTION_HEADER_SIZE;
use crate::symbols::StringTable;
use crate::utils::{c_string, hex_string, shannon_entropy};
use crate::{PeError, PeFile, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE};

/// COFF relocation record attached to a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    pub virtual_address: u32,
    pub symbol_table_index: u32,
    pub kind: u16,
}

/// A parsed section header plus its relocation records.
///
/// Sections do not copy their bytes; reads go back through the owning
/// `PeFile`, so every accessor that touches data takes it as an argument.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    /// `SizeOfRawData`.
    pub size: u32,
    /// `PointerToRawData`.
    pub offset: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
    pub relocs: Vec<Reloc>,
    /// `PointerToRawData == 0`: the section has no backing bytes in the
    /// file and reads as zeroes (`.bss` style).
    pub(crate) uninitialized: bool,
}

impl Section {
    /// Raw contents of the section as stored in the file, truncated at
    /// end-of-file. Uninitialized sections read as zeroes.
    pub fn data(&self, file: &PeFile) -> Vec<u8> {
        if self.uninitialized {
            return vec![0u8; self.size as usize];
        }
        let bytes = file.data();
        let start = (self.offset as usize).min(bytes.len());
        let end = (self.offset as u64 + self.size as u64).min(bytes.len() as u64) as usize;
        bytes[start..end.max(start)].to_vec()
    }

    /// Alignment-adjusted window into the section, addressed by RVA.
    ///
    /// `start == 0` means the section beginning; `length == 0` means up to
    /// the end of the section. The raw pointer is deliberately left
    /// unadjusted when capping the end so that trailing bytes cut off by
    /// aligning the start stay reachable.
    pub fn get_data(&self, start: u32, length: u32, file: &PeFile) -> Vec<u8> {
        let pointer_to_raw_data_adj = file.adjust_file_alignment(self.offset);
        let virtual_address_adj = file.adjust_section_alignment(self.virtual_address);

        let offset = if start == 0 {
            pointer_to_raw_data_adj
        } else {
            start.wrapping_sub(virtual_address_adj).wrapping_add(pointer_to_raw_data_adj)
        };

        if offset > file.size() {
            return Vec::new();
        }

        let mut end = if length != 0 {
            u64::from(offset) + u64::from(length)
        } else {
            u64::from(offset) + u64::from(file.size())
        };

        let raw_end = u64::from(self.offset) + u64::from(self.size);
        if end > raw_end && raw_end > u64::from(offset) {
            end = raw_end;
        }
        if end > u64::from(file.size()) {
            end = u64::from(file.size());
        }
        if end <= u64::from(offset) {
            return Vec::new();
        }

        file.read_padded(offset, (end - u64::from(offset)) as u32)
    }

    /// MD5 of the raw section contents, lowercase hex.
    pub fn md5(&self, file: &PeFile) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.data(file));
        hex_string(&hasher.finalize())
    }

    /// Shannon entropy of the raw section contents.
    pub fn entropy(&self, file: &PeFile) -> f64 {
        shannon_entropy(&self.data(file))
    }

    /// "rwx"-style rendering of the memory characteristics.
    pub fn flags(&self) -> String {
        let mut flags = String::new();
        if self.characteristics & IMAGE_SCN_MEM_READ != 0 {
            flags.push('r');
        }
        if self.characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
            flags.push('x');
        }
        if self.characteristics & IMAGE_SCN_MEM_WRITE != 0 {
            flags.push('w');
        }
        flags
    }
}

/// Resolves a section name: either the NUL-terminated first 8 bytes, or
/// `/N` pointing into the COFF string table.
fn full_name(raw: &[u8; 8], string_table: &StringTable) -> Result<String, PeError> {
    if raw[0] != b'/' {
        return Ok(c_string(raw));
    }
    let digits = c_string(&raw[1..]);
    let offset: u32 = digits
        .parse()
        .map_err(|_| PeError::CorruptHeader("invalid long section name offset"))?;
    string_table.string(offset)
}

fn read_relocs(file: &PeFile, pointer: u32, count: u16) -> Result<Vec<Reloc>, PeError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut relocs = Vec::with_capacity(usize::from(count));
    for i in 0..u32::from(count) {
        let o = pointer.checked_add(i * 10).ok_or(PeError::OutsideBoundary)?;
        relocs.push(Reloc {
            virtual_address: file.read_u32(o)?,
            symbol_table_index: file.read_u32(o + 4)?,
            kind: file.read_u16(o + 8)?,
        });
    }
    Ok(relocs)
}

/// Reads the section table, resolves names, attaches relocations, sorts
/// by virtual address and materializes the header region.
pub(crate) fn read_sections(file: &mut PeFile) -> Result<(), PeError> {
    let optional_header_offset = file
        .dos_header
        .address_of_new_exe_header
        .checked_add(4 + crate::FILE_HEADER_SIZE)
        .ok_or(PeError::OutsideBoundary)?;
    let table_offset = optional_header_offset
        .checked_add(u32::from(file.nt_header.file_header.size_of_optional_header))
        .ok_or(PeError::OutsideBoundary)?;

    let count = u32::from(file.nt_header.file_header.number_of_sections);
    let mut sections = Vec::with_capacity(count as usize);
    for i in 0..count {
        let base = table_offset
            .checked_add(i * SECTION_HEADER_SIZE)
            .ok_or(PeError::OutsideBoundary)?;
        let raw = file.slice(base, SECTION_HEADER_SIZE)?;
        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[..8]);
        let pointer_to_raw_data = u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]);
        sections.push(Section {
            name: full_name(&name, &file.string_table)?,
            virtual_size: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            virtual_address: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            size: u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
            offset: pointer_to_raw_data,
            pointer_to_relocations: u32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]),
            pointer_to_line_numbers: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
            number_of_relocations: u16::from_le_bytes([raw[32], raw[33]]),
            number_of_line_numbers: u16::from_le_bytes([raw[34], raw[35]]),
            characteristics: u32::from_le_bytes([raw[36], raw[37], raw[38], raw[39]]),
            relocs: Vec::new(),
            uninitialized: pointer_to_raw_data == 0,
        });
    }

    for section in &mut sections {
        section.relocs =
            read_relocs(file, section.pointer_to_relocations, section.number_of_relocations)?;
    }

    sections.sort_by_key(|s| s.virtual_address);
    file.sections = sections;

    let table_end = u64::from(table_offset) + u64::from(count) * u64::from(SECTION_HEADER_SIZE);
    let table_end = u32::try_from(table_end).map_err(|_| PeError::OutsideBoundary)?;

    let lowest_section_offset = file
        .sections
        .iter()
        .filter(|s| s.offset > 0)
        .map(|s| file.adjust_file_alignment(s.offset))
        .min()
        .unwrap_or(0);

    if lowest_section_offset == 0 || lowest_section_offset < table_end {
        if table_end <= file.size() {
            file.header = file.read_padded(0, table_end);
        }
    } else if lowest_section_offset <= file.size() {
        file.header = file.read_padded(0, lowest_section_offset);
    }
    Ok(())
}
