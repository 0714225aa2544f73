//! Resource directory tree (Type → ID → Language → Data).
//!
//! The tree is walked depth-first with a visited set of directory RVAs as
//! the cycle guard and a hard cap on entries per directory. Corruption
//! never fails `PeFile` construction; it prunes the affected subtree.

use log::warn;

use crate::consts::{IMAGE_DIRECTORY_ENTRY_RESOURCE, MAX_ALLOWED_ENTRIES};
use crate::PeFile;

pub const RESOURCE_DIRECTORY_SIZE: u32 = 16;
pub const RESOURCE_DIRECTORY_ENTRY_SIZE: u32 = 8;
pub const RESOURCE_DATA_ENTRY_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageResourceDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub number_of_named_entries: u16,
    pub number_of_id_entries: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageResourceDirectoryEntry {
    /// Integer ID, or an offset to a Unicode name when the high bit is set.
    pub name: u32,
    /// Offset to a data entry, or to a subdirectory when the high bit is set.
    pub offset_to_data: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageResourceDataEntry {
    pub offset_to_data: u32,
    pub size: u32,
    pub code_page: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDirectory {
    pub header: ImageResourceDirectory,
    pub entries: Vec<ResourceDirectoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDirectoryEntry {
    pub entry: ImageResourceDirectoryEntry,
    /// Unicode name, when the entry is named.
    pub name: String,
    /// Integer ID, when it is not.
    pub id: u32,
    pub kind: ResourceEntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEntryKind {
    Directory(ResourceDirectory),
    Data(ResourceDataEntry),
}

/// Leaf node. At the language level the owning entry's `name` field packs
/// the language pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceDataEntry {
    pub header: ImageResourceDataEntry,
    pub lang: u32,
    pub sub_lang: u32,
}

pub(crate) fn read_resource_directory(file: &PeFile) -> Option<ResourceDirectory> {
    let optional_header = file.nt_header.optional_header.as_ref()?;
    let directory = optional_header.data_directory()[IMAGE_DIRECTORY_ENTRY_RESOURCE];
    if directory.virtual_address == 0 {
        return None;
    }
    let mut visited = Vec::new();
    parse_directory(file, directory.virtual_address, directory.size, 0, &mut visited)
}

fn parse_data_entry(file: &PeFile, rva: u32) -> Option<ImageResourceDataEntry> {
    let offset = file.offset_from_rva(rva)?;
    let raw = file.slice(offset, RESOURCE_DATA_ENTRY_SIZE).ok()?;
    Some(ImageResourceDataEntry {
        offset_to_data: le32(&raw[0..4]),
        size: le32(&raw[4..8]),
        code_page: le32(&raw[8..12]),
        reserved: le32(&raw[12..16]),
    })
}

fn parse_directory_entry(file: &PeFile, rva: u32) -> Option<ImageResourceDirectoryEntry> {
    let offset = file.offset_from_rva(rva)?;
    let raw = file.slice(offset, RESOURCE_DIRECTORY_ENTRY_SIZE).ok()?;
    let entry = ImageResourceDirectoryEntry {
        name: le32(&raw[0..4]),
        offset_to_data: le32(&raw[4..8]),
    };
    (entry != ImageResourceDirectoryEntry::default()).then_some(entry)
}

fn parse_directory(
    file: &PeFile,
    rva: u32,
    size: u32,
    base_rva: u32,
    visited: &mut Vec<u32>,
) -> Option<ResourceDirectory> {
    let offset = file.offset_from_rva(rva)?;
    let raw = file.slice(offset, RESOURCE_DIRECTORY_SIZE).ok()?;
    let header = ImageResourceDirectory {
        characteristics: le32(&raw[0..4]),
        time_date_stamp: le32(&raw[4..8]),
        major_version: u16::from_le_bytes([raw[8], raw[9]]),
        minor_version: u16::from_le_bytes([raw[10], raw[11]]),
        number_of_named_entries: u16::from_le_bytes([raw[12], raw[13]]),
        number_of_id_entries: u16::from_le_bytes([raw[14], raw[15]]),
    };

    let base_rva = if base_rva == 0 { rva } else { base_rva };
    if visited.is_empty() {
        visited.push(rva);
    }

    let number_of_entries =
        u32::from(header.number_of_named_entries) + u32::from(header.number_of_id_entries);
    if number_of_entries > MAX_ALLOWED_ENTRIES {
        warn!("resource directory claims {number_of_entries} entries, pruning subtree");
        return None;
    }

    let mut entries = Vec::new();
    for i in 0..number_of_entries {
        let entry_rva = rva
            .wrapping_add(RESOURCE_DIRECTORY_SIZE)
            .wrapping_add(i * RESOURCE_DIRECTORY_ENTRY_SIZE);
        let Some(entry) = parse_directory_entry(file, entry_rva) else {
            break;
        };

        let name_is_string = entry.name & 0x8000_0000 != 0;
        let mut entry_name = String::new();
        let mut entry_id = 0u32;
        if name_is_string {
            let name_offset = entry.name & 0x7FFF_FFFF;
            let Some(length_offset) = file.offset_from_rva(base_rva.wrapping_add(name_offset))
            else {
                break;
            };
            let Ok(length) = file.read_u16(length_offset) else {
                break;
            };
            entry_name = file.unicode_string_at_rva(
                base_rva.wrapping_add(name_offset).wrapping_add(2),
                u32::from(length),
            );
        } else {
            entry_id = entry.name;
        }

        let child_offset = entry.offset_to_data & 0x7FFF_FFFF;
        let data_is_directory = entry.offset_to_data & 0x8000_0000 != 0;
        if data_is_directory {
            let child_rva = base_rva.wrapping_add(child_offset);
            if visited.contains(&child_rva) {
                // Cycle: this subtree points back at an ancestor.
                break;
            }
            visited.push(child_rva);
            let child_size = size.wrapping_sub(entry_rva.wrapping_sub(base_rva));
            let Some(child) = parse_directory(file, child_rva, child_size, base_rva, visited)
            else {
                continue;
            };
            entries.push(ResourceDirectoryEntry {
                entry,
                name: entry_name,
                id: entry_id,
                kind: ResourceEntryKind::Directory(child),
            });
        } else {
            let Some(data) = parse_data_entry(file, base_rva.wrapping_add(child_offset)) else {
                continue;
            };
            entries.push(ResourceDirectoryEntry {
                entry,
                name: entry_name,
                id: entry_id,
                kind: ResourceEntryKind::Data(ResourceDataEntry {
                    header: data,
                    lang: entry.name & 0x3FF,
                    sub_lang: entry.name >> 10,
                }),
            });
        }
    }

    Some(ResourceDirectory { header, entries })
}

fn le32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
