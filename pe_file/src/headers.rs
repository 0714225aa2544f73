//! DOS header, NT signature, file header and the two optional-header
//! variants with their data-directory array.

use log::debug;

use crate::consts::*;
use crate::map::FileMap;
use crate::PeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    /// `MZ` or `ZM`.
    pub magic: u16,
    /// File offset of the PE signature, `e_lfanew`.
    pub address_of_new_exe_header: u32,
}

impl DosHeader {
    pub(crate) fn parse(map: &FileMap, size: u32) -> Result<Self, PeError> {
        let magic = map.read_u16(0)?;
        if magic != DOS_MAGIC && magic != DOS_ZM_MAGIC {
            return Err(PeError::InvalidSignature);
        }
        let address_of_new_exe_header = map.read_u32(0x3C)?;
        if address_of_new_exe_header < 4 || address_of_new_exe_header > size {
            return Err(PeError::CorruptHeader("e_lfanew out of range"));
        }
        Ok(Self { magic, address_of_new_exe_header })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl FileHeader {
    fn parse(map: &FileMap, offset: u32) -> Result<Self, PeError> {
        Ok(Self {
            machine: map.read_u16(offset)?,
            number_of_sections: map.read_u16(offset + 2)?,
            time_date_stamp: map.read_u32(offset + 4)?,
            pointer_to_symbol_table: map.read_u32(offset + 8)?,
            number_of_symbols: map.read_u32(offset + 12)?,
            size_of_optional_header: map.read_u16(offset + 16)?,
            characteristics: map.read_u16(offset + 18)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalHeader32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [DataDirectory; 16],
}

/// Fixed prefix of the PE32 optional header, everything before the
/// data directories.
const OPTIONAL_HEADER32_MIN_SIZE: u16 = 96;

impl OptionalHeader32 {
    fn parse(map: &FileMap, o: u32) -> Result<Self, PeError> {
        Ok(Self {
            magic: map.read_u16(o)?,
            major_linker_version: map.read_u8(o + 2)?,
            minor_linker_version: map.read_u8(o + 3)?,
            size_of_code: map.read_u32(o + 4)?,
            size_of_initialized_data: map.read_u32(o + 8)?,
            size_of_uninitialized_data: map.read_u32(o + 12)?,
            address_of_entry_point: map.read_u32(o + 16)?,
            base_of_code: map.read_u32(o + 20)?,
            base_of_data: map.read_u32(o + 24)?,
            image_base: map.read_u32(o + 28)?,
            section_alignment: map.read_u32(o + 32)?,
            file_alignment: map.read_u32(o + 36)?,
            major_operating_system_version: map.read_u16(o + 40)?,
            minor_operating_system_version: map.read_u16(o + 42)?,
            major_image_version: map.read_u16(o + 44)?,
            minor_image_version: map.read_u16(o + 46)?,
            major_subsystem_version: map.read_u16(o + 48)?,
            minor_subsystem_version: map.read_u16(o + 50)?,
            win32_version_value: map.read_u32(o + 52)?,
            size_of_image: map.read_u32(o + 56)?,
            size_of_headers: map.read_u32(o + 60)?,
            checksum: map.read_u32(o + 64)?,
            subsystem: map.read_u16(o + 68)?,
            dll_characteristics: map.read_u16(o + 70)?,
            size_of_stack_reserve: map.read_u32(o + 72)?,
            size_of_stack_commit: map.read_u32(o + 76)?,
            size_of_heap_reserve: map.read_u32(o + 80)?,
            size_of_heap_commit: map.read_u32(o + 84)?,
            loader_flags: map.read_u32(o + 88)?,
            number_of_rva_and_sizes: map.read_u32(o + 92)?,
            data_directory: [DataDirectory::default(); 16],
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [DataDirectory; 16],
}

/// Fixed prefix of the PE32+ optional header.
const OPTIONAL_HEADER64_MIN_SIZE: u16 = 112;

impl OptionalHeader64 {
    fn parse(map: &FileMap, o: u32) -> Result<Self, PeError> {
        Ok(Self {
            magic: map.read_u16(o)?,
            major_linker_version: map.read_u8(o + 2)?,
            minor_linker_version: map.read_u8(o + 3)?,
            size_of_code: map.read_u32(o + 4)?,
            size_of_initialized_data: map.read_u32(o + 8)?,
            size_of_uninitialized_data: map.read_u32(o + 12)?,
            address_of_entry_point: map.read_u32(o + 16)?,
            base_of_code: map.read_u32(o + 20)?,
            image_base: map.read_u64(o + 24)?,
            section_alignment: map.read_u32(o + 32)?,
            file_alignment: map.read_u32(o + 36)?,
            major_operating_system_version: map.read_u16(o + 40)?,
            minor_operating_system_version: map.read_u16(o + 42)?,
            major_image_version: map.read_u16(o + 44)?,
            minor_image_version: map.read_u16(o + 46)?,
            major_subsystem_version: map.read_u16(o + 48)?,
            minor_subsystem_version: map.read_u16(o + 50)?,
            win32_version_value: map.read_u32(o + 52)?,
            size_of_image: map.read_u32(o + 56)?,
            size_of_headers: map.read_u32(o + 60)?,
            checksum: map.read_u32(o + 64)?,
            subsystem: map.read_u16(o + 68)?,
            dll_characteristics: map.read_u16(o + 70)?,
            size_of_stack_reserve: map.read_u64(o + 72)?,
            size_of_stack_commit: map.read_u64(o + 80)?,
            size_of_heap_reserve: map.read_u64(o + 88)?,
            size_of_heap_commit: map.read_u64(o + 96)?,
            loader_flags: map.read_u32(o + 104)?,
            number_of_rva_and_sizes: map.read_u32(o + 108)?,
            data_directory: [DataDirectory::default(); 16],
        })
    }
}

/// The 32/64-bit optional header variants behind one set of accessors.
/// Accessors widen to `u64` where the variants disagree on field width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalHeader {
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

impl OptionalHeader {
    pub fn is64(&self) -> bool {
        matches!(self, OptionalHeader::Pe32Plus(_))
    }

    pub fn magic(&self) -> u16 {
        match self {
            OptionalHeader::Pe32(oh) => oh.magic,
            OptionalHeader::Pe32Plus(oh) => oh.magic,
        }
    }

    pub fn image_base(&self) -> u64 {
        match self {
            OptionalHeader::Pe32(oh) => u64::from(oh.image_base),
            OptionalHeader::Pe32Plus(oh) => oh.image_base,
        }
    }

    pub fn section_alignment(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.section_alignment,
            OptionalHeader::Pe32Plus(oh) => oh.section_alignment,
        }
    }

    pub fn file_alignment(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.file_alignment,
            OptionalHeader::Pe32Plus(oh) => oh.file_alignment,
        }
    }

    pub fn size_of_headers(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.size_of_headers,
            OptionalHeader::Pe32Plus(oh) => oh.size_of_headers,
        }
    }

    pub fn size_of_image(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.size_of_image,
            OptionalHeader::Pe32Plus(oh) => oh.size_of_image,
        }
    }

    pub fn address_of_entry_point(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.address_of_entry_point,
            OptionalHeader::Pe32Plus(oh) => oh.address_of_entry_point,
        }
    }

    pub fn checksum(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.checksum,
            OptionalHeader::Pe32Plus(oh) => oh.checksum,
        }
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(oh) => oh.number_of_rva_and_sizes,
            OptionalHeader::Pe32Plus(oh) => oh.number_of_rva_and_sizes,
        }
    }

    pub fn data_directory(&self) -> &[DataDirectory; 16] {
        match self {
            OptionalHeader::Pe32(oh) => &oh.data_directory,
            OptionalHeader::Pe32Plus(oh) => &oh.data_directory,
        }
    }

    /// Directory entry, filtered the way consumers want it: present and
    /// non-empty.
    pub fn directory(&self, index: usize) -> Option<DataDirectory> {
        let d = self.data_directory().get(index).copied()?;
        (d.virtual_address != 0 && d.size != 0).then_some(d)
    }

    /// Offset of the `CheckSum` field relative to the optional header start.
    pub fn checksum_offset(&self) -> u32 {
        64
    }

    /// Offset of the `NumberOfRvaAndSizes` field relative to the optional
    /// header start.
    pub fn rva_count_offset(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(_) => 92,
            OptionalHeader::Pe32Plus(_) => 108,
        }
    }

    /// Offset of the Certificate Table directory entry relative to the
    /// optional header start.
    pub fn security_dir_offset(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(_) => 128,
            OptionalHeader::Pe32Plus(_) => 144,
        }
    }

    pub(crate) fn parse(
        map: &FileMap,
        offset: u32,
        file_header: &FileHeader,
    ) -> Result<Option<Self>, PeError> {
        let soh = file_header.size_of_optional_header;
        if soh == 0 {
            debug!("no optional header, fingerprinting will be unavailable");
            return Ok(None);
        }
        if soh < 2 {
            return Err(PeError::CorruptHeader("optional header smaller than its magic"));
        }
        // The whole declared header must fit in 32-bit offset space; field
        // reads below can then use plain offset arithmetic.
        offset
            .checked_add(u32::from(soh))
            .ok_or(PeError::OutsideBoundary)?;

        let magic = map.read_u16(offset)?;
        match magic {
            PE32_MAGIC => {
                if soh < OPTIONAL_HEADER32_MIN_SIZE {
                    return Err(PeError::CorruptHeader(
                        "optional header size below the PE32 minimum",
                    ));
                }
                let mut oh = OptionalHeader32::parse(map, offset)?;
                if oh.image_base % 0x10000 != 0 {
                    return Err(PeError::CorruptHeader("image base not aligned to 64K"));
                }
                oh.data_directory = read_data_directories(
                    map,
                    offset + u32::from(OPTIONAL_HEADER32_MIN_SIZE),
                    soh - OPTIONAL_HEADER32_MIN_SIZE,
                    oh.number_of_rva_and_sizes,
                )?;
                Ok(Some(OptionalHeader::Pe32(oh)))
            }
            PE32PLUS_MAGIC => {
                if soh < OPTIONAL_HEADER64_MIN_SIZE {
                    return Err(PeError::CorruptHeader(
                        "optional header size below the PE32+ minimum",
                    ));
                }
                let mut oh = OptionalHeader64::parse(map, offset)?;
                if oh.image_base % 0x10000 != 0 {
                    return Err(PeError::CorruptHeader("image base not aligned to 64K"));
                }
                oh.data_directory = read_data_directories(
                    map,
                    offset + u32::from(OPTIONAL_HEADER64_MIN_SIZE),
                    soh - OPTIONAL_HEADER64_MIN_SIZE,
                    oh.number_of_rva_and_sizes,
                )?;
                Ok(Some(OptionalHeader::Pe32Plus(oh)))
            }
            _ => Err(PeError::CorruptHeader("unexpected optional header magic")),
        }
    }
}

/// The residual bytes of the optional header hold exactly
/// `NumberOfRvaAndSizes` directory entries; anything else is corruption.
/// The fixed 16-entry array keeps missing entries zeroed and drops
/// surplus ones.
fn read_data_directories(
    map: &FileMap,
    offset: u32,
    residual: u16,
    count: u32,
) -> Result<[DataDirectory; 16], PeError> {
    if u32::from(residual) != count.wrapping_mul(8) {
        return Err(PeError::CorruptHeader(
            "data directory size is inconsistent with the directory count",
        ));
    }

    let mut directories = [DataDirectory::default(); 16];
    for i in 0..count {
        let entry_offset = u64::from(offset) + u64::from(i) * 8;
        let entry_offset =
            u32::try_from(entry_offset).map_err(|_| PeError::OutsideBoundary)?;
        let virtual_address = map.read_u32(entry_offset)?;
        let size = map.read_u32(entry_offset + 4)?;
        if let Some(slot) = directories.get_mut(i as usize) {
            *slot = DataDirectory { virtual_address, size };
        }
    }
    Ok(directories)
}

/// NT headers: the 4-byte signature, the file header and, when present,
/// the optional header.
#[derive(Debug, Clone)]
pub struct NtHeader {
    pub signature: u32,
    pub file_header: FileHeader,
    pub optional_header: Option<OptionalHeader>,
}

impl NtHeader {
    pub(crate) fn parse(map: &FileMap, dos: &DosHeader) -> Result<Self, PeError> {
        let nt_offset = dos.address_of_new_exe_header;
        let signature = map.read_u32(nt_offset)?;
        if signature != PE_SIGNATURE {
            return Err(PeError::InvalidSignature);
        }

        let optional_offset = nt_offset
            .checked_add(4 + FILE_HEADER_SIZE)
            .ok_or(PeError::OutsideBoundary)?;
        let file_header = FileHeader::parse(map, nt_offset + 4)?;
        let optional_header = OptionalHeader::parse(map, optional_offset, &file_header)?;

        Ok(Self { signature, file_header, optional_header })
    }
}
