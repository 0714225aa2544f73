//! Import directory walker: descriptor decoding, dual thunk-table
//! reconstruction (ILT + IAT) and the delay-load variant.
//!
//! Damage is contained per descriptor. A descriptor with broken tables or
//! a flood of invalid names is logged and dropped; everything decoded
//! before it survives, and `PeFile` construction never fails here.

use log::warn;

use crate::consts::*;
use crate::utils::{is_valid_dos_filename, is_valid_function_name};
use crate::{PeError, PeFile};

pub const IMPORT_DESCRIPTOR_SIZE: u32 = 20;
pub const DELAY_IMPORT_DESCRIPTOR_SIZE: u32 = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageImportDescriptor {
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name: u32,
    pub first_thunk: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageDelayImportDescriptor {
    pub attributes: u32,
    pub name: u32,
    pub module_handle_rva: u32,
    pub import_address_table_rva: u32,
    pub import_name_table_rva: u32,
    pub bound_import_address_table_rva: u32,
    pub unload_information_table_rva: u32,
    pub time_date_stamp: u32,
}

/// One imported symbol, by name or by ordinal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportFunction {
    /// Resolved name, or `#<ordinal>` for by-ordinal imports.
    pub name: String,
    pub hint: u16,
    pub by_ordinal: bool,
    pub ordinal: u32,
    pub original_thunk_value: u64,
    pub thunk_value: u64,
    pub thunk_rva: u32,
    pub original_thunk_rva: u32,
}

/// One imported DLL with its functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub offset: u32,
    pub name: String,
    pub functions: Vec<ImportFunction>,
    pub descriptor: ImageImportDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayImport {
    pub offset: u32,
    pub name: String,
    pub functions: Vec<ImportFunction>,
    pub descriptor: ImageDelayImportDescriptor,
}

/// A thunk-table entry: its `AddressOfData` and the RVA it was read from.
#[derive(Debug, Clone, Copy)]
struct ThunkData {
    value: u64,
    rva: u32,
}

pub(crate) fn read_import_directory(file: &PeFile) -> Vec<Import> {
    let Some(optional_header) = &file.nt_header.optional_header else {
        return Vec::new();
    };
    if optional_header.number_of_rva_and_sizes() < IMAGE_DIRECTORY_ENTRY_IMPORT as u32 + 1 {
        return Vec::new();
    }
    let directory = optional_header.data_directory()[IMAGE_DIRECTORY_ENTRY_IMPORT];

    let descriptors = match directory_descriptors(file, directory.virtual_address) {
        Some(d) => d,
        None => return Vec::new(),
    };

    let mut imports = Vec::new();
    let mut rva = directory.virtual_address;
    for descriptor in descriptors {
        let file_offset = file.offset_from_rva(rva).unwrap_or(u32::MAX);
        rva = rva.wrapping_add(IMPORT_DESCRIPTOR_SIZE);

        let max_len = thunk_budget(
            file.size(),
            file_offset,
            rva,
            descriptor.original_first_thunk,
            descriptor.first_thunk,
        );

        let functions = match read_descriptor_functions(
            file,
            descriptor.original_first_thunk,
            descriptor.first_thunk,
            false,
            max_len,
        ) {
            Ok(functions) => functions,
            Err(err) => {
                warn!("skipping import descriptor at {file_offset:#x}: {err}");
                continue;
            }
        };

        let dll_name = file.string_at_rva(descriptor.name, MAX_DLL_LENGTH);
        if !is_valid_dos_filename(&dll_name) {
            warn!("skipping import descriptor with invalid DLL name");
            continue;
        }

        imports.push(Import { offset: file_offset, name: dll_name, functions, descriptor });
    }
    imports
}

pub(crate) fn read_delay_import_directory(file: &PeFile) -> Vec<DelayImport> {
    let Some(optional_header) = &file.nt_header.optional_header else {
        return Vec::new();
    };
    if optional_header.number_of_rva_and_sizes() < IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT as u32 + 1
    {
        return Vec::new();
    }
    let directory = optional_header.data_directory()[IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT];

    let data = match directory_data(file, directory.virtual_address) {
        Some(d) => d,
        None => return Vec::new(),
    };
    let image_base = optional_header.image_base();

    let mut descriptors = Vec::new();
    let mut d = data.as_slice();
    while d.len() >= DELAY_IMPORT_DESCRIPTOR_SIZE as usize {
        let descriptor = ImageDelayImportDescriptor {
            attributes: le32(&d[0..4]),
            name: le32(&d[4..8]),
            module_handle_rva: le32(&d[8..12]),
            import_address_table_rva: le32(&d[12..16]),
            import_name_table_rva: le32(&d[16..20]),
            bound_import_address_table_rva: le32(&d[20..24]),
            unload_information_table_rva: le32(&d[24..28]),
            time_date_stamp: le32(&d[28..32]),
        };
        d = &d[DELAY_IMPORT_DESCRIPTOR_SIZE as usize..];
        if descriptor.name == 0 {
            break;
        }
        descriptors.push(descriptor);
    }

    let mut delay_imports = Vec::new();
    let mut rva = directory.virtual_address;
    for descriptor in descriptors {
        let file_offset = file.offset_from_rva(rva).unwrap_or(u32::MAX);
        rva = rva.wrapping_add(DELAY_IMPORT_DESCRIPTOR_SIZE);

        // Old-style descriptors store virtual addresses everywhere.
        let is_old_delay = descriptor.attributes == 0;
        let max_len = file.size().wrapping_sub(file_offset);

        let functions = match read_descriptor_functions(
            file,
            descriptor.import_name_table_rva,
            descriptor.import_address_table_rva,
            is_old_delay,
            max_len,
        ) {
            Ok(functions) => functions,
            Err(err) => {
                warn!("skipping delay-import descriptor at {file_offset:#x}: {err}");
                continue;
            }
        };

        let name_rva = if is_old_delay {
            descriptor.name.wrapping_sub(image_base as u32)
        } else {
            descriptor.name
        };
        let dll_name = file.string_at_rva(name_rva, MAX_DLL_LENGTH);
        if !is_valid_dos_filename(&dll_name) {
            warn!("skipping delay-import descriptor with invalid DLL name");
            continue;
        }

        delay_imports.push(DelayImport {
            offset: file_offset,
            name: dll_name,
            functions,
            descriptor,
        });
    }
    delay_imports
}

/// Raw bytes of the directory, pulled from the section that contains its
/// virtual address.
fn directory_data(file: &PeFile, rva: u32) -> Option<Vec<u8>> {
    let section = file
        .sections
        .iter()
        .find(|s| s.virtual_address <= rva && rva < s.virtual_address.wrapping_add(s.virtual_size))?;
    let data = section.data(file);
    let skip = (rva - section.virtual_address) as usize;
    if skip > data.len() {
        return None;
    }
    Some(data[skip..].to_vec())
}

/// Decodes consecutive import descriptors up to the all-zero sentinel.
fn directory_descriptors(file: &PeFile, rva: u32) -> Option<Vec<ImageImportDescriptor>> {
    let data = directory_data(file, rva)?;
    let mut descriptors = Vec::new();
    let mut d = data.as_slice();
    while d.len() >= IMPORT_DESCRIPTOR_SIZE as usize {
        let descriptor = ImageImportDescriptor {
            original_first_thunk: le32(&d[0..4]),
            time_date_stamp: le32(&d[4..8]),
            forwarder_chain: le32(&d[8..12]),
            name: le32(&d[12..16]),
            first_thunk: le32(&d[16..20]),
        };
        d = &d[IMPORT_DESCRIPTOR_SIZE as usize..];
        if descriptor.original_first_thunk == 0
            && descriptor.first_thunk == 0
            && descriptor.name == 0
        {
            break;
        }
        descriptors.push(descriptor);
    }
    Some(descriptors)
}

/// Byte budget for a descriptor's thunk tables. Defaults to
/// "rest of the file", tightened by the relative order of the advanced
/// descriptor RVA and the two table RVAs. Best-effort: the per-entry stop
/// conditions are the real safety net, so wrapping arithmetic is fine.
fn thunk_budget(
    file_size: u32,
    file_offset: u32,
    rva: u32,
    original_first_thunk: u32,
    first_thunk: u32,
) -> u32 {
    let mut max_len = file_size.wrapping_sub(file_offset);
    if rva > original_first_thunk || rva > first_thunk {
        if rva < original_first_thunk {
            max_len = rva.wrapping_sub(first_thunk);
        } else if rva < first_thunk {
            max_len = rva.wrapping_sub(original_first_thunk);
        } else {
            max_len = rva
                .wrapping_sub(original_first_thunk)
                .max(rva.wrapping_sub(first_thunk));
        }
    }
    max_len
}

/// Rebuilds the function list of one descriptor from its ILT, falling
/// back to the IAT when the ILT is empty.
fn read_descriptor_functions(
    file: &PeFile,
    original_first_thunk: u32,
    first_thunk: u32,
    is_old_delay: bool,
    max_len: u32,
) -> Result<Vec<ImportFunction>, PeError> {
    let Some(optional_header) = &file.nt_header.optional_header else {
        return Ok(Vec::new());
    };
    let is64 = optional_header.is64();
    let image_base = optional_header.image_base();
    let (ordinal_flag, address_mask) = if is64 {
        (IMAGE_ORDINAL_FLAG64, ADDRESS_MASK64)
    } else {
        (u64::from(IMAGE_ORDINAL_FLAG32), ADDRESS_MASK32)
    };

    let mut ilt = read_thunk_table(file, original_first_thunk, max_len, is64, is_old_delay);
    let mut iat = read_thunk_table(file, first_thunk, max_len, is64, is_old_delay);

    if ilt.is_empty() && iat.is_empty() {
        return Err(PeError::DamagedImportTable);
    }
    let use_ilt = !ilt.is_empty();
    let table_len = if use_ilt { ilt.len() } else { iat.len() };

    let mut functions = Vec::new();
    let mut num_invalid: u32 = 0;
    for idx in 0..table_len {
        let mut imp = ImportFunction::default();
        let raw = if use_ilt { ilt[idx].value } else { iat[idx].value };

        if raw > 0 {
            if raw & ordinal_flag != 0 {
                imp.by_ordinal = true;
                imp.ordinal = (raw & 0xFFFF) as u32;

                if let Some(t) = ilt.get(idx) {
                    imp.original_thunk_value = t.value;
                    imp.original_thunk_rva = t.rva;
                }
                if let Some(t) = iat.get(idx) {
                    imp.thunk_value = t.value;
                    imp.thunk_rva = t.rva;
                }
                imp.name = format!("#{}", imp.ordinal);
            } else {
                // Old delay descriptors store VAs; rebase the selected
                // table entry in place so both views below agree.
                if is_old_delay {
                    let adjusted = raw.wrapping_sub(image_base);
                    if use_ilt {
                        ilt[idx].value = adjusted;
                    } else {
                        iat[idx].value = adjusted;
                    }
                }

                if let Some(t) = ilt.get(idx) {
                    imp.original_thunk_value = t.value & address_mask;
                    imp.original_thunk_rva = t.rva;
                }
                if let Some(t) = iat.get(idx) {
                    imp.thunk_value = t.value & address_mask;
                    imp.thunk_rva = t.rva;
                }

                let masked = if use_ilt { ilt[idx].value } else { iat[idx].value } & address_mask;
                let hint_name_rva = masked as u32;
                imp.hint = match file.offset_from_rva(hint_name_rva) {
                    Some(offset) => file.read_u16(offset).unwrap_or(u16::MAX),
                    None => u16::MAX,
                };
                imp.name = file
                    .string_at_rva(hint_name_rva.wrapping_add(2), MAX_IMPORT_NAME_LENGTH);
                if !is_valid_function_name(&imp.name) {
                    imp.name = "*invalid*".to_string();
                }
            }
        }

        if imp.name == "*invalid*" {
            if num_invalid > MAX_INVALID_NAMES && num_invalid == idx as u32 {
                return Err(PeError::TooManyInvalid);
            }
            num_invalid += 1;
            continue;
        }

        functions.push(imp);
    }
    Ok(functions)
}

/// Walks one thunk table starting at `rva`. Stops on budget exhaustion, a
/// zero entry, or an entry pointing back into the table itself; gives up
/// entirely when an entry cannot be located in the file.
fn read_thunk_table(
    file: &PeFile,
    rva: u32,
    max_len: u32,
    is64: bool,
    is_old_delay: bool,
) -> Vec<ThunkData> {
    let mut table = Vec::new();
    if rva == 0 {
        return table;
    }
    let entry_size: u32 = if is64 { 8 } else { 4 };
    let image_base = match &file.nt_header.optional_header {
        Some(oh) => oh.image_base(),
        None => return table,
    };

    let start_rva = rva;
    let mut rva = rva;
    loop {
        if rva >= start_rva.wrapping_add(max_len) {
            break;
        }

        let lookup_rva = if is_old_delay {
            rva.wrapping_sub(image_base as u32)
        } else {
            rva
        };
        let Some(offset) = file.offset_from_rva(lookup_rva) else {
            return Vec::new();
        };

        let value = if is64 {
            match file.read_u64(offset) {
                Ok(v) => v,
                Err(_) => return Vec::new(),
            }
        } else {
            match file.read_u32(offset) {
                Ok(v) => u64::from(v),
                Err(_) => return Vec::new(),
            }
        };

        if value == 0 {
            break;
        }
        // Corruption guard: an entry whose payload points back inside the
        // table produces endless garbage.
        if value >= u64::from(start_rva) && value <= u64::from(rva) {
            break;
        }

        table.push(ThunkData { value, rva });
        rva = rva.wrapping_add(entry_size);
    }
    table
}

fn le32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use crate::testpe::*;
    use crate::PeFile;

    fn pe_with_imports() -> Vec<u8> {
        let mut data = build_pe64();
        add_imports(&mut data);
        data
    }

    fn descriptor_offset() -> usize {
        (IMP_DIR_RVA - TEXT_VA + TEXT_RAW_OFFSET) as usize
    }

    #[test]
    fn walks_ilt_and_decodes_names_and_ordinals() {
        let pe = PeFile::from_bytes(pe_with_imports()).expect("parse should succeed");
        assert_eq!(pe.imports.len(), 1);

        let import = &pe.imports[0];
        assert_eq!(import.name, "KERNEL32.dll");
        assert_eq!(import.offset, 0x300);
        assert_eq!(import.descriptor.original_first_thunk, IMP_ILT_RVA);
        assert_eq!(import.functions.len(), 2);

        let by_name = &import.functions[0];
        assert!(!by_name.by_ordinal);
        assert_eq!(by_name.name, "CreateFileW");
        assert_eq!(by_name.hint, 0x12);
        assert_eq!(by_name.original_thunk_value, u64::from(IMP_HINT_NAME_RVA));
        assert_eq!(by_name.original_thunk_rva, IMP_ILT_RVA);
        assert_eq!(by_name.thunk_rva, IMP_IAT_RVA);

        let by_ordinal = &import.functions[1];
        assert!(by_ordinal.by_ordinal);
        assert_eq!(by_ordinal.ordinal, 5);
        assert_eq!(by_ordinal.name, "#5");
        assert_eq!(by_ordinal.original_thunk_value, 0x8000_0000_0000_0005);
        assert_eq!(by_ordinal.original_thunk_rva, IMP_ILT_RVA + 8);
    }

    #[test]
    fn empty_ilt_falls_back_to_the_iat() {
        let mut data = pe_with_imports();
        put_u32(&mut data, descriptor_offset(), 0); // OriginalFirstThunk = 0
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert_eq!(pe.imports.len(), 1);
        let import = &pe.imports[0];
        assert_eq!(import.functions.len(), 2);
        assert_eq!(import.functions[0].name, "CreateFileW");
        // Only the IAT view exists now.
        assert_eq!(import.functions[0].original_thunk_rva, 0);
        assert_eq!(import.functions[0].thunk_rva, IMP_IAT_RVA);
    }

    #[test]
    fn descriptor_with_both_tables_broken_is_dropped() {
        let mut data = pe_with_imports();
        put_u32(&mut data, descriptor_offset(), 0); // OriginalFirstThunk
        put_u32(&mut data, descriptor_offset() + 16, 0); // FirstThunk
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert!(pe.imports.is_empty());
    }

    #[test]
    fn invalid_dll_name_drops_the_descriptor() {
        let mut data = pe_with_imports();
        let name = (IMP_DLL_NAME_RVA - TEXT_VA + TEXT_RAW_OFFSET) as usize;
        put_bytes(&mut data, name, b"a|b\0");
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert!(pe.imports.is_empty());
    }

    #[test]
    fn invalid_function_names_are_skipped() {
        let mut data = pe_with_imports();
        let hint_name = (IMP_HINT_NAME_RVA - TEXT_VA + TEXT_RAW_OFFSET) as usize;
        put_bytes(&mut data, hint_name + 2, b"Create File\0");
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        let import = &pe.imports[0];
        assert_eq!(import.functions.len(), 1);
        assert_eq!(import.functions[0].name, "#5");
    }

    #[test]
    fn self_referential_thunks_stop_the_walk() {
        let mut data = pe_with_imports();
        // First ILT entry points back at the table itself.
        let ilt = (IMP_ILT_RVA - TEXT_VA + TEXT_RAW_OFFSET) as usize;
        put_u64(&mut data, ilt, u64::from(IMP_ILT_RVA));
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        let import = &pe.imports[0];
        // The ILT walk stopped immediately; the IAT still carries entries.
        assert_eq!(import.functions.len(), 2);
        assert_eq!(import.functions[0].thunk_rva, IMP_IAT_RVA);
    }

    #[test]
    fn empty_function_names_are_kept_but_unnamed() {
        let mut data = pe_with_imports();
        let hint_name = (IMP_HINT_NAME_RVA - TEXT_VA + TEXT_RAW_OFFSET) as usize;
        put_bytes(&mut data, hint_name + 2, b"\0");
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert_eq!(pe.imports[0].functions[0].name, "");
    }

    #[test]
    fn delay_imports_reuse_the_thunk_machinery() {
        let mut data = pe_with_imports();
        // Delay descriptor at rva 0x1140, new-style (attributes = 1).
        let d = (0x1140 - TEXT_VA + TEXT_RAW_OFFSET) as usize;
        put_u32(&mut data, d, 1); // attributes
        put_u32(&mut data, d + 4, IMP_DLL_NAME_RVA); // name
        put_u32(&mut data, d + 12, IMP_IAT_RVA); // import address table
        put_u32(&mut data, d + 16, IMP_ILT_RVA); // import name table
        put_u32(&mut data, DD_BASE64 + 13 * 8, 0x1140);
        put_u32(&mut data, DD_BASE64 + 13 * 8 + 4, 0x40);

        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert_eq!(pe.delay_imports.len(), 1);
        let delay = &pe.delay_imports[0];
        assert_eq!(delay.name, "KERNEL32.dll");
        assert_eq!(delay.functions.len(), 2);
        assert_eq!(delay.functions[0].name, "CreateFileW");
        assert_eq!(delay.functions[1].name, "#5");
    }
}
