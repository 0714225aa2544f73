//! Overlay detection: bytes past the last region any part of the image
//! maps.

use pe_file::{PeFile, FILE_HEADER_SIZE, IMAGE_DIRECTORY_ENTRY_SECURITY};

/// File offset where the overlay starts, or 0 when there is none.
///
/// Candidates are the optional header span, every section's raw range
/// and every non-Security data directory, each considered only when it
/// ends inside the file.
pub fn overlay_start_offset(file: &PeFile) -> u32 {
    let Some(optional_header) = &file.nt_header.optional_header else {
        return 0;
    };
    let size = u64::from(file.size());
    let mut largest: (u64, u64) = (0, 0);

    let mut consider = |offset: u64, length: u64| {
        let end = offset + length;
        if end <= size && end > largest.0 + largest.1 {
            largest = (offset, length);
        }
    };

    consider(
        u64::from(file.dos_header.address_of_new_exe_header) + 4 + u64::from(FILE_HEADER_SIZE),
        u64::from(file.nt_header.file_header.size_of_optional_header),
    );

    for section in &file.sections {
        consider(u64::from(section.offset), u64::from(section.size));
    }

    for (index, directory) in optional_header.data_directory().iter().enumerate() {
        if index == IMAGE_DIRECTORY_ENTRY_SECURITY {
            continue;
        }
        if let Some(offset) = file.offset_from_rva(directory.virtual_address) {
            consider(u64::from(offset), u64::from(directory.size));
        }
    }

    let end = largest.0 + largest.1;
    if end < size {
        end as u32
    } else {
        0
    }
}

/// The overlay bytes, when the file has any.
pub fn overlay(file: &PeFile) -> Option<&[u8]> {
    let start = overlay_start_offset(file);
    (start != 0).then(|| &file.data()[start as usize..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpe::*;
    use pe_file::PeFile;

    #[test]
    fn fully_mapped_files_have_no_overlay() {
        let pe = PeFile::from_bytes(build_pe64()).unwrap();
        assert_eq!(overlay_start_offset(&pe), 0);
        assert!(overlay(&pe).is_none());
    }

    #[test]
    fn appended_bytes_are_the_overlay() {
        let mut data = build_pe64();
        let mapped_end = data.len() as u32;
        data.extend_from_slice(b"OVERLAYOVERLAYOVERLAY");
        let pe = PeFile::from_bytes(data).unwrap();

        assert_eq!(overlay_start_offset(&pe), mapped_end);
        let tail = overlay(&pe).expect("overlay should exist");
        assert_eq!(tail.len(), 21);
        assert_eq!(&tail[..7], b"OVERLAY");
    }

    #[test]
    fn no_optional_header_means_no_overlay() {
        let mut data = build_pe64();
        put_u16(&mut data, COFF_OFFSET + 16, 0);
        put_u16(&mut data, COFF_OFFSET + 2, 0);
        data.extend_from_slice(b"tail");
        let pe = PeFile::from_bytes(data).unwrap();
        assert_eq!(overlay_start_offset(&pe), 0);
    }

    #[test]
    fn appending_an_overlay_changes_authentihash_but_not_the_others() {
        let mut data = build_pe64();
        add_imports(&mut data);
        add_rich(&mut data);

        let pe = PeFile::from_bytes(data.clone()).unwrap();
        let auth = crate::authentihash(&pe).unwrap();
        let imp = crate::imp_hash(&pe).unwrap();
        let rich = crate::rich_header_hash(&pe);

        data.extend_from_slice(&[0xEE; 64]);
        let pe = PeFile::from_bytes(data).unwrap();
        assert_ne!(crate::authentihash(&pe).unwrap(), auth);
        assert_eq!(crate::imp_hash(&pe).unwrap(), imp);
        assert_eq!(crate::rich_header_hash(&pe), rich);
    }
}
