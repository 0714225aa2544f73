//! Rich header fingerprints: the MD5 of the decrypted blob and the
//! Microsoft linker checksum.

use md5::{Digest, Md5};

use pe_file::{hex_string, PeFile};

/// MD5 of the Rich header cleartext from `DanS` up to the `Rich` marker,
/// lowercase hex. Empty string when there is no Rich header.
pub fn rich_header_hash(file: &PeFile) -> String {
    let Some(rich) = &file.rich_header else {
        return String::new();
    };
    let Some(rich_index) = rich.raw.windows(4).position(|w| w == b"Rich") else {
        return String::new();
    };

    let key = rich.xor_key.to_le_bytes();
    let clear: Vec<u8> = rich.raw[..rich_index]
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ key[i % key.len()])
        .collect();

    let mut hasher = Md5::new();
    hasher.update(&clear);
    hex_string(&hasher.finalize())
}

/// The linker's Rich header checksum: `DanS` offset, plus every DOS
/// header byte rotated by its position (the `e_lfanew` field is skipped),
/// plus every comp id rotated by its count. All sums wrap at 2^32.
pub fn rich_header_checksum(file: &PeFile) -> u32 {
    let Some(rich) = &file.rich_header else {
        return 0;
    };

    let mut checksum = rich.dans_offset;
    for i in 0..rich.dans_offset {
        if (0x3C..0x40).contains(&i) {
            continue;
        }
        let Ok(b) = file.byte(i) else {
            return 0;
        };
        checksum = checksum.wrapping_add(u32::from(b).rotate_left(i % 32));
    }

    for comp in &rich.comp_ids {
        checksum = checksum.wrapping_add(comp.unmasked.rotate_left(comp.count % 32));
    }
    checksum
}
