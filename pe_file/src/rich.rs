//! Rich header: undocumented linker metadata wedged between the DOS stub
//! and the PE header, XOR-encrypted with the key stored after the `Rich`
//! trailer.

use crate::consts::{DANS_SIGNATURE, DOS_HEADER_SIZE, RICH_SIGNATURE};
use crate::map::FileMap;

/// One decoded (`@comp.id`, count) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompId {
    /// Build number, the low 16 bits of the id word.
    pub minor_cv: u16,
    /// Product id, the high 16 bits.
    pub prod_id: u16,
    pub count: u32,
    /// The raw id word as stored.
    pub unmasked: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichHeader {
    pub xor_key: u32,
    pub comp_ids: Vec<CompId>,
    /// File offset of the `DanS` marker.
    pub dans_offset: u32,
    /// Bytes from `DanS` through the end of the XOR key, still encrypted.
    pub raw: Vec<u8>,
}

/// Locates and decodes the Rich header. Absence and corruption both come
/// back as `None`; this never fails construction.
pub(crate) fn read_rich_header(map: &FileMap, e_lfanew: u32) -> Option<RichHeader> {
    let stub = map.read_padded(0, e_lfanew);
    let rich_offset = stub.windows(4).position(|w| w == RICH_SIGNATURE)? as u32;

    let xor_key = map.read_u32(rich_offset + 4).ok()?;

    // Walk backward one word at a time, decrypting until DanS shows up.
    // The scan is bounded: the header cannot start inside the DOS header.
    let mut decrypted: Vec<u32> = Vec::new();
    let mut dans_offset: Option<u32> = None;
    let estimated_begin_dans = i64::from(rich_offset) - 4 - i64::from(DOS_HEADER_SIZE);
    let mut it: i64 = 0;
    while it < estimated_begin_dans {
        let word = map.read_u32((i64::from(rich_offset) - 4 - it) as u32).ok()?;
        let plain = word ^ xor_key;
        if plain == DANS_SIGNATURE {
            dans_offset = Some((i64::from(rich_offset) - it - 4) as u32);
            break;
        }
        decrypted.push(plain);
        it += 4;
    }
    let dans_offset = dans_offset?;

    let raw = map.read_padded(dans_offset, rich_offset + 8 - dans_offset);

    decrypted.reverse();

    // The first three words after DanS are padding; the rest pair up as
    // (id, count). A trailing odd word is dropped.
    let len = decrypted.len() as i64;
    let len_comp_ids = if (len - 3) % 2 != 0 { len - 1 } else { len };

    let mut comp_ids = Vec::new();
    let mut i: i64 = 3;
    while i < len_comp_ids {
        let id_word = decrypted[i as usize];
        let count = decrypted[(i + 1) as usize];
        comp_ids.push(CompId {
            minor_cv: (id_word & 0xFFFF) as u16,
            prod_id: (id_word >> 16) as u16,
            count,
            unmasked: id_word,
        });
        i += 2;
    }

    Some(RichHeader { xor_key, comp_ids, dans_offset, raw })
}

#[cfg(test)]
mod tests {
    use crate::testpe::*;
    use crate::PeFile;

    #[test]
    fn decodes_key_offset_and_comp_ids() {
        let mut data = build_pe64();
        add_rich(&mut data);
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        let rich = pe.rich_header.as_ref().expect("rich header should parse");

        assert_eq!(rich.xor_key, RICH_KEY);
        assert_eq!(rich.dans_offset, RICH_DANS_OFFSET);
        assert_eq!(rich.comp_ids.len(), 1);
        let comp = rich.comp_ids[0];
        assert_eq!(comp.unmasked, RICH_COMP_ID_WORD);
        assert_eq!(comp.prod_id, (RICH_COMP_ID_WORD >> 16) as u16);
        assert_eq!(comp.minor_cv, (RICH_COMP_ID_WORD & 0xFFFF) as u16);
        assert_eq!(comp.count, RICH_COMP_COUNT);

        // Raw spans DanS through the end of the key, still encrypted.
        assert_eq!(rich.raw.len(), (RICH_MARKER_OFFSET + 8 - RICH_DANS_OFFSET) as usize);
        assert_eq!(&rich.raw[0x18..0x1C], b"Rich");
        assert_eq!(rich.dans_offset % 4, 0);
        assert_eq!(rich.raw.len() % 4, 0);
    }

    #[test]
    fn absent_marker_means_no_rich_header() {
        let pe = PeFile::from_bytes(build_pe64()).unwrap();
        assert!(pe.rich_header.is_none());
    }

    #[test]
    fn marker_without_dans_is_rejected() {
        let mut data = build_pe64();
        // A bare trailer with no encrypted block in front of it.
        put_bytes(&mut data, 0x60, b"Rich");
        put_u32(&mut data, 0x64, 0x1111_2222);
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert!(pe.rich_header.is_none());
    }

    #[test]
    fn truncated_scan_range_is_abandoned() {
        let mut data = build_pe64();
        // "Rich" too close to the DOS header start leaves no room for DanS.
        put_bytes(&mut data, 0x44, b"Rich");
        let pe = PeFile::from_bytes(data).expect("parse should succeed");
        assert!(pe.rich_header.is_none());
    }
}
