//! COFF symbol table and string table.
//!
//! The string table sits right after the symbol table and backs both long
//! section names (`/N`) and long symbol names.

use crate::headers::FileHeader;
use crate::map::FileMap;
use crate::utils::c_string;
use crate::PeError;

pub const COFF_SYMBOL_SIZE: u32 = 18;

/// Raw COFF symbol table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffSymbol {
    pub name: [u8; 8],
    pub value: u32,
    pub section_number: i16,
    pub kind: u16,
    pub storage_class: u8,
    pub number_of_aux_symbols: u8,
}

impl CoffSymbol {
    /// Real name of the symbol: inline when it fits in 8 bytes, otherwise
    /// an offset into the string table.
    pub fn full_name(&self, string_table: &StringTable) -> Result<String, PeError> {
        if self.name[..4] == [0, 0, 0, 0] {
            let offset =
                u32::from_le_bytes([self.name[4], self.name[5], self.name[6], self.name[7]]);
            return string_table.string(offset);
        }
        Ok(c_string(&self.name))
    }
}

/// `CoffSymbol` with the name resolved and auxiliary records folded away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub section_number: i16,
    pub kind: u16,
    pub storage_class: u8,
}

/// COFF string table: a length-prefixed blob of NUL-terminated strings.
#[derive(Debug, Clone, Default)]
pub struct StringTable(Vec<u8>);

impl StringTable {
    /// Extracts the string at `start`. Offsets count from the length
    /// prefix, so anything below 4 is invalid.
    pub fn string(&self, start: u32) -> Result<String, PeError> {
        if start < 4 {
            return Err(PeError::CorruptHeader("offset before the start of string table"));
        }
        let start = (start - 4) as usize;
        if start > self.0.len() {
            return Err(PeError::CorruptHeader("offset beyond the end of string table"));
        }
        Ok(c_string(&self.0[start..]))
    }
}

pub(crate) fn read_string_table(
    map: &FileMap,
    file_header: &FileHeader,
) -> Result<StringTable, PeError> {
    if file_header.pointer_to_symbol_table == 0 {
        return Ok(StringTable::default());
    }
    let offset = u64::from(file_header.pointer_to_symbol_table)
        + u64::from(COFF_SYMBOL_SIZE) * u64::from(file_header.number_of_symbols);
    let offset = u32::try_from(offset).map_err(|_| PeError::OutsideBoundary)?;

    let length = map.read_u32(offset)?;
    // The length includes its own four bytes.
    if length <= 4 {
        return Ok(StringTable::default());
    }
    let blob = map.slice(offset + 4, length - 4)?;
    Ok(StringTable(blob.to_vec()))
}

pub(crate) fn read_coff_symbols(
    map: &FileMap,
    file_header: &FileHeader,
) -> Result<Vec<CoffSymbol>, PeError> {
    if file_header.pointer_to_symbol_table == 0 || file_header.number_of_symbols == 0 {
        return Ok(Vec::new());
    }

    let count = file_header.number_of_symbols;
    let total = u64::from(count) * u64::from(COFF_SYMBOL_SIZE);
    let offset = file_header.pointer_to_symbol_table;
    if u64::from(offset) + total > u64::from(map.size()) {
        return Err(PeError::OutsideBoundary);
    }

    let mut symbols = Vec::with_capacity(count as usize);
    for i in 0..count {
        let o = offset + i * COFF_SYMBOL_SIZE;
        let raw = map.slice(o, COFF_SYMBOL_SIZE)?;
        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[..8]);
        symbols.push(CoffSymbol {
            name,
            value: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            section_number: i16::from_le_bytes([raw[12], raw[13]]),
            kind: u16::from_le_bytes([raw[14], raw[15]]),
            storage_class: raw[16],
            number_of_aux_symbols: raw[17],
        });
    }
    Ok(symbols)
}

/// Folds auxiliary records into their owning symbols and resolves names.
pub(crate) fn fold_aux_symbols(
    all_symbols: &[CoffSymbol],
    string_table: &StringTable,
) -> Result<Vec<Symbol>, PeError> {
    let mut symbols = Vec::new();
    let mut aux = 0u8;
    for sym in all_symbols {
        if aux > 0 {
            aux -= 1;
            continue;
        }
        aux = sym.number_of_aux_symbols;
        symbols.push(Symbol {
            name: sym.full_name(string_table)?,
            value: sym.value,
            section_number: sym.section_number,
            kind: sym.kind,
            storage_class: sym.storage_class,
        });
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(strings: &[&str]) -> StringTable {
        let mut blob = Vec::new();
        for s in strings {
            blob.extend_from_slice(s.as_bytes());
            blob.push(0);
        }
        StringTable(blob)
    }

    #[test]
    fn string_table_offsets_count_from_the_length_prefix() {
        let st = table(&["first", "second"]);
        assert_eq!(st.string(4).unwrap(), "first");
        assert_eq!(st.string(10).unwrap(), "second");
        assert!(st.string(3).is_err());
        assert!(st.string(1000).is_err());
    }

    #[test]
    fn inline_and_referenced_symbol_names() {
        let st = table(&["a_rather_long_symbol"]);
        let inline = CoffSymbol {
            name: *b"short\0\0\0",
            value: 0,
            section_number: 1,
            kind: 0,
            storage_class: 2,
            number_of_aux_symbols: 0,
        };
        assert_eq!(inline.full_name(&st).unwrap(), "short");

        let mut name = [0u8; 8];
        name[4..].copy_from_slice(&4u32.to_le_bytes());
        let referenced = CoffSymbol { name, ..inline };
        assert_eq!(referenced.full_name(&st).unwrap(), "a_rather_long_symbol");
    }

    #[test]
    fn aux_records_are_folded() {
        let st = StringTable::default();
        let base = CoffSymbol {
            name: *b"f\0\0\0\0\0\0\0",
            value: 0,
            section_number: 1,
            kind: 0x20,
            storage_class: 2,
            number_of_aux_symbols: 1,
        };
        let aux = CoffSymbol { name: [0xFF; 8], number_of_aux_symbols: 0, ..base };
        let tail = CoffSymbol { name: *b"g\0\0\0\0\0\0\0", number_of_aux_symbols: 0, ..base };

        let symbols = fold_aux_symbols(&[base, aux, tail], &st).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "f");
        assert_eq!(symbols[1].name, "g");
    }
}
