//! Synthetic PE images for tests: structurally valid enough for the
//! parser, small enough to reason about byte by byte.

pub(crate) const PE_OFFSET: usize = 0x80;
pub(crate) const COFF_OFFSET: usize = PE_OFFSET + 4;
pub(crate) const OPT_OFFSET: usize = COFF_OFFSET + 20;
pub(crate) const DD_BASE64: usize = OPT_OFFSET + 112;
pub(crate) const TEXT_RAW_OFFSET: u32 = 0x200;
pub(crate) const TEXT_RAW_SIZE: u32 = 0x200;
pub(crate) const TEXT_VA: u32 = 0x1000;

pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Minimal PE32+ image: one `.text` section, `num_data_dirs` directory
/// entries, file alignment 0x200, section alignment 0x1000.
pub(crate) fn build_pe64_with_dirs(num_data_dirs: u32) -> Vec<u8> {
    let opt_header_size: u16 = 112 + (num_data_dirs as u16) * 8;
    let section_table_offset = OPT_OFFSET + opt_header_size as usize;
    let total_size = (TEXT_RAW_OFFSET + TEXT_RAW_SIZE) as usize;

    let mut buf = vec![0u8; total_size];

    // DOS header
    put_u16(&mut buf, 0, 0x5A4D); // MZ
    put_u32(&mut buf, 0x3C, PE_OFFSET as u32); // e_lfanew

    // PE signature
    put_u32(&mut buf, PE_OFFSET, 0x0000_4550);

    // File header
    put_u16(&mut buf, COFF_OFFSET, 0x8664); // Machine: AMD64
    put_u16(&mut buf, COFF_OFFSET + 2, 1); // NumberOfSections
    put_u32(&mut buf, COFF_OFFSET + 4, 0x5F00_0000); // TimeDateStamp
    put_u16(&mut buf, COFF_OFFSET + 16, opt_header_size);
    put_u16(&mut buf, COFF_OFFSET + 18, 0x0022); // Characteristics

    // Optional header (PE32+)
    put_u16(&mut buf, OPT_OFFSET, 0x020B);
    put_u32(&mut buf, OPT_OFFSET + 16, 0x1000); // AddressOfEntryPoint
    put_u64(&mut buf, OPT_OFFSET + 24, 0x0000_0001_4000_0000); // ImageBase
    put_u32(&mut buf, OPT_OFFSET + 32, 0x1000); // SectionAlignment
    put_u32(&mut buf, OPT_OFFSET + 36, 0x200); // FileAlignment
    put_u32(&mut buf, OPT_OFFSET + 56, 0x3000); // SizeOfImage
    put_u32(&mut buf, OPT_OFFSET + 60, 0x200); // SizeOfHeaders
    put_u32(&mut buf, OPT_OFFSET + 64, 0xDEAD_BEEF); // CheckSum
    put_u32(&mut buf, OPT_OFFSET + 108, num_data_dirs);

    // Section table: .text
    let s = section_table_offset;
    buf[s..s + 5].copy_from_slice(b".text");
    put_u32(&mut buf, s + 8, 0x1E0); // VirtualSize
    put_u32(&mut buf, s + 12, TEXT_VA); // VirtualAddress
    put_u32(&mut buf, s + 16, TEXT_RAW_SIZE); // SizeOfRawData
    put_u32(&mut buf, s + 20, TEXT_RAW_OFFSET); // PointerToRawData
    put_u32(&mut buf, s + 36, 0x6000_0020); // Characteristics

    // Recognizable first bytes of .text
    buf[TEXT_RAW_OFFSET as usize] = 0xCC;
    buf[TEXT_RAW_OFFSET as usize + 1] = 0xC3;

    buf
}

pub(crate) fn build_pe64() -> Vec<u8> {
    build_pe64_with_dirs(16)
}

/// Minimal PE32 image, same layout ideas as the 64-bit builder.
pub(crate) fn build_pe32() -> Vec<u8> {
    let num_data_dirs: u32 = 16;
    let opt_header_size: u16 = 96 + (num_data_dirs as u16) * 8;
    let section_table_offset = OPT_OFFSET + opt_header_size as usize;
    let total_size = (TEXT_RAW_OFFSET + TEXT_RAW_SIZE) as usize;

    let mut buf = vec![0u8; total_size];

    put_u16(&mut buf, 0, 0x5A4D);
    put_u32(&mut buf, 0x3C, PE_OFFSET as u32);
    put_u32(&mut buf, PE_OFFSET, 0x0000_4550);

    put_u16(&mut buf, COFF_OFFSET, 0x014C); // Machine: I386
    put_u16(&mut buf, COFF_OFFSET + 2, 1);
    put_u16(&mut buf, COFF_OFFSET + 16, opt_header_size);
    put_u16(&mut buf, COFF_OFFSET + 18, 0x0102);

    put_u16(&mut buf, OPT_OFFSET, 0x010B);
    put_u32(&mut buf, OPT_OFFSET + 16, 0x1000); // AddressOfEntryPoint
    put_u32(&mut buf, OPT_OFFSET + 28, 0x0040_0000); // ImageBase
    put_u32(&mut buf, OPT_OFFSET + 32, 0x1000); // SectionAlignment
    put_u32(&mut buf, OPT_OFFSET + 36, 0x200); // FileAlignment
    put_u32(&mut buf, OPT_OFFSET + 56, 0x3000); // SizeOfImage
    put_u32(&mut buf, OPT_OFFSET + 60, 0x200); // SizeOfHeaders
    put_u32(&mut buf, OPT_OFFSET + 92, num_data_dirs);

    let s = section_table_offset;
    buf[s..s + 5].copy_from_slice(b".text");
    put_u32(&mut buf, s + 8, 0x100);
    put_u32(&mut buf, s + 12, TEXT_VA);
    put_u32(&mut buf, s + 16, TEXT_RAW_SIZE);
    put_u32(&mut buf, s + 20, TEXT_RAW_OFFSET);
    put_u32(&mut buf, s + 36, 0x6000_0020);

    buf
}

// Import layout used by `add_imports`, all inside `.text`.
pub(crate) const IMP_ILT_RVA: u32 = 0x1040;
pub(crate) const IMP_IAT_RVA: u32 = 0x1058;
pub(crate) const IMP_HINT_NAME_RVA: u32 = 0x1070;
pub(crate) const IMP_DLL_NAME_RVA: u32 = 0x1080;
pub(crate) const IMP_DIR_RVA: u32 = 0x1100;

/// Adds an import directory with one DLL importing `CreateFileW` by name
/// and ordinal 5.
pub(crate) fn add_imports(buf: &mut [u8]) {
    let file_of = |rva: u32| (rva - TEXT_VA + TEXT_RAW_OFFSET) as usize;

    // Data directory entry 1 (import)
    put_u32(buf, DD_BASE64 + 8, IMP_DIR_RVA);
    put_u32(buf, DD_BASE64 + 12, 0x80);

    // ILT and IAT carry the same three thunks.
    for table in [IMP_ILT_RVA, IMP_IAT_RVA] {
        put_u64(buf, file_of(table), u64::from(IMP_HINT_NAME_RVA));
        put_u64(buf, file_of(table) + 8, 0x8000_0000_0000_0005);
        put_u64(buf, file_of(table) + 16, 0);
    }

    // Hint + name
    put_u16(buf, file_of(IMP_HINT_NAME_RVA), 0x12);
    put_bytes(buf, file_of(IMP_HINT_NAME_RVA) + 2, b"CreateFileW\0");

    put_bytes(buf, file_of(IMP_DLL_NAME_RVA), b"KERNEL32.dll\0");

    // One descriptor plus the all-zero sentinel.
    let d = file_of(IMP_DIR_RVA);
    put_u32(buf, d, IMP_ILT_RVA);
    put_u32(buf, d + 12, IMP_DLL_NAME_RVA);
    put_u32(buf, d + 16, IMP_IAT_RVA);
}

pub(crate) const RICH_KEY: u32 = 0x1234_5678;
pub(crate) const RICH_DANS_OFFSET: u32 = 0x48;
pub(crate) const RICH_MARKER_OFFSET: u32 = 0x60;
pub(crate) const RICH_COMP_ID_WORD: u32 = 0x00E9_7809;
pub(crate) const RICH_COMP_COUNT: u32 = 5;

/// Drops an encrypted Rich header into the DOS stub.
pub(crate) fn add_rich(buf: &mut [u8]) {
    let dans = RICH_DANS_OFFSET as usize;
    put_u32(buf, dans, 0x536E_6144 ^ RICH_KEY); // DanS
    put_u32(buf, dans + 4, RICH_KEY); // padding (0 ^ key)
    put_u32(buf, dans + 8, RICH_KEY);
    put_u32(buf, dans + 12, RICH_KEY);
    put_u32(buf, dans + 16, RICH_COMP_ID_WORD ^ RICH_KEY);
    put_u32(buf, dans + 20, RICH_COMP_COUNT ^ RICH_KEY);
    put_bytes(buf, RICH_MARKER_OFFSET as usize, b"Rich");
    put_u32(buf, RICH_MARKER_OFFSET as usize + 4, RICH_KEY);
}

pub(crate) const RES_DIR_RVA: u32 = 0x1040;

/// Adds a two-level resource tree: a named entry and an ID entry at the
/// root, each leading to a one-entry subdirectory with a data leaf.
pub(crate) fn add_resources(buf: &mut [u8]) {
    let file_of = |rva: u32| (rva - TEXT_VA + TEXT_RAW_OFFSET) as usize;
    let base = RES_DIR_RVA;

    put_u32(buf, DD_BASE64 + 16, RES_DIR_RVA);
    put_u32(buf, DD_BASE64 + 20, 0x100);

    // Root: 1 named + 1 id entry.
    let root = file_of(base);
    put_u16(buf, root + 12, 1);
    put_u16(buf, root + 14, 1);
    put_u32(buf, root + 16, 0x8000_0000 | 0x70); // name at base+0x70
    put_u32(buf, root + 20, 0x8000_0000 | 0x20); // subdir at base+0x20
    put_u32(buf, root + 24, 42); // plain id
    put_u32(buf, root + 28, 0x8000_0000 | 0x40); // subdir at base+0x40

    // Subdir 1: one leaf entry carrying a language pair.
    let sub1 = file_of(base + 0x20);
    put_u16(buf, sub1 + 14, 1);
    put_u32(buf, sub1 + 16, 0x0409);
    put_u32(buf, sub1 + 20, 0x58); // leaf at base+0x58

    // Subdir 2
    let sub2 = file_of(base + 0x40);
    put_u16(buf, sub2 + 14, 1);
    put_u32(buf, sub2 + 16, 7);
    put_u32(buf, sub2 + 20, 0x68); // leaf at base+0x68

    // Leaves
    let leaf1 = file_of(base + 0x58);
    put_u32(buf, leaf1, 0x1010); // data rva
    put_u32(buf, leaf1 + 4, 0x20); // size
    let leaf2 = file_of(base + 0x68);
    put_u32(buf, leaf2, 0x1018);
    put_u32(buf, leaf2 + 4, 8);
    put_u32(buf, leaf2 + 8, 1252); // code page

    // Unicode name "AB" for the root's named entry.
    let name = file_of(base + 0x70);
    put_u16(buf, name, 2);
    put_u16(buf, name + 2, u16::from(b'A'));
    put_u16(buf, name + 4, u16::from(b'B'));
}
