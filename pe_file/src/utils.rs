/// ASCII bytes up to the first NUL, lossily decoded.
pub(crate) fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

const FUNCTION_NAME_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_?@$()<>";

const DOS_FILENAME_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#$%&'()-@^_`{}~+,.;=[]\\/";

/// Whether every byte of an imported function name is plausible.
pub(crate) fn is_valid_function_name(name: &str) -> bool {
    name.bytes().all(|c| FUNCTION_NAME_CHARSET.contains(&c))
}

/// Whether every byte of a DLL name fits the DOS filename charset.
pub(crate) fn is_valid_dos_filename(name: &str) -> bool {
    name.bytes().all(|c| DOS_FILENAME_CHARSET.contains(&c))
}

/// Lowercase hex rendering of a digest or any other byte string.
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Shannon entropy of a byte stream, in bits per byte.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut frequencies = [0u64; 256];
    for &b in data {
        frequencies[b as usize] += 1;
    }
    let size = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &frequencies {
        if count > 0 {
            let freq = count as f64 / size;
            entropy += freq * freq.log2();
        }
    }
    -entropy
}
