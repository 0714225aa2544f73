//! Ordinal-to-name tables for the DLLs that are customarily imported by
//! ordinal, so ImpHash can use the canonical exported names.

mod oleaut32;
mod ws2_32;

/// Resolves `(library, ordinal)` to the canonical export name. Unknown
/// pairs come back as `ord<N>` when `make_name` is set, empty otherwise.
pub fn ord_lookup(lib_name: &str, ordinal: u64, make_name: bool) -> String {
    let resolved = match lib_name.to_lowercase().as_str() {
        "ws2_32.dll" | "wsock32.dll" => ws2_32::ord_name(ordinal),
        "oleaut32.dll" => oleaut32::ord_name(ordinal),
        _ => None,
    };
    match resolved {
        Some(name) => name.to_string(),
        None if make_name => format!("ord{ordinal}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_winsock_ordinals() {
        assert_eq!(ord_lookup("ws2_32.dll", 1, true), "accept");
        assert_eq!(ord_lookup("WS2_32.DLL", 23, true), "socket");
        assert_eq!(ord_lookup("wsock32.dll", 115, true), "WSAStartup");
        assert_eq!(ord_lookup("ws2_32.dll", 151, true), "__WSAFDIsSet");
    }

    #[test]
    fn resolves_oleaut32_ordinals() {
        assert_eq!(ord_lookup("oleaut32.dll", 2, true), "SysAllocString");
        assert_eq!(ord_lookup("OleAut32.dll", 9, true), "VariantClear");
        assert_eq!(ord_lookup("oleaut32.dll", 415, true), "OleIconToCursor");
    }

    #[test]
    fn unknown_ordinals_fall_back() {
        assert_eq!(ord_lookup("ws2_32.dll", 9999, true), "ord9999");
        assert_eq!(ord_lookup("ws2_32.dll", 9999, false), "");
        assert_eq!(ord_lookup("kernel32.dll", 1, true), "ord1");
        assert_eq!(ord_lookup("kernel32.dll", 1, false), "");
    }
}
