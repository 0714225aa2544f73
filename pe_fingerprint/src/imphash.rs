//! Import hash: MD5 over the canonical, comma-joined list of
//! `library.function` pairs.

use md5::{Digest, Md5};

use pe_file::{hex_string, PeFile};

use crate::ordlookup::ord_lookup;
use crate::FingerprintError;

/// Extensions stripped from the library name before joining.
const EXTENSIONS: [&str; 3] = ["ocx", "sys", "dll"];

/// Computes the ImpHash. Libraries lose a trailing `.ocx`/`.sys`/`.dll`,
/// everything is lowercased, by-ordinal imports resolve through the
/// built-in ordinal tables, and empty names drop out.
pub fn imp_hash(file: &PeFile) -> Result<String, FingerprintError> {
    if file.imports.is_empty() {
        return Err(FingerprintError::NoImports);
    }

    let mut normalized = Vec::new();
    for import in &file.imports {
        let parts: Vec<&str> = import.name.split('.').collect();
        let lib_name = if parts.len() == 2
            && EXTENSIONS.contains(&parts[1].to_lowercase().as_str())
        {
            parts[0]
        } else {
            import.name.as_str()
        };
        let lib_name = lib_name.to_lowercase();

        for function in &import.functions {
            let func_name = if function.by_ordinal {
                ord_lookup(&import.name, u64::from(function.ordinal), true)
            } else {
                function.name.clone()
            };
            if func_name.is_empty() {
                continue;
            }
            normalized.push(format!("{}.{}", lib_name, func_name.to_lowercase()));
        }
    }

    let mut hasher = Md5::new();
    hasher.update(normalized.join(",").as_bytes());
    Ok(hex_string(&hasher.finalize()))
}
