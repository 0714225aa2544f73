//! Canonical fingerprints over a parsed [`pe_file::PeFile`]: the
//! Authenticode hash, the import hash and the Rich header hash, plus the
//! overlay boundary they all relate to.
//!
//! Every computation needs a fully constructed `PeFile` and none of them
//! mutate it. Precondition failures (no optional header, sizes that do
//! not add up) yield empty results rather than errors, so a partially
//! parsed file still answers deterministically.

pub mod authentihash;
pub mod imphash;
pub mod ordlookup;
pub mod overlay;
pub mod richhash;

#[cfg(test)]
pub(crate) mod testpe;

use thiserror::Error;

pub use authentihash::{authentihash, authentihash_with, HashAlgorithm};
pub use imphash::imp_hash;
pub use overlay::{overlay, overlay_start_offset};
pub use richhash::{rich_header_checksum, rich_header_hash};

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("no imports found")]
    NoImports,
}
