//! Authenticode hash: the whole file streamed through a digest, minus
//! the three ranges the signature cannot cover — the `CheckSum` field,
//! the Certificate Table directory entry and the certificate body.

use log::debug;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use pe_file::{PeFile, FILE_HEADER_SIZE, IMAGE_DIRECTORY_ENTRY_SECURITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

/// Authenticode hash with the default SHA-256 binding.
pub fn authentihash(file: &PeFile) -> Option<Vec<u8>> {
    authentihash_with(file, HashAlgorithm::Sha256)
}

/// Authenticode hash with a caller-picked digest. `None` when the file
/// has no optional header or its header sizes rule the hash out.
pub fn authentihash_with(file: &PeFile, algorithm: HashAlgorithm) -> Option<Vec<u8>> {
    let mut exclusions = exclusion_ranges(file)?;
    exclusions.sort_by_key(|r| r.start);

    let mut gaps = Vec::with_capacity(exclusions.len() + 1);
    let mut cursor = 0u32;
    for range in &exclusions {
        gaps.push((cursor, range.start));
        cursor = range.start + range.length;
    }
    gaps.push((cursor, file.size()));
    debug!("authentihash covers {} ranges", gaps.len());

    Some(match algorithm {
        HashAlgorithm::Md5 => digest_gaps::<Md5>(file, &gaps),
        HashAlgorithm::Sha1 => digest_gaps::<Sha1>(file, &gaps),
        HashAlgorithm::Sha256 => digest_gaps::<Sha256>(file, &gaps),
        HashAlgorithm::Sha512 => digest_gaps::<Sha512>(file, &gaps),
    })
}

/// A skipped `[start, start + length)` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RelRange {
    start: u32,
    length: u32,
}

/// The exclusion set, in the partial forms the format allows: the
/// checksum is always excluded once the preconditions hold, the
/// directory entry only when the header actually contains it, and the
/// certificate body only when it lies wholly between the headers and the
/// end of the file.
fn exclusion_ranges(file: &PeFile) -> Option<Vec<RelRange>> {
    let optional_header = file.nt_header.optional_header.as_ref()?;

    let oh_offset = u64::from(file.dos_header.address_of_new_exe_header) + 4
        + u64::from(FILE_HEADER_SIZE);
    let size = u64::from(file.size());
    let size_of_headers = u64::from(optional_header.size_of_headers());

    if oh_offset > size || size_of_headers > size - oh_offset {
        debug!("headers exceed the file length, authentihash unavailable");
        return None;
    }
    if size_of_headers < 68 {
        debug!("headers too small for authenticode");
        return None;
    }

    let checksum_field = oh_offset + u64::from(optional_header.checksum_offset());
    let mut ranges = vec![RelRange { start: checksum_field as u32, length: 4 }];

    let headers_end = oh_offset + size_of_headers;
    let rva_count_field = oh_offset + u64::from(optional_header.rva_count_offset());
    if headers_end < rva_count_field + 4 {
        return Some(ranges);
    }
    if optional_header.number_of_rva_and_sizes() < 5 {
        return Some(ranges);
    }

    let cert_entry = oh_offset + u64::from(optional_header.security_dir_offset());
    if headers_end < cert_entry + 8 {
        return Some(ranges);
    }
    ranges.push(RelRange { start: cert_entry as u32, length: 8 });

    let directory = optional_header.data_directory()[IMAGE_DIRECTORY_ENTRY_SECURITY];
    if directory.size == 0 {
        return Some(ranges);
    }
    // The certificate table address is a plain file offset.
    let address = u64::from(directory.virtual_address);
    let length = u64::from(directory.size);
    if address < headers_end || address + length > size {
        return Some(ranges);
    }
    ranges.push(RelRange { start: directory.virtual_address, length: directory.size });
    Some(ranges)
}

fn digest_gaps<D: Digest>(file: &PeFile, gaps: &[(u32, u32)]) -> Vec<u8> {
    let data = file.data();
    let mut hasher = D::new();
    for &(start, end) in gaps {
        hasher.update(&data[start as usize..end as usize]);
    }
    hasher.finalize().to_vec()
}
