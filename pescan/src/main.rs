use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use pe_file::{hex_string, PeFile};
use pe_fingerprint::{
    authentihash_with, imp_hash, overlay, overlay_start_offset, rich_header_checksum,
    rich_header_hash, HashAlgorithm,
};

/// Print the canonical fingerprints of a PE file.
#[derive(Parser)]
#[command(author, version, about)]
struct Opt {
    /// Path to the PE file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Digest used for the Authenticode hash
    #[arg(short, long, value_enum, default_value_t = Algo::Sha256)]
    algo: Algo,

    /// Print per-section details
    #[arg(short, long)]
    sections: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Algo {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl From<Algo> for HashAlgorithm {
    fn from(algo: Algo) -> Self {
        match algo {
            Algo::Md5 => HashAlgorithm::Md5,
            Algo::Sha1 => HashAlgorithm::Sha1,
            Algo::Sha256 => HashAlgorithm::Sha256,
            Algo::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

fn main() {
    let opt = Opt::parse();

    let file = match PeFile::open(&opt.file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error parsing {:?}: {e}", opt.file);
            std::process::exit(1);
        }
    };

    println!("machine:          {:#06x}", file.nt_header.file_header.machine);
    println!("compiled:         {:#010x}", file.nt_header.file_header.time_date_stamp);
    if let Some(oh) = &file.nt_header.optional_header {
        println!("entry point:      {:#010x}", oh.address_of_entry_point());
        println!("image base:       {:#x}", oh.image_base());
    }

    if opt.sections {
        for section in &file.sections {
            println!(
                "section {:<8} va {:#010x} vsize {:#010x} raw {:#010x} [{:<3}] md5 {} entropy {:.3}",
                section.name,
                section.virtual_address,
                section.virtual_size,
                section.size,
                section.flags(),
                section.md5(&file),
                section.entropy(&file),
            );
        }
    }

    match imp_hash(&file) {
        Ok(digest) => println!("imphash:          {digest}"),
        Err(e) => println!("imphash:          unavailable ({e})"),
    }

    let rich = rich_header_hash(&file);
    if rich.is_empty() {
        println!("rich hash:        none");
    } else {
        println!("rich hash:        {rich}");
        println!("rich checksum:    {:#010x}", rich_header_checksum(&file));
    }

    match authentihash_with(&file, opt.algo.into()) {
        Some(digest) => println!("authentihash:     {}", hex_string(&digest)),
        None => println!("authentihash:     unavailable"),
    }

    match overlay(&file) {
        Some(data) => println!(
            "overlay:          {} bytes at {:#x}",
            data.len(),
            overlay_start_offset(&file)
        ),
        None => println!("overlay:          none"),
    }
}
