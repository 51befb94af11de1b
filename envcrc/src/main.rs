use clap::Parser;
use std::path::PathBuf;
use uboot_envset::checksum::{self, ChecksumOrder};
use uboot_envset::scan::{Scanner, Token, CRC_SIZE};

/// Checks, and optionally reseals, a raw U-Boot environment image.
#[derive(Parser)]
struct Envcrc {
    input: PathBuf,
    /// Write a freshly sealed copy of the image here.
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Size to pad the sealed copy to. Defaults to the input's size.
    #[clap(short, long)]
    size: Option<usize>,
    /// Byte order of the checksum field: native, little or big.
    #[clap(short, long, default_value = "native")]
    endian: ChecksumOrder,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Envcrc::parse();

    let image = std::fs::read(&args.input)?;

    let verdict = checksum::verify(&image, args.endian)
        .ok_or("image is too short to hold a checksum")?;

    // Find where the payload really ends; everything after the end marker is
    // padding as far as we're concerned.
    let mut entries = 0;
    let mut scanner = Scanner::new();
    let used = scanner.feed(&image[CRC_SIZE..], |t| {
        if let Token::Entry(_) = t {
            entries += 1;
        }
        Ok(())
    })?;
    if !scanner.is_finished() {
        return Err("image has no end-of-list marker".into());
    }

    println!(
        "{} entries in {} bytes of payload, stored crc = 0x{:08x}, computed = 0x{:08x}",
        entries, used, verdict.stored, verdict.computed
    );

    let output = match args.output {
        Some(output) => output,
        None if verdict.is_valid() => {
            println!("checksum ok");
            return Ok(());
        }
        None => {
            eprintln!("checksum mismatch");
            std::process::exit(1);
        }
    };

    let mut data = image[..CRC_SIZE + used].to_vec();
    let size = args.size.unwrap_or(image.len());
    let crc = checksum::finalize(&mut data, size, args.endian, &output)?;

    std::fs::write(output, data)?;

    println!("success, crc = 0x{:08x}", crc);

    Ok(())
}
