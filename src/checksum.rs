//! Sealing and checking environment blocks.
//!
//! The checksum is a plain zlib CRC-32 over everything after the checksum
//! field, padding included. U-Boot stores it in the CPU's byte order, which
//! is not necessarily ours when preparing images on a build host, so the
//! order is a parameter.

use std::fmt;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use crc_any::CRCu32;

use crate::error::{alloc_buffer, Error, Result};
use crate::partition::Partition;
use crate::scan::CRC_SIZE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ChecksumOrder {
    pub fn encode(self, crc: u32) -> [u8; CRC_SIZE] {
        match self {
            ChecksumOrder::Native => crc.to_ne_bytes(),
            ChecksumOrder::Little => crc.to_le_bytes(),
            ChecksumOrder::Big => crc.to_be_bytes(),
        }
    }

    pub fn decode(self, raw: [u8; CRC_SIZE]) -> u32 {
        match self {
            ChecksumOrder::Native => u32::from_ne_bytes(raw),
            ChecksumOrder::Little => u32::from_le_bytes(raw),
            ChecksumOrder::Big => u32::from_be_bytes(raw),
        }
    }
}

impl FromStr for ChecksumOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "native" => Ok(ChecksumOrder::Native),
            "little" | "le" => Ok(ChecksumOrder::Little),
            "big" | "be" => Ok(ChecksumOrder::Big),
            _ => Err(format!("unknown byte order {:?}, expected native, little or big", s)),
        }
    }
}

impl fmt::Display for ChecksumOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChecksumOrder::Native => "native",
            ChecksumOrder::Little => "little",
            ChecksumOrder::Big => "big",
        })
    }
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut c = CRCu32::crc32();
    c.digest(data);
    c.get_crc()
}

/// Pads `block` with zeroes out to `size` bytes and stores the checksum of
/// everything past the checksum field in its first four bytes.
///
/// `block` must already hold a terminated payload after a checksum field;
/// whatever is in that field is overwritten. Blocks that are already longer
/// than `size` are refused and left alone. Returns the new checksum.
pub fn finalize(
    block: &mut Vec<u8>,
    size: usize,
    order: ChecksumOrder,
    path: &Path,
) -> Result<u32> {
    if block.len() > size || size < CRC_SIZE {
        return Err(Error::OversizeInput {
            path: path.to_path_buf(),
            len: block.len() as u64,
            size: u32::try_from(size).unwrap_or(u32::MAX),
            offset: 0,
        });
    }

    block
        .try_reserve_exact(size - block.len())
        .map_err(|_| Error::AllocationFailure(size))?;
    block.resize(size, 0);

    let crc = crc32(&block[CRC_SIZE..]);
    block[..CRC_SIZE].copy_from_slice(&order.encode(crc));
    Ok(crc)
}

/// The checksum a block claims to have, and the one it actually has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub stored: u32,
    pub computed: u32,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.stored == self.computed
    }
}

/// Checks a complete in-memory block. `None` if it is too short to even have
/// a checksum field.
pub fn verify(block: &[u8], order: ChecksumOrder) -> Option<Verdict> {
    let field: [u8; CRC_SIZE] = block.get(..CRC_SIZE)?.try_into().ok()?;
    Some(Verdict {
        stored: order.decode(field),
        computed: crc32(&block[CRC_SIZE..]),
    })
}

/// Same as `verify`, but reads the block straight off the device in chunks
/// instead of loading the whole partition.
pub fn verify_partition<D>(
    device: &mut D,
    device_path: &Path,
    partition: &Partition,
    order: ChecksumOrder,
    chunk_size: usize,
) -> Result<Verdict>
where
    D: Read + Seek + ?Sized,
{
    let size = partition.size as usize;
    if size < CRC_SIZE {
        return Err(Error::InvalidPartition {
            name: partition.name.clone(),
            reason: format!("{} bytes is too small to hold a checksum", size),
        });
    }

    device
        .seek(SeekFrom::Start(partition.offset.into()))
        .map_err(Error::io("seeking", device_path))?;

    let mut field = [0; CRC_SIZE];
    device
        .read_exact(&mut field)
        .map_err(Error::io("reading", device_path))?;

    let mut c = CRCu32::crc32();
    let mut buf = alloc_buffer(chunk_size.max(1))?;
    let mut left = size - CRC_SIZE;
    while left > 0 {
        let want = left.min(buf.len());
        match device.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(Error::Io {
                    op: "reading",
                    path: device_path.to_path_buf(),
                    source: ErrorKind::UnexpectedEof.into(),
                })
            }
            Ok(n) => {
                c.digest(&buf[..n]);
                left -= n;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::io("reading", device_path)(e)),
        }
    }

    Ok(Verdict {
        stored: order.decode(field),
        computed: c.get_crc(),
    })
}
