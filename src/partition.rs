//! Finding sections of the flash device.
//!
//! On the target the flash node in the device tree has one `part@<offset>`
//! child per section, and the kernel exposes those under
//! `/sys/firmware/devicetree`:
//!
//! ```text
//! flash@0/
//!     part@0/       label = "BOOTLOADER\0"   reg = <0x0 0x80000>
//!     part@80000/   label = "ENVSET\0"       reg = <0x80000 0x10000>
//!     ...
//! ```
//!
//! `reg` is raw device tree data: two big-endian cells, offset then size.

use std::fs;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The bootloader image itself.
pub const SEC_UBOOT: &str = "BOOTLOADER";
/// The environment block.
pub const SEC_ENV: &str = "ENVSET";
/// Not a real partition: the whole flash device.
pub const SEC_ROM: &str = "ROM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

impl Partition {
    pub fn new(name: impl Into<String>, offset: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
        }
    }

    fn checked(self) -> Result<Self> {
        if self.size == 0 {
            return Err(Error::InvalidPartition {
                name: self.name,
                reason: "partition size can't be zero".into(),
            });
        }
        Ok(self)
    }
}

/// Something that knows where named sections live.
pub trait PartitionProvider {
    fn resolve(&self, name: &str) -> Result<Partition>;
}

/// Partition descriptors read from a device tree node on the filesystem.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    node: PathBuf,
}

impl DeviceTree {
    /// Only children named like this describe partitions.
    pub const PREFIX: &'static str = "part@";

    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }

    /// Partition descriptor directories, sorted by name.
    fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut names = vec![];
        let dir = fs::read_dir(&self.node).map_err(Error::io("scanning", &self.node))?;
        for entry in dir {
            let entry = entry.map_err(Error::io("scanning", &self.node))?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(Self::PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names.into_iter().map(|n| self.node.join(n)).collect())
    }
}

impl PartitionProvider for DeviceTree {
    fn resolve(&self, name: &str) -> Result<Partition> {
        for dir in self.candidates()? {
            let label_path = dir.join("label");
            let label = fs::read(&label_path).map_err(Error::io("opening", &label_path))?;
            log::trace!("{}: label {:?}", dir.display(), String::from_utf8_lossy(&label));
            if property_string(&label) != name.as_bytes() {
                continue;
            }

            let reg_path = dir.join("reg");
            let reg = fs::read(&reg_path).map_err(Error::io("opening", &reg_path))?;
            let (offset, size) = parse_reg(&reg).ok_or_else(|| Error::InvalidPartition {
                name: name.to_string(),
                reason: format!("{}: need 8 bytes, found {}", reg_path.display(), reg.len()),
            })?;

            return Partition::new(name, offset, size).checked();
        }

        Err(Error::PartitionNotFound(name.to_string()))
    }
}

/// A fixed partition table, for boards without a device tree and for tests.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable(pub Vec<Partition>);

impl PartitionProvider for PartitionTable {
    fn resolve(&self, name: &str) -> Result<Partition> {
        self.0
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::PartitionNotFound(name.to_string()))?
            .checked()
    }
}

/// Device tree strings are NUL-terminated; anything from the first NUL on is
/// not part of the value.
fn property_string(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == 0) {
        Some(end) => &raw[..end],
        None => raw,
    }
}

/// Decodes a `reg` property: big-endian offset, then big-endian size. Any
/// cells past the first two are ignored.
pub fn parse_reg(raw: &[u8]) -> Option<(u32, u32)> {
    let offset: [u8; 4] = raw.get(0..4)?.try_into().ok()?;
    let size: [u8; 4] = raw.get(4..8)?.try_into().ok()?;
    Some((u32::from_be_bytes(offset), u32::from_be_bytes(size)))
}

/// Resolves `name` to a region of `device`. `SEC_ROM` is the whole device and
/// never needs the provider; everything else is up to `provider`.
pub fn locate<P, D>(
    provider: &P,
    name: &str,
    device: &mut D,
    device_path: &Path,
) -> Result<Partition>
where
    P: PartitionProvider + ?Sized,
    D: Seek + ?Sized,
{
    if name == SEC_ROM {
        let len = device
            .seek(SeekFrom::End(0))
            .map_err(Error::io("seeking", device_path))?;
        let size = u32::try_from(len).map_err(|_| Error::InvalidPartition {
            name: name.to_string(),
            reason: format!("device is {} bytes, more than 4 GiB can't be addressed", len),
        })?;
        return Ok(Partition::new(name, 0, size));
    }

    provider.resolve(name)
}
