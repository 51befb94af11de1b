use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::partition::Partition;

/// Copies `data` into `partition` on `device`.
///
/// Data that doesn't fit is refused before the device is touched. `source`
/// is only there to say which file was too big.
pub fn write_partition<D>(
    device: &mut D,
    device_path: &Path,
    partition: &Partition,
    data: &[u8],
    source: &Path,
) -> Result<()>
where
    D: Write + Seek + ?Sized,
{
    check_fits(partition, data.len() as u64, source)?;

    log::debug!(
        "writing {} bytes from {} at 0x{:x} (partition {} is 0x{:x} bytes)",
        data.len(),
        source.display(),
        partition.offset,
        partition.name,
        partition.size
    );

    device
        .seek(SeekFrom::Start(partition.offset.into()))
        .map_err(Error::io("seeking", device_path))?;
    device
        .write_all(data)
        .map_err(Error::io("writing", device_path))?;
    device.flush().map_err(Error::io("writing", device_path))
}

pub fn check_fits(partition: &Partition, len: u64, source: &Path) -> Result<()> {
    if len > u64::from(partition.size) {
        return Err(Error::OversizeInput {
            path: source.to_path_buf(),
            len,
            size: partition.size,
            offset: partition.offset,
        });
    }
    Ok(())
}
