//! One invocation of the tool: what to do, to which section, with which files.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::checksum::{self, ChecksumOrder};
use crate::config;
use crate::dict::ParameterDictionary;
use crate::error::{alloc_buffer, Error, Result};
use crate::merge;
use crate::partition::{self, DeviceTree, Partition, PartitionProvider, SEC_ENV, SEC_ROM, SEC_UBOOT};
use crate::scan::{self, CRC_SIZE, DEFAULT_CHUNK_SIZE};
use crate::writer;

pub const CFG_FILE: &str = "/boot/uboot.conf";
pub const BACKUP_FILE: &str = "/etc/default/uboot";
pub const TMP_FILE: &str = "/tmp/uboot.current";
pub const FLASH: &str = "/dev/mtdblock0";
pub const OF_FLASH_DEVICE: &str = "/sys/firmware/devicetree/base/apb/spi@1F040100/flash@0/";

/// Where things are and how to treat them. The defaults are the paths on the
/// board.
#[derive(Debug, Clone)]
pub struct Settings {
    pub device: PathBuf,
    /// Device tree node whose `part@*` children describe the flash layout.
    pub of_node: PathBuf,
    /// Staging file for a merged block, and default export destination.
    pub tmp_file: PathBuf,
    pub backup_file: PathBuf,
    pub config_file: PathBuf,
    pub checksum_order: ChecksumOrder,
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: FLASH.into(),
            of_node: OF_FLASH_DEVICE.into(),
            tmp_file: TMP_FILE.into(),
            backup_file: BACKUP_FILE.into(),
            config_file: CFG_FILE.into(),
            checksum_order: ChecksumOrder::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Dump the environment as text.
    ReadOnly { output: PathBuf },
    /// Copy a file verbatim into the section.
    WriteOnly { input: PathBuf },
    /// Merge a configuration into the existing environment and write it
    /// back.
    ReadThenWrite { config: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub operation: Operation,
    pub section: String,
    pub settings: Settings,
}

enum Plan<'a> {
    Export(&'a Path),
    Write(&'a Path),
    Merge(ParameterDictionary),
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Exported {
        output: PathBuf,
        entries: usize,
        checksum_ok: bool,
    },
    Written {
        partition: Partition,
        len: u64,
    },
    Merged {
        partition: Partition,
        crc: u32,
    },
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::Exported {
                output,
                entries,
                checksum_ok,
            } => {
                write!(f, "exported {} entries to {}", entries, output.display())?;
                if !checksum_ok {
                    f.write_str(" (checksum mismatch!)")?;
                }
                Ok(())
            }
            Summary::Written { partition, len } => write!(
                f,
                "wrote {} bytes to {} at 0x{:x}",
                len, partition.name, partition.offset
            ),
            Summary::Merged { partition, crc } => write!(
                f,
                "updated {} at 0x{:x}, crc = 0x{:08x}",
                partition.name, partition.offset, crc
            ),
        }
    }
}

impl Task {
    /// The default: merge the configuration into the environment.
    pub fn update(settings: Settings) -> Self {
        Self {
            operation: Operation::ReadThenWrite {
                config: settings.config_file.clone(),
            },
            section: SEC_ENV.into(),
            settings,
        }
    }

    pub fn export(settings: Settings, output: Option<PathBuf>) -> Self {
        Self {
            operation: Operation::ReadOnly {
                output: output.unwrap_or_else(|| settings.tmp_file.clone()),
            },
            section: SEC_ENV.into(),
            settings,
        }
    }

    /// Put the backup environment image back.
    pub fn restore(settings: Settings) -> Self {
        Self {
            operation: Operation::WriteOnly {
                input: settings.backup_file.clone(),
            },
            section: SEC_ENV.into(),
            settings,
        }
    }

    pub fn write_bootloader(settings: Settings, input: PathBuf) -> Self {
        Self {
            operation: Operation::WriteOnly { input },
            section: SEC_UBOOT.into(),
            settings,
        }
    }

    pub fn write_rom(settings: Settings, input: PathBuf) -> Self {
        Self {
            operation: Operation::WriteOnly { input },
            section: SEC_ROM.into(),
            settings,
        }
    }

    /// Runs against the device tree named in the settings.
    pub fn run(&self) -> Result<Summary> {
        self.run_with(&DeviceTree::new(&self.settings.of_node))
    }

    pub fn run_with<P>(&self, provider: &P) -> Result<Summary>
    where
        P: PartitionProvider + ?Sized,
    {
        log::debug!("current task: {:?} on {}", self.operation, self.section);

        // The configuration is parsed before the device is even opened, so a
        // typo can't cost us anything.
        let plan = match &self.operation {
            Operation::ReadOnly { output } => Plan::Export(output),
            Operation::WriteOnly { input } => Plan::Write(input),
            Operation::ReadThenWrite { config } => Plan::Merge(config::load(config)?),
        };

        let writes = !matches!(self.operation, Operation::ReadOnly { .. });
        let dev_path = &self.settings.device;
        let mut device = OpenOptions::new()
            .read(true)
            .write(writes)
            .open(dev_path)
            .map_err(Error::io("opening", dev_path))?;

        let partition = partition::locate(provider, &self.section, &mut device, dev_path)?;
        log::debug!(
            "{}: offset 0x{:x}, size 0x{:x}",
            partition.name,
            partition.offset,
            partition.size
        );

        let summary = match plan {
            Plan::Export(output) => self.export_env(&mut device, &partition, output)?,
            Plan::Write(input) => self.write_file(&mut device, &partition, input)?,
            Plan::Merge(mut dict) => {
                let crc = self.merge_env(&mut device, &partition, &mut dict)?;
                Summary::Merged { partition, crc }
            }
        };

        if writes {
            device.sync_all().map_err(Error::io("syncing", dev_path))?;
        }
        Ok(summary)
    }

    /// Positions `device` at the payload of `partition` and returns how many
    /// payload bytes there are.
    fn seek_payload(&self, device: &mut File, partition: &Partition) -> Result<u64> {
        let size = u64::from(partition.size);
        if size < CRC_SIZE as u64 {
            return Err(Error::InvalidPartition {
                name: partition.name.clone(),
                reason: format!("{} bytes can't hold an environment", size),
            });
        }
        device
            .seek(SeekFrom::Start(u64::from(partition.offset) + CRC_SIZE as u64))
            .map_err(Error::io("seeking", &self.settings.device))?;
        Ok(size - CRC_SIZE as u64)
    }

    fn export_env(
        &self,
        device: &mut File,
        partition: &Partition,
        output: &Path,
    ) -> Result<Summary> {
        let file = File::create(output).map_err(Error::io("creating", output))?;
        let mut out = BufWriter::new(file);

        let payload = self.seek_payload(device, partition)?;
        let entries = scan::export(
            &mut (&mut *device).take(payload),
            &self.settings.device,
            &mut out,
            output,
            self.settings.chunk_size,
        )?;
        out.flush().map_err(Error::io("writing", output))?;

        let verdict = checksum::verify_partition(
            device,
            &self.settings.device,
            partition,
            self.settings.checksum_order,
            self.settings.chunk_size,
        )?;
        if !verdict.is_valid() {
            log::warn!(
                "{}: stored checksum 0x{:08x} does not match contents (0x{:08x}, {} byte order)",
                partition.name,
                verdict.stored,
                verdict.computed,
                self.settings.checksum_order
            );
        }

        Ok(Summary::Exported {
            output: output.to_path_buf(),
            entries,
            checksum_ok: verdict.is_valid(),
        })
    }

    fn write_file(
        &self,
        device: &mut File,
        partition: &Partition,
        input: &Path,
    ) -> Result<Summary> {
        let mut file = File::open(input).map_err(Error::io("opening", input))?;
        let len = file
            .metadata()
            .map_err(Error::io("reading", input))?
            .len();
        writer::check_fits(partition, len, input)?;

        let mut data = alloc_buffer(len as usize)?;
        file.read_exact(&mut data)
            .map_err(Error::io("reading", input))?;

        writer::write_partition(device, &self.settings.device, partition, &data, input)?;
        Ok(Summary::Written {
            partition: partition.clone(),
            len,
        })
    }

    fn merge_env(
        &self,
        device: &mut File,
        partition: &Partition,
        dict: &mut ParameterDictionary,
    ) -> Result<u32> {
        let size = partition.size as usize;
        let payload = self.seek_payload(device, partition)?;
        let mut block = merge::merge_block(
            &mut (&mut *device).take(payload),
            &self.settings.device,
            dict,
            size,
            self.settings.chunk_size,
        )?;

        let tmp = &self.settings.tmp_file;
        writer::check_fits(partition, block.len() as u64, tmp)?;
        let crc = checksum::finalize(&mut block, size, self.settings.checksum_order, tmp)?;
        fs::write(tmp, &block).map_err(Error::io("writing", tmp))?;

        writer::write_partition(device, &self.settings.device, partition, &block, tmp)?;
        Ok(crc)
    }
}
