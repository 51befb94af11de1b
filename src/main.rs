use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use env_logger::Env;
use log::LevelFilter;
use uboot_envset::{ChecksumOrder, Settings, Task};

/// Read/write partition in u-boot ROM.
///
/// With no mode option, the configuration file is merged into the ENVSET
/// partition.
#[derive(Parser)]
#[clap(name = "update-uboot", version)]
#[clap(group(ArgGroup::new("mode").args(&["get", "restore", "uboot", "rom"])))]
struct UpdateUboot {
    /// Specify config file manually
    #[clap(
        short,
        long,
        value_name = "FILE",
        conflicts_with_all = &["get", "restore", "uboot", "rom"]
    )]
    config: Option<PathBuf>,

    /// Get current config, saved in the temporary file unless FILE is given
    #[clap(short, long, value_name = "FILE")]
    get: Option<Option<PathBuf>>,

    /// Write the backup image back into ENVSET
    #[clap(short, long)]
    restore: bool,

    /// Update uboot
    #[clap(short, long, value_name = "FILE")]
    uboot: Option<PathBuf>,

    /// Write whole rom
    #[clap(short = 'm', long, value_name = "FILE")]
    rom: Option<PathBuf>,

    /// Flash block device
    #[clap(long, value_name = "DEV", env = "UPDATE_UBOOT_DEVICE")]
    device: Option<PathBuf>,

    /// Device tree node listing the flash partitions
    #[clap(long, value_name = "DIR", env = "UPDATE_UBOOT_OF_NODE")]
    of_node: Option<PathBuf>,

    /// Staging file for the merged environment
    #[clap(long, value_name = "FILE", env = "UPDATE_UBOOT_TMP")]
    tmp: Option<PathBuf>,

    /// Backup environment image used by --restore
    #[clap(long, value_name = "FILE", env = "UPDATE_UBOOT_BACKUP")]
    backup: Option<PathBuf>,

    /// Byte order of the stored checksum: native, little or big
    #[clap(long, value_name = "ORDER", env = "UPDATE_UBOOT_ENDIAN")]
    endian: Option<ChecksumOrder>,

    /// Bytes read from flash at a time
    #[clap(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Log what is going on
    #[clap(short, long)]
    verbose: bool,
}

impl UpdateUboot {
    fn settings(&self) -> Settings {
        let mut s = Settings::default();
        if let Some(p) = &self.device {
            s.device = p.clone();
        }
        if let Some(p) = &self.of_node {
            s.of_node = p.clone();
        }
        if let Some(p) = &self.tmp {
            s.tmp_file = p.clone();
        }
        if let Some(p) = &self.backup {
            s.backup_file = p.clone();
        }
        if let Some(p) = &self.config {
            s.config_file = p.clone();
        }
        if let Some(order) = self.endian {
            s.checksum_order = order;
        }
        if let Some(n) = self.chunk_size {
            s.chunk_size = n;
        }
        s
    }

    fn into_task(self) -> Task {
        let settings = self.settings();
        if let Some(output) = self.get {
            Task::export(settings, output)
        } else if self.restore {
            Task::restore(settings)
        } else if let Some(input) = self.uboot {
            Task::write_bootloader(settings, input)
        } else if let Some(input) = self.rom {
            Task::write_rom(settings, input)
        } else {
            Task::update(settings)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()))
        .format_timestamp(None)
        .try_init();
}

fn main() {
    let args = UpdateUboot::parse();
    init_logging(args.verbose);

    match args.into_task().run() {
        Ok(summary) => println!("{}", summary),
        Err(e) => {
            eprintln!("update-uboot: {}", e);
            std::process::exit(1);
        }
    }
}
