use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uboot_envset::bootmenu::BUILTIN_ENTRIES;
use uboot_envset::checksum::{self, ChecksumOrder};
use uboot_envset::partition::{SEC_ENV, SEC_UBOOT};
use uboot_envset::{Error, Partition, PartitionTable, Settings, Summary, Task};

const ENV_OFFSET: usize = 0x1000;
const ENV_SIZE: usize = 0x800;
const DEVICE_SIZE: usize = 0x2000;

/// A flash image plus the device tree node describing it, all in a temporary
/// directory.
struct Board {
    dir: TempDir,
    settings: Settings,
}

impl Board {
    fn new(env_payload: &[u8]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();

        let node = root.join("flash@0");
        fs::create_dir(&node).unwrap();
        for (sub, label, offset, size) in [
            ("part@0", "BOOTLOADER", 0, ENV_OFFSET),
            ("part@1000", "ENVSET", ENV_OFFSET, ENV_SIZE),
        ] {
            let part = node.join(sub);
            fs::create_dir(&part).unwrap();
            fs::write(part.join("label"), format!("{}\0", label)).unwrap();
            let mut reg = (offset as u32).to_be_bytes().to_vec();
            reg.extend_from_slice(&(size as u32).to_be_bytes());
            fs::write(part.join("reg"), reg).unwrap();
        }

        let mut image = vec![0xffu8; DEVICE_SIZE];
        let mut block = vec![0; 4];
        block.extend_from_slice(env_payload);
        checksum::finalize(&mut block, ENV_SIZE, ChecksumOrder::Native, Path::new("env")).unwrap();
        image[ENV_OFFSET..ENV_OFFSET + ENV_SIZE].copy_from_slice(&block);
        fs::write(root.join("mtdblock0"), image).unwrap();

        let settings = Settings {
            device: root.join("mtdblock0"),
            of_node: node,
            tmp_file: root.join("uboot.current"),
            backup_file: root.join("uboot.backup"),
            config_file: root.join("uboot.conf"),
            ..Settings::default()
        };
        Board { dir, settings }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn device(&self) -> Vec<u8> {
        fs::read(&self.settings.device).unwrap()
    }

    fn env_block(&self) -> Vec<u8> {
        self.device()[ENV_OFFSET..ENV_OFFSET + ENV_SIZE].to_vec()
    }

    fn configure(&self, text: &str) {
        fs::write(&self.settings.config_file, text).unwrap();
    }
}

fn payload_of(block: &[u8]) -> &[u8] {
    let end = block[4..]
        .windows(2)
        .position(|w| w == [0, 0])
        .expect("end marker");
    &block[4..4 + end + 2]
}

#[test]
fn update_merges_and_reseals() {
    let board = Board::new(b"bootdelay=1\0unused_key=foo\0\0");
    board.configure("[env]\nbootdelay = 3\nsilent = \"yes\"\n");

    let summary = Task::update(board.settings.clone()).run().unwrap();

    let block = board.env_block();
    let verdict = checksum::verify(&block, ChecksumOrder::Native).unwrap();
    assert!(verdict.is_valid());
    assert_eq!(
        summary,
        Summary::Merged {
            partition: Partition::new(SEC_ENV, ENV_OFFSET as u32, ENV_SIZE as u32),
            crc: verdict.computed,
        }
    );

    let want = format!(
        "bootdelay=3\0unused_key=foo\0silent=yes\0bootmenu_0={}\0bootmenu_1={}\0\0",
        BUILTIN_ENTRIES[0], BUILTIN_ENTRIES[1]
    );
    assert_eq!(payload_of(&block), want.as_bytes());

    // Padding is zeroes, and nothing outside the partition moved.
    assert!(block[4 + want.len()..].iter().all(|&b| b == 0));
    let device = board.device();
    assert!(device[..ENV_OFFSET].iter().all(|&b| b == 0xff));
    assert!(device[ENV_OFFSET + ENV_SIZE..].iter().all(|&b| b == 0xff));

    // The staged copy is what went to flash.
    assert_eq!(fs::read(&board.settings.tmp_file).unwrap(), block);
}

#[test]
fn update_twice_changes_nothing() {
    let board = Board::new(b"bootmenu_2=Old=run boot_line_2\0bootdelay=1\0keep=me\0\0");
    board.configure(
        "[env]\nbootdelay = 3\nbootmenu_default = 0\n\n\
         [[entry]]\ntitle = \"Debian\"\nkernel = \"/boot/vmlinux\"\n\
         initrd = \"/boot/initrd.img\"\n",
    );

    Task::update(board.settings.clone()).run().unwrap();
    let first = board.device();
    Task::update(board.settings.clone()).run().unwrap();
    assert_eq!(board.device(), first);

    let block = board.env_block();
    let payload = String::from_utf8_lossy(payload_of(&block)).into_owned();
    assert!(!payload.contains("Old=run"));
    assert!(payload.starts_with("bootdelay=3\0keep=me\0"));
    assert!(payload.contains("bootmenu_0=Debian=run boot_line_0\0"));
}

#[test]
fn big_endian_checksum() {
    let board = Board::new(b"a=b\0\0");
    board.configure("[env]\nc = \"d\"\n");
    let settings = Settings {
        checksum_order: ChecksumOrder::Big,
        ..board.settings.clone()
    };

    Task::update(settings).run().unwrap();

    let block = board.env_block();
    assert!(checksum::verify(&block, ChecksumOrder::Big).unwrap().is_valid());
}

#[test]
fn bad_config_leaves_flash_alone() {
    let board = Board::new(b"a=b\0\0");
    board.configure("bootdelay 3\n");
    let before = board.device();

    let err = Task::update(board.settings.clone()).run().unwrap_err();
    assert!(matches!(err, Error::Config { line: 1, .. }));
    assert_eq!(board.device(), before);
}

#[test]
fn export_writes_text() {
    let board = Board::new(b"bootdelay=1\0unused_key=foo\0\0");
    let out = board.path("env.txt");

    let summary = Task::export(board.settings.clone(), Some(out.clone()))
        .run()
        .unwrap();

    assert_eq!(
        summary,
        Summary::Exported {
            output: out.clone(),
            entries: 2,
            checksum_ok: true,
        }
    );
    assert_eq!(fs::read(&out).unwrap(), b"bootdelay=1\nunused_key=foo\n\n");
}

#[test]
fn export_defaults_to_tmp_file_and_flags_bad_checksum() {
    let board = Board::new(b"x=y\0\0");
    let mut image = board.device();
    image[ENV_OFFSET] ^= 0x55;
    fs::write(&board.settings.device, &image).unwrap();

    let summary = Task::export(board.settings.clone(), None).run().unwrap();

    assert!(matches!(summary, Summary::Exported { checksum_ok: false, .. }));
    assert_eq!(fs::read(&board.settings.tmp_file).unwrap(), b"x=y\n\n");
    // Reading never writes.
    assert_eq!(board.device(), image);
}

#[test]
fn restore_writes_backup_verbatim() {
    let board = Board::new(b"a=b\0\0");
    let backup = vec![0x5a; 100];
    fs::write(&board.settings.backup_file, &backup).unwrap();
    let before = board.env_block();

    let summary = Task::restore(board.settings.clone()).run().unwrap();

    assert!(matches!(summary, Summary::Written { len: 100, .. }));
    let block = board.env_block();
    assert_eq!(&block[..100], &backup[..]);
    // The rest of the old block is untouched.
    assert_eq!(block[100..], before[100..]);
}

#[test]
fn oversize_input_is_refused() {
    let board = Board::new(b"a=b\0\0");
    let input = board.path("u-boot.bin");
    fs::write(&input, vec![0u8; ENV_OFFSET + 1]).unwrap();
    let before = board.device();

    let err = Task::write_bootloader(board.settings.clone(), input)
        .run()
        .unwrap_err();

    assert!(matches!(
        err,
        Error::OversizeInput { len, size, offset: 0, .. }
            if len == ENV_OFFSET as u64 + 1 && size == ENV_OFFSET as u32
    ));
    assert_eq!(board.device(), before);
}

#[test]
fn merged_block_too_big_for_partition() {
    let board = Board::new(b"a=b\0\0");
    board.configure(&format!("[env]\nhuge = \"{}\"\n", "x".repeat(ENV_SIZE)));
    let before = board.device();

    let err = Task::update(board.settings.clone()).run().unwrap_err();

    assert!(matches!(
        err,
        Error::OversizeInput { len, size, offset, .. }
            if len > ENV_SIZE as u64 && size == ENV_SIZE as u32 && offset == ENV_OFFSET as u32
    ));
    assert!(err.to_string().contains("at 0x1000"), "{}", err);
    assert_eq!(board.device(), before);
    assert!(!board.settings.tmp_file.exists());
}

#[test]
fn bootloader_and_rom_writes() {
    let board = Board::new(b"a=b\0\0");

    let uboot = board.path("u-boot.bin");
    fs::write(&uboot, b"U-Boot").unwrap();
    Task::write_bootloader(board.settings.clone(), uboot).run().unwrap();
    assert_eq!(&board.device()[..6], b"U-Boot");

    let rom = board.path("rom.bin");
    fs::write(&rom, vec![0x11; DEVICE_SIZE]).unwrap();
    let summary = Task::write_rom(board.settings.clone(), rom).run().unwrap();
    assert!(matches!(
        summary,
        Summary::Written { ref partition, len } if partition.size as usize == DEVICE_SIZE
            && len == DEVICE_SIZE as u64
    ));
    assert!(board.device().iter().all(|&b| b == 0x11));
}

#[test]
fn missing_partition() {
    let board = Board::new(b"a=b\0\0");
    fs::remove_dir_all(board.settings.of_node.join("part@1000")).unwrap();

    let err = Task::export(board.settings.clone(), None).run().unwrap_err();
    assert!(matches!(err, Error::PartitionNotFound(name) if name == SEC_ENV));
}

#[test]
fn fixed_table_instead_of_device_tree() {
    let board = Board::new(b"a=b\0\0");
    board.configure("[env]\nc = \"d\"\n");
    let table = PartitionTable(vec![
        Partition::new(SEC_UBOOT, 0, ENV_OFFSET as u32),
        Partition::new(SEC_ENV, ENV_OFFSET as u32, ENV_SIZE as u32),
    ]);
    // A device tree that would fail if anyone looked at it.
    let settings = Settings {
        of_node: board.path("nowhere"),
        ..board.settings.clone()
    };

    Task::update(settings).run_with(&table).unwrap();

    let block = board.env_block();
    assert!(checksum::verify(&block, ChecksumOrder::Native).unwrap().is_valid());
    assert!(payload_of(&block).starts_with(b"a=b\0c=d\0"));
}
