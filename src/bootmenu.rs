//! Turning configured boot entries into U-Boot `bootmenu` variables.
//!
//! Every entry gets a small family of variables, numbered after its position:
//!
//! ```text
//! interface_N    bring up the boot medium
//! kernel_load_N  load the kernel to ${kernel_addr_n}
//! initrd_load_N  (optional) load the initrd, leaving its size in ${initrd_len}
//! fdt_N          (optional) load the device tree and point U-Boot at it
//! kernel_args_N  (optional) extend ${bootargs}
//! boot_line_N    run all of the above, then bootm
//! bootmenu_N     "<title>=run boot_line_N"
//! ```
//!
//! The leading spaces in the command templates are what the firmware has
//! always been fed; U-Boot doesn't care.

use serde::Deserialize;

use crate::config;
use crate::dict::{ParameterDictionary, BOOTMENU_PREFIX};

pub const BOOT_LINE: &str = "boot_line_";
pub const INTERFACE_LINE: &str = "interface_";
pub const KERNEL_LINE: &str = "kernel_load_";
pub const INITRD_LINE: &str = "initrd_load_";
pub const FDT_LINE: &str = "fdt_";
pub const KERNEL_ARGS_LINE: &str = "kernel_args_";

const KERN_ARGS: &str = " setenv bootargs ${bootargs} ";

/// Menu choices every board gets, after the configured ones.
pub const BUILTIN_ENTRIES: [&str; 2] = [
    "Boot from SPI Flash to minimal FS (rom)=run flash_boot_ram",
    "Boot according to jumpers=boot_jumper",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Sata,
    Usb,
    #[serde(alias = "tftp")]
    Net,
}

/// Command fragments for one boot medium. Each load is `before` + path +
/// `after`.
struct Templates {
    init: &'static str,
    kernel: (&'static str, &'static str),
    initrd: (&'static str, &'static str),
    fdt: (&'static str, &'static str),
}

impl Interface {
    fn templates(self) -> Templates {
        match self {
            Interface::Sata => Templates {
                init: " setenv sata_port 0; sata init; sleep 1",
                kernel: (" ext4load sata 0:1 ${kernel_addr_n} ", ""),
                initrd: (
                    " ext4load sata 0:1 ${initrd_addr_n} ",
                    "; setenv initrd_len ${filesize}",
                ),
                fdt: (" ext4load sata 0:1 ${fdt_addr_n} ", "; fdt addr ${fdt_addr_n}"),
            },
            Interface::Usb => Templates {
                init: " usb start; sleep 1",
                kernel: (" ext4load usb 0:1 ${kernel_addr_n} ", ""),
                initrd: (
                    " ext4load usb 0:1 ${initrd_addr_n} ",
                    "; setenv initrd_len ${filesize}",
                ),
                fdt: (" ext4load usb 0:1 ${fdt_addr_n} ", "; fdt addr ${fdt_addr_n}"),
            },
            Interface::Net => Templates {
                init: " ",
                kernel: (
                    " setenv loadaddr ${kernel_addr_n}; setenv bootfile ",
                    "; tftp",
                ),
                initrd: (
                    " setenv loadaddr ${initrd_addr_n}; setenv bootfile ",
                    "; tftp; setenv initrd_len ${filesize}",
                ),
                fdt: (
                    " setenv loadaddr ${fdt_addr_n}; setenv bootfile ",
                    "; tftp; fdt addr ${fdt_addr_n}; fdt addr ${fdt_addr_n}",
                ),
            },
        }
    }
}

/// One `[[entry]]` table of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootEntry {
    #[serde(deserialize_with = "config::menu_title")]
    pub title: String,
    #[serde(default)]
    pub interface: Interface,
    #[serde(deserialize_with = "config::env_string")]
    pub kernel: String,
    #[serde(default, deserialize_with = "config::opt_env_string")]
    pub initrd: Option<String>,
    #[serde(default, deserialize_with = "config::opt_env_string")]
    pub fdt: Option<String>,
    #[serde(default, deserialize_with = "config::opt_env_string")]
    pub args: Option<String>,
}

impl BootEntry {
    /// The variables for this entry at position `n`, in the order they
    /// should be written.
    pub fn variables(&self, n: usize) -> Vec<(String, String)> {
        let t = self.interface.templates();
        let wrap =
            |(before, after): (&str, &str), path: &str| format!("{}{}{}", before, path, after);

        let mut vars = vec![
            (format!("{}{}", INTERFACE_LINE, n), t.init.to_string()),
            (format!("{}{}", KERNEL_LINE, n), wrap(t.kernel, self.kernel.as_str())),
        ];
        let mut steps = vec![format!("{}{}", INTERFACE_LINE, n), format!("{}{}", KERNEL_LINE, n)];

        if let Some(initrd) = &self.initrd {
            vars.push((format!("{}{}", INITRD_LINE, n), wrap(t.initrd, initrd.as_str())));
            steps.push(format!("{}{}", INITRD_LINE, n));
        }
        if let Some(fdt) = &self.fdt {
            vars.push((format!("{}{}", FDT_LINE, n), wrap(t.fdt, fdt.as_str())));
            steps.push(format!("{}{}", FDT_LINE, n));
        }
        if let Some(args) = &self.args {
            vars.push((format!("{}{}", KERNEL_ARGS_LINE, n), format!("{}{}", KERN_ARGS, args)));
            steps.push(format!("{}{}", KERNEL_ARGS_LINE, n));
        }

        let initrd = if self.initrd.is_some() {
            " ${initrd_addr_n}:${initrd_len}"
        } else {
            " -"
        };
        let fdt = if self.fdt.is_some() { " ${fdt_addr_n}" } else { "" };
        vars.push((
            format!("{}{}", BOOT_LINE, n),
            format!("run {}; bootm ${{kernel_addr_n}}{}{}", steps.join(" "), initrd, fdt),
        ));
        vars.push((
            format!("{}{}", BOOTMENU_PREFIX, n),
            format!("{}=run {}{}", self.title, BOOT_LINE, n),
        ));
        vars
    }
}

/// Adds the variables for `entries`, followed by the built-in choices, to
/// `dict`.
pub fn generate(entries: &[BootEntry], dict: &mut ParameterDictionary) {
    for (n, entry) in entries.iter().enumerate() {
        for (name, value) in entry.variables(n) {
            dict.insert(name, value);
        }
    }
    for (i, choice) in BUILTIN_ENTRIES.iter().enumerate() {
        dict.insert(format!("{}{}", BOOTMENU_PREFIX, entries.len() + i), *choice);
    }
}
