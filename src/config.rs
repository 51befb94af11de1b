//! The human-editable configuration, usually `/boot/uboot.conf`. It is TOML:
//!
//! ```toml
//! # plain variables, written as-is and in this order
//! [env]
//! bootdelay = 3
//! silent = "yes"
//! bootmenu_default = 0
//!
//! [[entry]]
//! title = "Debian from SATA"
//! interface = "sata"
//! kernel = "/boot/vmlinux"
//! initrd = "/boot/initrd.img"
//! fdt = "/boot/board.dtb"
//! args = "console=ttyS0,115200 root=/dev/sda1"
//! ```
//!
//! The boot menu generated from the `[[entry]]` tables comes after all of
//! the `[env]` variables.

use std::fs;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use indexmap::IndexMap as Map;
use toml::{Spanned, Value};

use crate::bootmenu::{self, BootEntry};
use crate::dict::ParameterDictionary;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    env: Map<String, Spanned<Value>>,
    #[serde(default)]
    entry: Vec<BootEntry>,
}

pub fn load(path: &Path) -> Result<ParameterDictionary> {
    let text = fs::read_to_string(path).map_err(Error::io("reading", path))?;
    parse(&text, path)
}

pub fn parse(text: &str, path: &Path) -> Result<ParameterDictionary> {
    let fail = |offset: usize, message: String| Error::Config {
        path: path.to_path_buf(),
        line: line_at(text, offset),
        message,
    };

    let file: ConfigFile = toml::from_str(text).map_err(|e| {
        let offset = e.span().map_or(0, |s| s.start);
        fail(offset, e.message().to_string())
    })?;

    let mut dict = ParameterDictionary::new();
    for (name, value) in &file.env {
        let at = value.span().start;
        if name.is_empty() || name.contains(|c: char| c == '=' || c.is_whitespace()) {
            return Err(fail(at, format!("bad parameter name {:?}", name)));
        }
        let value = env_value(value.get_ref()).map_err(|m| fail(at, m))?;
        dict.insert(name.as_str(), value);
    }

    let entries = file.entry;
    log::debug!(
        "{}: {} parameters, {} boot entries",
        path.display(),
        dict.len(),
        entries.len()
    );
    bootmenu::generate(&entries, &mut dict);
    Ok(dict)
}

/// Environment values are strings to U-Boot; numbers and booleans are
/// accepted for convenience and written the way TOML spells them.
fn env_value(value: &Value) -> std::result::Result<String, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => {
            return Err(format!(
                "expected a string, number or boolean, found {}",
                other.type_str()
            ))
        }
    };
    if text.contains('\0') {
        return Err("NUL characters are not allowed".into());
    }
    Ok(text)
}

/// A string headed for the environment, where a NUL would end it early.
pub(crate) fn env_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.contains('\0') {
        return Err(de::Error::custom("NUL characters are not allowed"));
    }
    Ok(s)
}

pub(crate) fn opt_env_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    env_string(deserializer).map(Some)
}

/// Menu titles end up in front of the `=` of a `bootmenu_N` value.
pub(crate) fn menu_title<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let title = env_string(deserializer)?;
    if title.is_empty() || title.contains('=') {
        return Err(de::Error::custom(format!("bad entry title {:?}", title)));
    }
    Ok(title)
}

fn line_at(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dict: &ParameterDictionary) -> Vec<&str> {
        dict.iter().map(|e| e.name.as_str()).collect()
    }

    fn error_line(text: &str) -> usize {
        match parse(text, Path::new("c")) {
            Err(Error::Config { line, .. }) => line,
            other => panic!("{:?}: {:?}", text, other.map(|d| d.len())),
        }
    }

    #[test]
    fn env_keeps_file_order() {
        let dict = parse(
            "# comment\n\n[env]\nsilent = \"yes\"\nbootdelay = 3\n\
             bootargs = \"console=ttyS0 quiet\"\nempty = \"\"\nverbose = false\n",
            Path::new("uboot.conf"),
        )
        .unwrap();

        assert_eq!(
            &names(&dict)[..5],
            ["silent", "bootdelay", "bootargs", "empty", "verbose"]
        );
        assert_eq!(dict.get("bootdelay").unwrap().value, "3");
        assert_eq!(dict.get("bootargs").unwrap().value, "console=ttyS0 quiet");
        assert_eq!(dict.get("empty").unwrap().value, "");
        assert_eq!(dict.get("verbose").unwrap().value, "false");
        // Two built-in menu choices follow.
        assert_eq!(dict.len(), 7);
    }

    #[test]
    fn empty_file_still_has_builtin_menu() {
        let dict = parse("", Path::new("uboot.conf")).unwrap();
        assert_eq!(names(&dict), ["bootmenu_0", "bootmenu_1"]);
    }

    #[test]
    fn entries_come_after_env() {
        let dict = parse(
            "[[entry]]\ntitle = \"SATA\"\nkernel = \"/boot/vmlinux\"\n\n\
             [[entry]]\ntitle = \"Net\"\ninterface = \"tftp\"\nkernel = \"vmlinux\"\n\
             fdt = \"board.dtb\"\n\n[env]\nbootdelay = 1\n",
            Path::new("uboot.conf"),
        )
        .unwrap();

        let names = names(&dict);
        assert_eq!(names[0], "bootdelay");
        assert!(names.contains(&"fdt_1"));
        assert_eq!(dict.get("bootmenu_0").unwrap().value, "SATA=run boot_line_0");
        assert_eq!(dict.get("bootmenu_1").unwrap().value, "Net=run boot_line_1");
        assert!(dict.get("kernel_load_1").unwrap().value.ends_with("; tftp"));
        assert!(dict.get("bootmenu_3").is_some());
        assert!(dict.get("bootmenu_4").is_none());
    }

    #[test]
    fn errors_name_the_line() {
        assert_eq!(error_line("[env]\nbootdelay 3\n"), 2);
        assert_eq!(error_line("[env]\na = 1\nb = [1, 2]\n"), 3);
        assert_eq!(error_line("[env]\n\"bad name\" = 1\n"), 2);
        assert_eq!(
            error_line("[[entry]]\ntitle = \"x\"\nkernel = \"k\"\ninterface = \"floppy\"\n"),
            4
        );
    }

    #[test]
    fn entry_mistakes_are_rejected() {
        let cases = [
            // no kernel
            "[[entry]]\ntitle = \"x\"\ninitrd = \"i\"\n",
            // unknown key
            "[[entry]]\ntitle = \"x\"\nkernel = \"k\"\ncolour = \"red\"\n",
            // title would break the menu entry
            "[[entry]]\ntitle = \"a=b\"\nkernel = \"k\"\n",
            "[[entry]]\ntitle = \"\"\nkernel = \"k\"\n",
            "[[entry]]\ntitle = \"x\"\nkernel = \"k\\u0000\"\n",
            // unknown section
            "[bogus]\nx = 1\n",
        ];
        for text in cases {
            assert!(
                matches!(parse(text, Path::new("c")), Err(Error::Config { .. })),
                "{:?}",
                text
            );
        }
    }
}
