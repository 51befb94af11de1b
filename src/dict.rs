//! Parameters the configuration wants to see in the environment.

use std::collections::HashMap;

/// Names with this prefix make up the boot menu. They are always written
/// after everything else, and numbered ones are regenerated on every update.
pub const BOOTMENU_PREFIX: &str = "bootmenu_";

pub fn is_bootmenu(name: &[u8]) -> bool {
    name.starts_with(BOOTMENU_PREFIX.as_bytes())
}

/// `bootmenu_<digits>`: a menu choice. Only the last character is checked,
/// so `bootmenu_x1` counts too.
pub fn is_numbered_bootmenu(name: &[u8]) -> bool {
    is_bootmenu(name) && name.last().map_or(false, u8::is_ascii_digit)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterEntry {
    pub name: String,
    pub value: String,
    /// Set once the entry has made it into the output block.
    pub matched: bool,
}

impl ParameterEntry {
    /// The entry as it sits in an environment block: `name=value\0`.
    pub fn record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + self.value.len() + 2);
        out.extend_from_slice(self.name.as_bytes());
        out.push(b'=');
        out.extend_from_slice(self.value.as_bytes());
        out.push(0);
        out
    }

    pub fn is_bootmenu(&self) -> bool {
        is_bootmenu(self.name.as_bytes())
    }
}

/// Ordered parameter set. Order is the configuration file's order and only
/// matters when unmatched entries get appended; lookups go through `index`.
#[derive(Debug, Default, Clone)]
pub struct ParameterDictionary {
    entries: Vec<ParameterEntry>,
    index: HashMap<String, usize>,
}

impl ParameterDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name`, or replaces its value if it is already present. A
    /// replaced entry keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&i) => self.entries[i].value = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push(ParameterEntry {
                    name,
                    value,
                    matched: false,
                });
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Lookup by raw on-flash name. Names that aren't UTF-8 can't be in
    /// here, so they simply don't match.
    pub fn lookup_mut(&mut self, name: &[u8]) -> Option<&mut ParameterEntry> {
        let name = std::str::from_utf8(name).ok()?;
        let i = *self.index.get(name)?;
        Some(&mut self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParameterEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterDictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Self::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}
