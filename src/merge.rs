//! Rewriting an environment block with the configured parameters merged in.

use std::io::Read;
use std::path::Path;

use crate::dict::{is_bootmenu, is_numbered_bootmenu, ParameterDictionary};
use crate::error::{Error, Result};
use crate::scan::{entry_name, scan, Token, CRC_SIZE};

/// Per-entry decisions while the existing payload streams by.
struct Merge<'d, 'o> {
    dict: &'d mut ParameterDictionary,
    out: &'o mut Vec<u8>,
    /// On-flash boot menu entries we keep but have to write at the very end.
    deferred: Vec<Vec<u8>>,
    terminated: bool,
}

impl Merge<'_, '_> {
    fn token(&mut self, token: Token<'_>) {
        let entry = match token {
            Token::Entry(entry) => entry,
            Token::End => {
                self.out.push(0);
                self.terminated = true;
                return;
            }
        };

        // A lone NUL here would read as the end marker.
        if entry.is_empty() {
            return;
        }

        let name = entry_name(entry);

        // Menu choices are rebuilt from the configuration every time.
        if is_numbered_bootmenu(name) {
            log::debug!("dropping stale {}", String::from_utf8_lossy(name));
            return;
        }

        let bootmenu = is_bootmenu(name);
        match self.dict.lookup_mut(name) {
            Some(param) if param.matched => {
                log::debug!("dropping duplicate {}", param.name);
            }
            // Left unmatched; the second append pass picks it up.
            Some(_) if bootmenu => {}
            Some(param) => {
                log::debug!("substitute parameter {}={}", param.name, param.value);
                self.out.extend_from_slice(&param.record());
                param.matched = true;
            }
            None if bootmenu => {
                let mut kept = entry.to_vec();
                kept.push(0);
                self.deferred.push(kept);
            }
            None => {
                self.out.extend_from_slice(entry);
                self.out.push(0);
            }
        }
    }
}

/// Appends what the scan left over, in two passes over the dictionary:
/// first every unmatched ordinary parameter, then the boot menu (anything we
/// deferred from flash, then unmatched `bootmenu_*` parameters). Each
/// parameter appended is marked matched.
pub fn append_unmatched(
    dict: &mut ParameterDictionary,
    deferred: &[Vec<u8>],
    out: &mut Vec<u8>,
) {
    for param in dict.iter_mut().filter(|p| !p.matched && !p.is_bootmenu()) {
        log::debug!("adding parameter {}={}", param.name, param.value);
        out.extend_from_slice(&param.record());
        param.matched = true;
    }

    for kept in deferred {
        out.extend_from_slice(kept);
    }

    for param in dict.iter_mut().filter(|p| !p.matched && p.is_bootmenu()) {
        log::debug!("adding menu entry {}={}", param.name, param.value);
        out.extend_from_slice(&param.record());
        param.matched = true;
    }
}

/// Builds a new block from the payload in `source` and the parameters in
/// `dict`.
///
/// `source` must already be past the checksum field. The result starts with
/// a zeroed checksum field and ends with the list terminator; it is not yet
/// padded or sealed, see `checksum::finalize`. `capacity` is reserved up
/// front, normally the partition size.
pub fn merge_block<R>(
    source: &mut R,
    source_path: &Path,
    dict: &mut ParameterDictionary,
    capacity: usize,
    chunk_size: usize,
) -> Result<Vec<u8>>
where
    R: Read + ?Sized,
{
    let mut block = Vec::new();
    block
        .try_reserve_exact(capacity.max(CRC_SIZE + 1))
        .map_err(|_| Error::AllocationFailure(capacity))?;
    block.extend_from_slice(&[0; CRC_SIZE]);

    let mut merge = Merge {
        dict,
        out: &mut block,
        deferred: Vec::new(),
        terminated: false,
    };
    scan(source, source_path, chunk_size, |token| {
        merge.token(token);
        Ok(())
    })?;

    let Merge {
        dict,
        deferred,
        terminated,
        ..
    } = merge;

    // Appended entries go where the terminator was.
    if terminated {
        block.pop();
    }
    append_unmatched(dict, &deferred, &mut block);
    block.push(0);

    log::debug!(
        "merged block: {} bytes of payload, {} parameters",
        block.len() - CRC_SIZE,
        dict.len()
    );
    Ok(block)
}
