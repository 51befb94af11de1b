//! Streaming scan of an environment block payload.
//!
//! The payload is a run of NUL-terminated `key=value` strings closed off by an
//! empty string, i.e. two NULs in a row. We read it in fixed-size chunks, and
//! chunk boundaries have no reason to line up with entry boundaries, so the
//! `Scanner` carries whatever it has seen of the current entry from one chunk
//! into the next. An entry is only ever handed out once its terminator has
//! been seen.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{alloc_buffer, Error, Result};

/// Size of the checksum field at the head of every block.
pub const CRC_SIZE: usize = 4;

/// Default read granularity. One page, same as the firmware tools use.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// A complete entry, without its terminating NUL.
    Entry(&'a [u8]),
    /// The end-of-list marker. Nothing after it is payload.
    End,
}

#[derive(Debug, Default)]
pub struct Scanner {
    /// Bytes of the entry currently being read, possibly spanning chunks.
    pending: Vec<u8>,
    /// Consecutive NULs seen, also across chunks.
    zeros: usize,
    finished: bool,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the end-of-list marker has gone by.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True if there are bytes of an unterminated entry waiting for more
    /// input.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Runs `chunk` through the scanner, calling `on_token` for every entry
    /// that completes in it and for the end marker.
    ///
    /// Returns how many bytes of `chunk` were consumed. That is all of them,
    /// unless the end marker turned up, in which case scanning stops right
    /// after it and the remainder is never looked at. Once finished, every
    /// further call consumes nothing.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_token: F) -> Result<usize>
    where
        F: FnMut(Token<'_>) -> Result<()>,
    {
        if self.finished {
            return Ok(0);
        }

        for (i, &b) in chunk.iter().enumerate() {
            if b != 0 {
                self.zeros = 0;
                self.pending.push(b);
                continue;
            }

            self.zeros += 1;
            if self.zeros == 1 {
                on_token(Token::Entry(&self.pending))?;
                self.pending.clear();
            } else {
                self.finished = true;
                on_token(Token::End)?;
                return Ok(i + 1);
            }
        }

        Ok(chunk.len())
    }
}

/// Reads `source` to the end-of-list marker (or to EOF) in chunks of
/// `chunk_size` bytes, feeding everything through a `Scanner`.
///
/// Returns whether the end marker was found. If the source runs dry first,
/// any half-read entry at the tail is discarded.
pub fn scan<R, F>(source: &mut R, path: &Path, chunk_size: usize, mut on_token: F) -> Result<bool>
where
    R: Read + ?Sized,
    F: FnMut(Token<'_>) -> Result<()>,
{
    let mut buf = alloc_buffer(chunk_size.max(1))?;
    let mut scanner = Scanner::new();
    let mut total = 0;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io("reading", path)(e)),
        };
        let used = scanner.feed(&buf[..n], &mut on_token)?;
        total += used;
        log::trace!("scan: read {} bytes, consumed {}, total {}", n, used, total);

        if scanner.is_finished() {
            return Ok(true);
        }
    }

    if scanner.has_partial() {
        log::warn!(
            "{}: environment ends in an unterminated entry, dropping it",
            path.display()
        );
    } else {
        log::debug!("{}: no end-of-list marker before end of data", path.display());
    }
    Ok(false)
}

/// Writes the payload in `source` to `out` as text, one entry per line. The
/// end marker becomes a final empty line.
///
/// Returns the number of entries written.
pub fn export<R, W>(
    source: &mut R,
    source_path: &Path,
    out: &mut W,
    out_path: &Path,
    chunk_size: usize,
) -> Result<usize>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut entries = 0;
    scan(source, source_path, chunk_size, |token| {
        let written = match token {
            Token::Entry(entry) => {
                entries += 1;
                out.write_all(entry).and_then(|_| out.write_all(b"\n"))
            }
            Token::End => out.write_all(b"\n"),
        };
        written.map_err(Error::io("writing", out_path))
    })?;
    Ok(entries)
}

/// Splits an entry at its first `=`. An entry without one is all name.
pub fn entry_name(entry: &[u8]) -> &[u8] {
    match entry.iter().position(|&b| b == b'=') {
        Some(eq) => &entry[..eq],
        None => entry,
    }
}
