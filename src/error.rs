use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Any open/read/write/seek failure. `op` names what we were doing when
    /// it happened, `path` which file we were doing it to.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("partition {0:?} not found")]
    PartitionNotFound(String),

    #[error("partition {name:?} is invalid: {reason}")]
    InvalidPartition { name: String, reason: String },

    /// Source does not fit in the target partition. Nothing has been written
    /// to the device when this comes back.
    #[error(
        "{} is too large for partition at 0x{offset:x} ({len} > {size} bytes), abort",
        path.display()
    )]
    OversizeInput {
        path: PathBuf,
        len: u64,
        size: u32,
        offset: u32,
    },

    #[error("out of memory allocating {0} bytes")]
    AllocationFailure(usize),

    #[error("{}:{line}: {message}", path.display())]
    Config {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.to_path_buf();
        move |source| Error::Io { op, path, source }
    }
}

/// Allocates a zeroed buffer of `len` bytes, reporting exhaustion instead of
/// aborting the process.
pub(crate) fn alloc_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure(len))?;
    buf.resize(len, 0);
    Ok(buf)
}
