//! Reading and rewriting the U-Boot environment kept raw in a flash partition.
//!
//! The environment block is a checksum followed by NUL-terminated
//! `key=value` strings, with an empty string (a second NUL) closing the list,
//! zero-padded out to the partition size:
//!
//! ```text
//! +-------+----------------+----------------+-----+----+---------...
//! | crc32 | bootdelay=3 \0 | silent=yes \0  | ... | \0 | padding
//! +-------+----------------+----------------+-----+----+---------...
//! ```
//!
//! Updating it means streaming the existing block through a `Scanner`,
//! swapping in configured values as we go, appending whatever the
//! configuration has that the block didn't, and sealing the result with a
//! fresh checksum.

pub mod bootmenu;
pub mod checksum;
pub mod config;
pub mod dict;
pub mod error;
pub mod merge;
pub mod partition;
pub mod scan;
pub mod task;
pub mod writer;

pub use checksum::{ChecksumOrder, Verdict};
pub use dict::{ParameterDictionary, ParameterEntry};
pub use error::{Error, Result};
pub use partition::{DeviceTree, Partition, PartitionProvider, PartitionTable};
pub use scan::{Scanner, Token};
pub use task::{Operation, Settings, Summary, Task};
