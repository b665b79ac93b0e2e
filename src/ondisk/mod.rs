//! Bit-exact on-disk structures shared by the capture and apply engines.
//!
//! Everything in here is defined by the WIM file format or by the Windows
//! filesystem specifications ([MS-FSCC], [MS-DTYP]) and is serialised
//! little-endian.

pub mod attributes;
pub mod file_time;
pub mod hash;
pub mod reparse;
pub mod resource;
pub mod security;

pub use attributes::FileAttributes;
pub use file_time::FileTime;
pub use hash::{Sha1Hash, StreamHasher, SHA1_HASH_SIZE};
pub use reparse::{ReparseBuffer, ReparseTag, REPARSE_POINT_MAX_DATA_SIZE};
pub use resource::{ResourceEntry, ResourceFlags, WIM_CHUNK_SIZE};
pub use security::SecurityBlock;
