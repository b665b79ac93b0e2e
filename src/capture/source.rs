use std::io::Read;
use std::path::Path;

use crate::image::UnixData;
use crate::lookup::ResourceLocation;
use crate::ondisk::{FileAttributes, FileTime, ReparseTag};
use crate::Result;

/// What kind of object a capture source found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Regular,
    Directory,
    Symlink,
    /// Devices, sockets, FIFOs: not capturable.
    Special(&'static str),
}

/// Stat result for one path on a capture source.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub kind: SourceKind,
    /// Attribute bits as far as the platform reports them; the walker
    /// refines reparse/directory bits where needed.
    pub attributes: FileAttributes,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
    pub last_access_time: FileTime,
    /// Platform inode/file-ID number; 0 when unavailable.
    pub ino: u64,
    /// Number of names for this inode on the source; multi-link regular
    /// files are consolidated into one hard-link group.
    pub nlink: u64,
    pub size: u64,
    pub unix_data: Option<UnixData>,
}

/// One `$DATA` stream of a file. `name` is `None` for the unnamed stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: Option<String>,
    pub size: u64,
}

/// A reparse payload read from the source, already stripped of its 8-byte
/// header.
#[derive(Debug, Clone)]
pub struct ReparseData {
    pub tag: ReparseTag,
    pub body: Vec<u8>,
    /// Whether the reparse point stands in for a directory (for symlinks:
    /// whether the target resolves to one).
    pub is_directory: bool,
}

/// The platform seam of the capture engine.
///
/// A source exposes exactly the capabilities the tree builder needs: stat,
/// directory enumeration, stream enumeration and reading, reparse data,
/// security descriptors and short names. The portable implementation is
/// [`DiskSource`](super::fs::DiskSource); Win32 and raw-NTFS walkers plug in
/// through the same trait.
pub trait CaptureSource {
    fn stat(&mut self, path: &Path) -> Result<SourceMeta>;

    /// Directory entries in readdir order, `.` and `..` omitted.
    fn read_dir(&mut self, path: &Path) -> Result<Vec<String>>;

    fn read_reparse(&mut self, path: &Path) -> Result<ReparseData>;

    /// Every `$DATA` stream of a non-reparse file, unnamed stream first when
    /// present.
    fn enumerate_streams(&mut self, path: &Path, meta: &SourceMeta) -> Result<Vec<StreamInfo>>;

    fn open_stream(&mut self, path: &Path, stream: &StreamInfo) -> Result<Box<dyn Read>>;

    /// Where the stream's bytes can be re-read later (for the container
    /// writer).
    fn stream_location(&self, path: &Path, stream: &StreamInfo) -> ResourceLocation;

    /// The file's security descriptor, if the platform has one.
    fn read_security(&mut self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// The file's 8.3 alias, if the platform has one and it is non-empty.
    fn read_short_name(&mut self, path: &Path) -> Result<Option<Vec<u16>>>;
}
