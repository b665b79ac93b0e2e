//! The portable capture source: walks any tree the standard library can
//! read, with POSIX symlinks translated to symbolic-link reparse points.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::capture::source::{CaptureSource, ReparseData, SourceKind, SourceMeta, StreamInfo};
use crate::error::Error;
use crate::image::UnixData;
use crate::lookup::ResourceLocation;
use crate::ondisk::{reparse, FileAttributes, FileTime, ReparseTag};
use crate::Result;

/// Capture source over the local filesystem.
#[derive(Debug, Default)]
pub struct DiskSource {
    /// Follow symlinks instead of capturing them as reparse points.
    pub dereference: bool,
    /// Record uid/gid/mode on each inode (POSIX hosts only).
    pub unix_data: bool,
}

impl DiskSource {
    pub fn new(dereference: bool, unix_data: bool) -> Self {
        Self {
            dereference,
            unix_data,
        }
    }
}

fn timestamp(result: std::io::Result<std::time::SystemTime>, fallback: FileTime) -> FileTime {
    result.map(FileTime::from).unwrap_or(fallback)
}

#[cfg(unix)]
fn unix_meta(md: &fs::Metadata) -> (u64, u64, Option<UnixData>) {
    use std::os::unix::fs::MetadataExt;
    (
        md.ino(),
        md.nlink(),
        Some(UnixData {
            uid: md.uid(),
            gid: md.gid(),
            mode: md.mode(),
        }),
    )
}

#[cfg(not(unix))]
fn unix_meta(_md: &fs::Metadata) -> (u64, u64, Option<UnixData>) {
    (0, 1, None)
}

impl CaptureSource for DiskSource {
    fn stat(&mut self, path: &Path) -> Result<SourceMeta> {
        let md = if self.dereference {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
        .map_err(|source| Error::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        let file_type = md.file_type();
        let (kind, attributes) = if file_type.is_dir() {
            (SourceKind::Directory, FileAttributes::directory_only())
        } else if file_type.is_file() {
            (SourceKind::Regular, FileAttributes::normal_file())
        } else if file_type.is_symlink() {
            (SourceKind::Symlink, FileAttributes::new())
        } else {
            (SourceKind::Special("device, socket or FIFO"), FileAttributes::new())
        };

        let last_write = timestamp(md.modified(), FileTime::default());
        let (ino, nlink, unix_data) = unix_meta(&md);
        Ok(SourceMeta {
            kind,
            attributes,
            // Creation time is not portably available; fall back to the
            // last-write time, the closest thing POSIX keeps.
            creation_time: timestamp(md.created(), last_write),
            last_write_time: last_write,
            last_access_time: timestamp(md.accessed(), last_write),
            ino,
            nlink,
            size: md.len(),
            unix_data: if self.unix_data { unix_data } else { None },
        })
    }

    fn read_dir(&mut self, path: &Path) -> Result<Vec<String>> {
        let iter = fs::read_dir(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in iter {
            let entry = entry.map_err(|source| Error::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(Error::InvalidUtf8)?;
            names.push(name);
        }
        Ok(names)
    }

    fn read_reparse(&mut self, path: &Path) -> Result<ReparseData> {
        let target = fs::read_link(path).map_err(|source| Error::ReadLink {
            path: path.to_path_buf(),
            source,
        })?;
        let target_str = target
            .to_str()
            .ok_or_else(|| Error::InvalidUtf8(target.clone().into_os_string()))?;
        let body = reparse::symlink_reparse_body(target_str)?;
        // The directory bit follows the link target, not the link itself.
        let is_directory = fs::metadata(path).map(|md| md.is_dir()).unwrap_or(false);
        Ok(ReparseData {
            tag: ReparseTag::SYMLINK,
            body,
            is_directory,
        })
    }

    fn enumerate_streams(&mut self, _path: &Path, meta: &SourceMeta) -> Result<Vec<StreamInfo>> {
        Ok(vec![StreamInfo {
            name: None,
            size: meta.size,
        }])
    }

    fn open_stream(&mut self, path: &Path, _stream: &StreamInfo) -> Result<Box<dyn Read>> {
        let file = fs::File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Box::new(file))
    }

    fn stream_location(&self, path: &Path, _stream: &StreamInfo) -> ResourceLocation {
        ResourceLocation::OnDisk(path.to_path_buf())
    }

    fn read_security(&mut self, _path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn read_short_name(&mut self, _path: &Path) -> Result<Option<Vec<u16>>> {
        Ok(None)
    }
}
