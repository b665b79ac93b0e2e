//! Readers over lookup-table entries, wherever their bytes currently live.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::error::Error;
use crate::lookup::{LookupTableEntry, ResourceLocation};
use crate::ondisk::{StreamHasher, WIM_CHUNK_SIZE};
use crate::Result;

/// A human-readable path for error reporting, whatever the location kind.
fn location_path(lte: &LookupTableEntry) -> PathBuf {
    match &lte.location {
        ResourceLocation::OnDisk(path) => path.clone(),
        ResourceLocation::Win32Handle(wide) => {
            PathBuf::from(String::from_utf16_lossy(wide))
        }
        ResourceLocation::InWim(_) => PathBuf::from("<archive resource>"),
        ResourceLocation::AttachedBuffer(_) => PathBuf::from("<attached buffer>"),
    }
}

/// Opens the uncompressed content of `lte` for sequential reading.
pub fn open(lte: &LookupTableEntry) -> Result<Box<dyn Read + '_>> {
    match &lte.location {
        ResourceLocation::OnDisk(path) => {
            let file = File::open(path).map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
            Ok(Box::new(file))
        }
        ResourceLocation::AttachedBuffer(bytes) => Ok(Box::new(bytes.as_slice())),
        #[cfg(windows)]
        ResourceLocation::Win32Handle(wide) => {
            use std::ffi::OsString;
            use std::os::windows::ffi::OsStringExt;
            let trimmed = match wide.iter().position(|&c| c == 0) {
                Some(nul) => &wide[..nul],
                None => &wide[..],
            };
            let path = PathBuf::from(OsString::from_wide(trimmed));
            let file = File::open(&path).map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
            Ok(Box::new(file))
        }
        #[cfg(not(windows))]
        ResourceLocation::Win32Handle(_) => Err(Error::Unsupported(
            "Win32 stream locations cannot be read on this platform".to_string(),
        )),
        ResourceLocation::InWim(_) => Err(Error::Unsupported(
            "reading an in-archive resource requires the container reader".to_string(),
        )),
    }
}

/// Streams the content of `lte` into `sink` in WIM-sized chunks while
/// recomputing its SHA-1; a digest mismatch at EOF is fatal.
pub fn copy_verified(
    lte: &LookupTableEntry,
    mut sink: impl FnMut(u64, &[u8]) -> Result<()>,
) -> Result<()> {
    let mut reader = open(lte)?;
    let mut hasher = StreamHasher::new();
    let mut buf = vec![0u8; WIM_CHUNK_SIZE];
    let mut offset = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(|source| Error::Read {
            path: location_path(lte),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        sink(offset, &buf[..n])?;
        offset += n as u64;
    }
    let (actual, _) = hasher.finish();
    if actual != lte.hash {
        return Err(Error::InvalidResourceHash {
            expected: lte.hash,
            actual,
        });
    }
    Ok(())
}

/// Reads and verifies the full content of `lte`.
pub fn read_to_vec(lte: &LookupTableEntry) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(lte.original_size as usize);
    copy_verified(lte, |_, chunk| {
        out.extend_from_slice(chunk);
        Ok(())
    })?;
    Ok(out)
}
