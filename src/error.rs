use std::path::PathBuf;

use thiserror::Error;

use crate::ondisk::Sha1Hash;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to stat {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read symbolic link {path:?}: {source}")]
    ReadLink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:?} is a special file that cannot be captured")]
    SpecialFile(PathBuf),
    #[error("Name is not representable as UTF-8: {0:?}")]
    InvalidUtf8(std::ffi::OsString),
    #[error("Invalid capture configuration: {0}")]
    InvalidCaptureConfig(String),
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
    #[error("An image named \"{0}\" already exists")]
    ImageNameCollision(String),
    #[error("Operating on split archives is not supported")]
    SplitUnsupported,
    #[error("Invalid overlay: {0}")]
    InvalidOverlay(String),
    #[error("Invalid directory entry: {0}")]
    InvalidDentry(String),
    #[error("SHA-1 digest mismatch: expected {expected}, got {actual}")]
    InvalidResourceHash { expected: Sha1Hash, actual: Sha1Hash },
    #[error("NTFS volume operation failed: {0}")]
    Ntfs(#[source] std::io::Error),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Binrw Error: {0}")]
    BinRw(#[from] binrw::Error),
}
