//! The in-memory image model: a dentry tree over an inode table, plus the
//! per-image metadata slot appended to an archive.

pub mod dentry;
pub mod inode;
pub mod metadata;

pub use dentry::{DentryId, ImageTree, NameKey};
pub use inode::{AdsEntry, Inode, InodeId, UnixData};
pub use metadata::ImageMetadata;
