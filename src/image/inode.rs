use crate::image::dentry::DentryId;
use crate::ondisk::{FileAttributes, FileTime, ReparseTag, Sha1Hash};

/// Index of an inode within one image's inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeId(pub(crate) u32);

/// Mode bits recorded when capturing from a POSIX source with Unix data
/// requested. Richer POSIX metadata (ACLs, xattrs) is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixData {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// A named alternate data stream attached to an inode. `hash` is `None` for
/// a zero-length stream, which owns no lookup-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsEntry {
    pub name: String,
    pub hash: Option<Sha1Hash>,
}

/// The file identity: everything about a file except the names by which it
/// is reached. Dentries sharing one inode form a hard-link group.
#[derive(Debug, Clone)]
pub struct Inode {
    pub attributes: FileAttributes,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
    pub last_access_time: FileTime,
    /// Set iff the file is a reparse point; the reparse payload (without its
    /// 8-byte header) is then the unnamed stream.
    pub reparse_tag: Option<ReparseTag>,
    /// Index into the image's security-descriptor set.
    pub security_id: Option<u32>,
    /// Content of the unnamed data stream; `None` when empty.
    pub unnamed: Option<Sha1Hash>,
    /// Named streams, in capture order.
    pub ads: Vec<AdsEntry>,
    pub ino: u64,
    pub unix_data: Option<UnixData>,
    pub(crate) links: Vec<DentryId>,
}

impl Inode {
    pub fn new(attributes: FileAttributes) -> Self {
        Self {
            attributes,
            creation_time: FileTime::default(),
            last_write_time: FileTime::default(),
            last_access_time: FileTime::default(),
            reparse_tag: None,
            security_id: None,
            unnamed: None,
            ads: Vec::new(),
            ino: 0,
            unix_data: None,
            links: Vec::new(),
        }
    }

    pub fn with_times(mut self, creation: FileTime, last_write: FileTime, last_access: FileTime) -> Self {
        self.creation_time = creation;
        self.last_write_time = last_write;
        self.last_access_time = last_access;
        self
    }

    /// Dentries sharing this inode.
    pub fn links(&self) -> &[DentryId] {
        &self.links
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.directory()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes.reparse_point()
    }

    /// Every stream hash on this inode, unnamed first.
    pub fn stream_hashes(&self) -> impl Iterator<Item = Sha1Hash> + '_ {
        self.unnamed
            .into_iter()
            .chain(self.ads.iter().filter_map(|a| a.hash))
    }
}
