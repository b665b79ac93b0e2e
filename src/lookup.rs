//! The lookup table: the SHA-1-indexed content store shared by every image
//! of an archive.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::ondisk::{ResourceEntry, ResourceFlags, Sha1Hash};

/// Where the bytes of one stream currently live.
#[derive(Debug, Clone)]
pub enum ResourceLocation {
    /// A file on the capture source filesystem.
    OnDisk(PathBuf),
    /// A Win32 path (possibly a named-stream path like `file:ads:$DATA`),
    /// stored as the wide string handed to `CreateFileW`.
    Win32Handle(Vec<u16>),
    /// A resource inside a WIM container file.
    InWim(ResourceEntry),
    /// Bytes held in memory.
    AttachedBuffer(Vec<u8>),
}

/// One content-addressed stream record.
///
/// The refcount equals the total number of dentry and ADS references to this
/// entry across all images sharing the table.
#[derive(Debug, Clone)]
pub struct LookupTableEntry {
    pub hash: Sha1Hash,
    pub refcount: u32,
    pub location: ResourceLocation,
    pub original_size: u64,
    pub compressed_size: u64,
    pub flags: ResourceFlags,
}

impl LookupTableEntry {
    pub fn with_location(hash: Sha1Hash, location: ResourceLocation, size: u64) -> Self {
        Self {
            hash,
            refcount: 1,
            location,
            original_size: size,
            compressed_size: size,
            flags: ResourceFlags::empty(),
        }
    }

    pub fn new_on_disk(hash: Sha1Hash, path: PathBuf, size: u64) -> Self {
        Self {
            hash,
            refcount: 1,
            location: ResourceLocation::OnDisk(path),
            original_size: size,
            compressed_size: size,
            flags: ResourceFlags::empty(),
        }
    }

    pub fn new_win32(hash: Sha1Hash, wide_path: Vec<u16>, size: u64) -> Self {
        Self {
            hash,
            refcount: 1,
            location: ResourceLocation::Win32Handle(wide_path),
            original_size: size,
            compressed_size: size,
            flags: ResourceFlags::empty(),
        }
    }

    pub fn new_attached(hash: Sha1Hash, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            hash,
            refcount: 1,
            location: ResourceLocation::AttachedBuffer(bytes),
            original_size: size,
            compressed_size: size,
            flags: ResourceFlags::empty(),
        }
    }

    /// The placeholder entry owned by a freshly appended image-metadata slot.
    /// The hash is random until the container writer serialises the metadata
    /// resource and rewrites it.
    pub fn new_metadata_placeholder(hash: Sha1Hash) -> Self {
        Self {
            hash,
            refcount: 1,
            location: ResourceLocation::InWim(ResourceEntry::default()),
            original_size: 0,
            compressed_size: 0,
            flags: ResourceFlags::METADATA,
        }
    }

    pub fn is_metadata(&self) -> bool {
        self.flags.contains(ResourceFlags::METADATA)
    }
}

/// SHA-1 keyed table of [`LookupTableEntry`].
///
/// The empty stream is never inserted; a file with no content simply carries
/// no stream reference.
#[derive(Debug, Default)]
pub struct LookupTable {
    map: HashMap<Sha1Hash, LookupTableEntry>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, hash: &Sha1Hash) -> Option<&LookupTableEntry> {
        self.map.get(hash)
    }

    pub fn lookup_mut(&mut self, hash: &Sha1Hash) -> Option<&mut LookupTableEntry> {
        self.map.get_mut(hash)
    }

    /// Inserts an entry assumed not to be present yet.
    pub fn insert(&mut self, entry: LookupTableEntry) {
        debug_assert!(!self.map.contains_key(&entry.hash));
        self.map.insert(entry.hash, entry);
    }

    /// The capture-side idiom: bump the refcount of an existing entry, or
    /// build one via `factory` (which must produce it with refcount 1).
    pub fn add_or_ref(
        &mut self,
        hash: Sha1Hash,
        factory: impl FnOnce() -> LookupTableEntry,
    ) -> &LookupTableEntry {
        self.map
            .entry(hash)
            .and_modify(|e| e.refcount += 1)
            .or_insert_with(|| {
                let entry = factory();
                debug_assert_eq!(entry.hash, hash);
                debug_assert_eq!(entry.refcount, 1);
                entry
            })
    }

    /// Increments the refcount of an existing entry.
    pub fn reference(&mut self, hash: &Sha1Hash) {
        if let Some(e) = self.map.get_mut(hash) {
            e.refcount += 1;
        } else {
            log::warn!("reference to unknown stream {hash}");
        }
    }

    /// Drops one reference; the entry is removed when its count reaches zero.
    pub fn unref(&mut self, hash: &Sha1Hash) {
        match self.map.get_mut(hash) {
            Some(e) => {
                e.refcount -= 1;
                if e.refcount == 0 {
                    self.map.remove(hash);
                }
            }
            None => log::warn!("unreference of unknown stream {hash}"),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LookupTableEntry> {
        self.map.values()
    }
}
