use rand::Rng;

use crate::image::dentry::ImageTree;
use crate::lookup::{LookupTable, LookupTableEntry};
use crate::ondisk::Sha1Hash;
use crate::security::SecurityDescriptorSet;

/// The per-image record appended to an archive: the dentry tree, the
/// security-descriptor set, and the owning reference to the image's metadata
/// resource in the lookup table.
#[derive(Debug)]
pub struct ImageMetadata {
    pub name: String,
    pub description: Option<String>,
    pub tree: ImageTree,
    pub sd_set: SecurityDescriptorSet,
    /// Hash of the metadata resource. Starts as a random placeholder; the
    /// container writer rewrites it once the resource is serialised.
    pub metadata_hash: Sha1Hash,
}

impl ImageMetadata {
    pub fn new(
        name: String,
        tree: ImageTree,
        sd_set: SecurityDescriptorSet,
        table: &mut LookupTable,
    ) -> Self {
        let mut raw = [0u8; 20];
        rand::thread_rng().fill(&mut raw);
        let metadata_hash = Sha1Hash(raw);
        table.insert(LookupTableEntry::new_metadata_placeholder(metadata_hash));
        Self {
            name,
            description: None,
            tree,
            sd_set,
            metadata_hash,
        }
    }

    /// Destroys the slot, dropping every stream reference it holds.
    pub fn release(self, table: &mut LookupTable) {
        self.tree.release_streams(table);
        table.unref(&self.metadata_hash);
    }
}
