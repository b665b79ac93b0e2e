//! The archive object: a shared content store plus the image metadata slots
//! built by capture and consumed by apply and the container writer.

use std::path::Path;

use crate::apply::{self, ExtractFlags, NtfsVolume};
use crate::capture::{self, attach, CaptureContext, CaptureSource, DiskSource, ImageSource};
use crate::config::CaptureConfig;
use crate::error::Error;
use crate::image::{ImageMetadata, ImageTree};
use crate::lookup::LookupTable;
use crate::progress::{Progress, ProgressEvent, ProgressFn};
use crate::security::SecurityDescriptorSet;
use crate::Result;

/// Sentinel for operations that can span every image of an archive.
/// Operations needing exactly one image reject it.
pub const ALL_IMAGES: i32 = -1;

bitflags::bitflags! {
    /// Options for [`Wim::add_image`] and [`Wim::add_image_multisource`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AddImageFlags: u32 {
        /// Capture from a raw NTFS volume (requires an NTFS capture source).
        const NTFS = 0x1;
        /// Follow symbolic links instead of storing reparse points.
        const DEREFERENCE = 0x2;
        /// Log every scanned path.
        const VERBOSE = 0x4;
        /// Mark the new image as the archive's boot image.
        const BOOT = 0x8;
        /// Record uid/gid/mode from POSIX sources.
        const UNIX_DATA = 0x10;
        /// Internal: the branch being walked is the image root.
        const ROOT = 0x4000_0000;
        /// Internal: set while walking any branch of a capture.
        const SOURCE = 0x8000_0000;
    }
}

/// An in-memory WIM archive.
#[derive(Debug, Default)]
pub struct Wim {
    lookup_table: LookupTable,
    images: Vec<ImageMetadata>,
    /// 1-based index of the boot image; 0 when none is set.
    boot_index: u32,
}

impl Wim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn boot_index(&self) -> u32 {
        self.boot_index
    }

    pub fn lookup_table(&self) -> &LookupTable {
        &self.lookup_table
    }

    /// Mutable access to the content store, for the container reader and for
    /// collaborators that attach stream data directly.
    pub fn lookup_table_mut(&mut self) -> &mut LookupTable {
        &mut self.lookup_table
    }

    pub fn images(&self) -> &[ImageMetadata] {
        &self.images
    }

    /// Resolves a 1-based image index.
    fn resolve_image(&self, image: i32) -> Result<usize> {
        if image == ALL_IMAGES {
            return Err(Error::InvalidParam(
                "a single image index is required here".to_string(),
            ));
        }
        if image < 1 || image as usize > self.images.len() {
            return Err(Error::InvalidParam(format!(
                "image index {image} is out of range (archive has {} images)",
                self.images.len()
            )));
        }
        Ok(image as usize - 1)
    }

    pub fn image(&self, image: i32) -> Result<&ImageMetadata> {
        Ok(&self.images[self.resolve_image(image)?])
    }

    /// Captures `source_path` as a new image named `name`. Returns the new
    /// image's 1-based index.
    pub fn add_image(
        &mut self,
        source_path: &Path,
        name: &str,
        config: Option<CaptureConfig>,
        flags: AddImageFlags,
    ) -> Result<i32> {
        self.add_image_multisource(
            vec![ImageSource::new(source_path, "")],
            name,
            config,
            flags,
            None,
        )
    }

    /// Captures several sources into one image, each attached under its
    /// target path.
    pub fn add_image_multisource(
        &mut self,
        sources: Vec<ImageSource>,
        name: &str,
        config: Option<CaptureConfig>,
        flags: AddImageFlags,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<i32> {
        let sources = self.validate_capture(sources, name, flags)?;
        if flags.contains(AddImageFlags::NTFS) {
            return Err(Error::Unsupported(
                "raw NTFS volume capture requires an NTFS capture source; \
                 use add_image_with_source"
                    .to_string(),
            ));
        }
        let mut disk = DiskSource::new(
            flags.contains(AddImageFlags::DEREFERENCE),
            flags.contains(AddImageFlags::UNIX_DATA),
        );
        self.capture_image(&mut disk, sources, name, config, flags, progress)
    }

    /// The multi-source capture entry point for caller-supplied capture
    /// sources: the seam a raw-NTFS-volume walker plugs into.
    pub fn add_image_with_source(
        &mut self,
        source: &mut dyn CaptureSource,
        sources: Vec<ImageSource>,
        name: &str,
        config: Option<CaptureConfig>,
        flags: AddImageFlags,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<i32> {
        let sources = self.validate_capture(sources, name, flags)?;
        self.capture_image(source, sources, name, config, flags, progress)
    }

    fn validate_capture(
        &self,
        mut sources: Vec<ImageSource>,
        name: &str,
        flags: AddImageFlags,
    ) -> Result<Vec<ImageSource>> {
        if flags.contains(AddImageFlags::NTFS)
            && flags.intersects(AddImageFlags::DEREFERENCE | AddImageFlags::UNIX_DATA)
        {
            return Err(Error::InvalidParam(
                "NTFS capture cannot be combined with DEREFERENCE or UNIX_DATA".to_string(),
            ));
        }
        if sources.is_empty() {
            return Err(Error::InvalidParam("no capture sources given".to_string()));
        }
        if !name.is_empty() && self.images.iter().any(|m| m.name == name) {
            return Err(Error::ImageNameCollision(name.to_string()));
        }
        attach::sort_sources(&mut sources);
        if flags.contains(AddImageFlags::NTFS)
            && (sources.len() != 1 || !sources[0].target.is_empty())
        {
            return Err(Error::InvalidParam(
                "NTFS capture takes exactly one source targeting the image root".to_string(),
            ));
        }
        Ok(sources)
    }

    fn capture_image(
        &mut self,
        source_impl: &mut dyn CaptureSource,
        sources: Vec<ImageSource>,
        name: &str,
        config: Option<CaptureConfig>,
        flags: AddImageFlags,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<i32> {
        let mut config = config.unwrap_or_else(CaptureConfig::default_config);
        let mut progress = Progress(progress);
        let mut tree = ImageTree::new();
        let mut sd_set = SecurityDescriptorSet::new();

        let result = (|| -> Result<()> {
            for source in &sources {
                progress.emit(ProgressEvent::ScanBegin {
                    source: source.path.clone(),
                    target: source.target.clone(),
                });

                let prefix = source.path.to_str().ok_or_else(|| {
                    Error::InvalidUtf8(source.path.as_os_str().to_os_string())
                })?;
                config.set_prefix(prefix);

                let mut branch_flags = flags | AddImageFlags::SOURCE;
                if source.target.is_empty() {
                    branch_flags |= AddImageFlags::ROOT;
                }
                let mut ctx = CaptureContext {
                    source: &mut *source_impl,
                    table: &mut self.lookup_table,
                    sd_set: &mut sd_set,
                    config: &config,
                    flags: branch_flags,
                    progress: &mut progress,
                };
                if let Some(branch) = capture::build_dentry_tree(&mut ctx, &mut tree, &source.path)?
                {
                    attach::attach_branch(&mut tree, branch, &source.target)?;
                }

                progress.emit(ProgressEvent::ScanEnd {
                    source: source.path.clone(),
                    target: source.target.clone(),
                });
            }
            Ok(())
        })();

        if let Err(e) = result {
            // Roll the partial image back; the archive is left as it was.
            tree.release_streams(&mut self.lookup_table);
            return Err(e);
        }

        tree.compute_full_paths();
        tree.renumber_inodes();
        let metadata = ImageMetadata::new(name.to_string(), tree, sd_set, &mut self.lookup_table);
        Ok(self.push_image(metadata, flags.contains(AddImageFlags::BOOT)))
    }

    /// Appends a fully built metadata slot (used by the container reader and
    /// by collaborators that assemble images directly).
    pub fn add_image_metadata(&mut self, metadata: ImageMetadata) -> Result<i32> {
        if !metadata.name.is_empty() && self.images.iter().any(|m| m.name == metadata.name) {
            let name = metadata.name.clone();
            metadata.release(&mut self.lookup_table);
            return Err(Error::ImageNameCollision(name));
        }
        Ok(self.push_image(metadata, false))
    }

    fn push_image(&mut self, metadata: ImageMetadata, boot: bool) -> i32 {
        self.images.push(metadata);
        let index = self.images.len() as i32;
        if boot {
            self.boot_index = index as u32;
        }
        index
    }

    /// Applies one image onto an (empty) NTFS volume.
    pub fn apply_image_to_ntfs_volume(
        &self,
        image: i32,
        volume: &mut dyn NtfsVolume,
        flags: ExtractFlags,
    ) -> Result<()> {
        let index = self.resolve_image(image)?;
        apply::apply_image_to_ntfs(&self.images[index], &self.lookup_table, volume, flags)
    }
}
