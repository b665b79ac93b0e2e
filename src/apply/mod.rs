//! Applying an image onto an NTFS volume.

pub mod ntfs;

pub use ntfs::{NtfsAttr, NtfsCreateKind, NtfsNode, NtfsVolume, SecurityInformation};

use crate::error::Error;
use crate::image::ImageMetadata;
use crate::lookup::LookupTable;
use crate::Result;

bitflags::bitflags! {
    /// Extraction options. The symlink/hardlink translation modes belong to
    /// generic extraction and are rejected on the NTFS path, which
    /// reproduces links natively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtractFlags: u32 {
        const SYMLINK = 0x1;
        const HARDLINK = 0x2;
        const VERBOSE = 0x4;
    }
}

/// Materialises `image` onto `volume`.
pub fn apply_image_to_ntfs(
    image: &ImageMetadata,
    table: &LookupTable,
    volume: &mut dyn NtfsVolume,
    flags: ExtractFlags,
) -> Result<()> {
    if flags.intersects(ExtractFlags::SYMLINK | ExtractFlags::HARDLINK) {
        return Err(Error::InvalidParam(
            "symlink/hardlink extraction modes cannot be used on an NTFS volume".to_string(),
        ));
    }
    ntfs::apply_image(image, table, volume, flags)
}
