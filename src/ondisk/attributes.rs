use binrw::prelude::*;
use modular_bitfield::prelude::*;

/// File attribute flags, [MS-FSCC] 2.6.
///
/// The same bit assignments are used by the `FILE_ATTRIBUTE_*` constants of
/// the Win32 API and by the dentry records of a WIM metadata resource.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct FileAttributes {
    pub readonly: bool,
    pub hidden: bool,
    pub system: bool,
    #[skip]
    __: bool,

    pub directory: bool,
    pub archive: bool,
    #[skip]
    __: bool,
    pub normal: bool,

    pub temporary: bool,
    pub sparse_file: bool,
    pub reparse_point: bool,
    pub compressed: bool,

    pub offline: bool,
    pub not_content_indexed: bool,
    pub encrypted: bool,
    pub integrity_stream: bool,

    #[skip]
    __: bool,
    pub no_scrub_data: bool,
    pub recall_on_open: bool,
    pub pinned: bool,

    pub unpinned: bool,
    #[skip]
    __: bool,
    pub recall_on_data_access: bool,
    #[skip]
    __: B9,
}

impl FileAttributes {
    pub fn normal_file() -> Self {
        Self::new().with_normal(true)
    }

    pub fn directory_only() -> Self {
        Self::new().with_directory(true)
    }

    pub fn as_u32(&self) -> u32 {
        u32::from_le_bytes(Self::into_bytes(*self))
    }

    pub fn from_u32(value: u32) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }
}
