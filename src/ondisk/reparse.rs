use std::fmt::Display;
use std::io::Cursor;

use binrw::prelude::*;

/// Upper bound (exclusive) on the reparse-point payload carried behind the
/// 8-byte header. The on-disk length field is a `u16`.
pub const REPARSE_POINT_MAX_DATA_SIZE: usize = 0xFFFF;

/// The substitute name is relative to the link's own directory
/// ([MS-FSCC] 2.1.2.4).
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

/// Reparse tag, [MS-FSCC] 2.1.2.1.
///
/// The tag identifies the filesystem filter that owns the reparse point.
/// Arbitrary third-party tags occur in the wild, so this is an open set.
#[binrw::binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReparseTag(pub u32);

impl ReparseTag {
    /// IO_REPARSE_TAG_MOUNT_POINT: junctions and mount points.
    pub const MOUNT_POINT: ReparseTag = ReparseTag(0xA000_0003);
    /// IO_REPARSE_TAG_SYMLINK: symbolic links.
    pub const SYMLINK: ReparseTag = ReparseTag(0xA000_000C);
}

impl Display for ReparseTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// REPARSE_DATA_BUFFER header plus the tag-specific payload,
/// [MS-FSCC] 2.1.2.2.
///
/// Images store only the payload (as the reparse inode's unnamed stream);
/// the header is re-prefixed when the buffer is handed to the filesystem.
#[binrw::binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct ReparseBuffer {
    pub tag: ReparseTag,
    #[bw(try_calc = body.len().try_into())]
    data_length: u16,
    #[bw(calc = 0)]
    _reserved: u16,
    #[br(count = data_length)]
    pub body: Vec<u8>,
}

impl ReparseBuffer {
    pub fn new(tag: ReparseTag, body: Vec<u8>) -> Self {
        Self { tag, body }
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.write(&mut buf)?;
        Ok(buf.into_inner())
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        Ok(Self::read(&mut Cursor::new(data))?)
    }
}

/// Symbolic-link payload, [MS-FSCC] 2.1.2.4.
///
/// The substitute name is laid out first in the path buffer, immediately
/// followed by the print name.
#[binrw::binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct SymlinkReparse {
    #[bw(calc = 0)]
    #[br(assert(substitute_name_offset == 0))]
    substitute_name_offset: u16,
    #[bw(try_calc = (substitute_name.len() * 2).try_into())]
    substitute_name_length: u16,
    #[bw(try_calc = (substitute_name.len() * 2).try_into())]
    #[br(assert(print_name_offset == substitute_name_length))]
    print_name_offset: u16,
    #[bw(try_calc = (print_name.len() * 2).try_into())]
    print_name_length: u16,
    pub flags: u32,
    #[br(count = substitute_name_length / 2)]
    pub substitute_name: Vec<u16>,
    #[br(count = print_name_length / 2)]
    pub print_name: Vec<u16>,
}

impl SymlinkReparse {
    pub fn is_relative(&self) -> bool {
        self.flags & SYMLINK_FLAG_RELATIVE != 0
    }
}

/// Translates a POSIX symlink target into a symbolic-link reparse payload:
/// forward slashes become backslashes and relative targets are flagged.
pub fn symlink_reparse_body(target: &str) -> crate::Result<Vec<u8>> {
    let translated = target.replace('/', "\\");
    let name: Vec<u16> = translated.encode_utf16().collect();
    let flags = if target.starts_with('/') {
        0
    } else {
        SYMLINK_FLAG_RELATIVE
    };
    let payload = SymlinkReparse {
        flags,
        substitute_name: name.clone(),
        print_name: name,
    };
    let mut buf = Cursor::new(Vec::new());
    payload.write(&mut buf)?;
    Ok(buf.into_inner())
}

/// Recovers the POSIX target from a symbolic-link reparse payload.
pub fn symlink_reparse_target(body: &[u8]) -> crate::Result<String> {
    let payload = SymlinkReparse::read(&mut Cursor::new(body))?;
    let name = String::from_utf16(&payload.substitute_name)
        .map_err(|_| crate::Error::InvalidUtf8("reparse point target".into()))?;
    Ok(name.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let buf = ReparseBuffer::new(ReparseTag::SYMLINK, vec![0xAA, 0xBB]);
        let bytes = buf.to_bytes().unwrap();
        assert_eq!(
            bytes,
            &[0x0C, 0x00, 0x00, 0xA0, 0x02, 0x00, 0x00, 0x00, 0xAA, 0xBB]
        );
        assert_eq!(ReparseBuffer::from_bytes(&bytes).unwrap(), buf);
    }

    #[test]
    fn test_relative_symlink_translation() {
        let body = symlink_reparse_body("../shared/data").unwrap();
        let payload = SymlinkReparse::read(&mut Cursor::new(&body)).unwrap();
        assert!(payload.is_relative());
        assert_eq!(
            String::from_utf16(&payload.print_name).unwrap(),
            "..\\shared\\data"
        );
        assert_eq!(symlink_reparse_target(&body).unwrap(), "../shared/data");
    }

    #[test]
    fn test_absolute_symlink_translation() {
        let body = symlink_reparse_body("/usr/lib/libc.so").unwrap();
        let payload = SymlinkReparse::read(&mut Cursor::new(&body)).unwrap();
        assert!(!payload.is_relative());
        assert_eq!(symlink_reparse_target(&body).unwrap(), "/usr/lib/libc.so");
    }
}
