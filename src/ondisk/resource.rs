use binrw::prelude::*;
use binrw::Endian;
use std::io::{Read, Write};

/// Uncompressed chunk size used for WIM resource data.
///
/// Stream contents are hashed and copied in units of this size.
pub const WIM_CHUNK_SIZE: usize = 32768;

bitflags::bitflags! {
    /// Flag byte of a resource-header entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResourceFlags: u8 {
        const FREE = 0x01;
        const METADATA = 0x02;
        const COMPRESSED = 0x04;
        const SPANNED = 0x08;
    }
}

#[binrw::writer(writer, endian)]
pub fn write_u56(value: &u64) -> binrw::BinResult<()> {
    let (buf, range) = match endian {
        Endian::Little => (value.to_le_bytes(), 0..7),
        Endian::Big => (value.to_be_bytes(), 1..8),
    };
    writer.write_all(&buf[range]).map_err(Into::into)
}

#[binrw::parser(reader, endian)]
pub fn read_u56() -> binrw::BinResult<u64> {
    type ConvFn = fn([u8; 8]) -> u64;
    let mut buf = [0u8; 8];
    let (conv, out): (ConvFn, &mut [u8]) = match endian {
        Endian::Little => (u64::from_le_bytes, &mut buf[..7]),
        Endian::Big => (u64::from_be_bytes, &mut buf[1..]),
    };
    reader.read_exact(out)?;
    Ok(conv(buf))
}

/// Resource-header entry: locates one stream inside a WIM container file.
///
/// The first quadword packs the stored (possibly compressed) size into the
/// low 7 bytes with the flag byte on top.
#[binrw::binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[brw(little)]
pub struct ResourceEntry {
    #[br(parse_with = read_u56)]
    #[bw(write_with = write_u56)]
    pub size: u64,
    #[br(map = ResourceFlags::from_bits_truncate)]
    #[bw(map = |f: &ResourceFlags| f.bits())]
    pub flags: ResourceFlags,
    pub offset: u64,
    pub original_size: u64,
}
