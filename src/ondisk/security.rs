use binrw::prelude::*;
use std::io::{Read, Write};

#[binrw::writer(writer)]
fn write_blobs(blobs: &Vec<Vec<u8>>) -> binrw::BinResult<()> {
    for blob in blobs {
        writer.write_all(blob)?;
    }
    Ok(())
}

#[binrw::parser(reader)]
fn read_blobs(sizes: &Vec<u64>) -> binrw::BinResult<Vec<Vec<u8>>> {
    let mut blobs = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let mut blob = vec![0u8; size as usize];
        reader.read_exact(&mut blob)?;
        blobs.push(blob);
    }
    Ok(blobs)
}

/// Security-descriptor section of an image metadata resource: a length
/// header, a size table, then the self-relative descriptor blobs in index
/// order.
///
/// Dentries refer to descriptors by index into this section.
#[binrw::binrw]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[brw(little)]
pub struct SecurityBlock {
    #[bw(calc = 8 + descriptors.iter().map(|d| 8 + d.len() as u32).sum::<u32>())]
    _total_length: u32,
    #[bw(try_calc = descriptors.len().try_into())]
    num_entries: u32,
    #[bw(calc = descriptors.iter().map(|d| d.len() as u64).collect())]
    #[br(count = num_entries)]
    sizes: Vec<u64>,
    #[br(parse_with = read_blobs, args(&sizes))]
    #[bw(write_with = write_blobs)]
    pub descriptors: Vec<Vec<u8>>,
}
