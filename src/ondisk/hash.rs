use std::fmt::{Debug, Display};

use binrw::prelude::*;
use sha1::{Digest, Sha1};

pub const SHA1_HASH_SIZE: usize = 20;

/// SHA-1 message digest of one stream's content.
///
/// Streams are content-addressed: two streams with equal digests share one
/// lookup-table entry, across every image of an archive.
#[derive(BinRead, BinWrite, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Sha1Hash(pub [u8; SHA1_HASH_SIZE]);

impl Sha1Hash {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = StreamHasher::new();
        hasher.update(data);
        hasher.finish().0
    }

    pub fn as_bytes(&self) -> &[u8; SHA1_HASH_SIZE] {
        &self.0
    }
}

impl Display for Sha1Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Sha1Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha1Hash({self})")
    }
}

/// Incremental SHA-1 over a stream read in chunks, tracking the byte count.
pub struct StreamHasher {
    ctx: Sha1,
    len: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self {
            ctx: Sha1::new(),
            len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.ctx.update(data);
        self.len += data.len() as u64;
    }

    pub fn finish(self) -> (Sha1Hash, u64) {
        let digest = self.ctx.finalize();
        (Sha1Hash(digest.into()), self.len)
    }
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}
