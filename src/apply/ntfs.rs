//! The two-pass NTFS extractor.
//!
//! The volume itself sits behind [`NtfsVolume`], a trait mirroring the
//! libntfs-3g call surface the extractor drives: the production
//! implementation binds the NTFS library, tests use an in-memory volume.
//!
//! Pass 1 walks the dentry tree in pre-order, creating objects and writing
//! stream data. Pass 2 walks in post-order, setting timestamps, so touching
//! a child never disturbs timestamps already applied to its parent.

use std::collections::{HashMap, HashSet};
use std::io;

use crate::apply::ExtractFlags;
use crate::error::Error;
use crate::image::{DentryId, ImageMetadata, ImageTree, Inode, InodeId};
use crate::lookup::LookupTable;
use crate::ondisk::{FileTime, ReparseBuffer, Sha1Hash, REPARSE_POINT_MAX_DATA_SIZE};
use crate::resource;
use crate::security::SecurityDescriptorSet;
use crate::Result;

bitflags::bitflags! {
    /// Which parts of a security descriptor to apply; the Win32
    /// SECURITY_INFORMATION selection bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityInformation: u32 {
        const OWNER = 0x1;
        const GROUP = 0x2;
        const DACL = 0x4;
        const SACL = 0x8;
    }
}

/// Opaque handle to an open inode on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtfsNode(pub u64);

/// Opaque handle to an open data attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtfsAttr(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtfsCreateKind {
    Regular,
    Directory,
}

/// The NTFS library surface the extractor needs.
///
/// Paths are `/`-separated and rooted at the volume. Every `resolve`/`create`
/// hands back an open inode that the caller must `close`; `attr_open` hands
/// back an attribute handle closed with `attr_close`. `set_dos_name` binds an
/// 8.3 alias to the (open) child under the (open) parent without closing
/// either.
pub trait NtfsVolume {
    fn resolve(&mut self, path: &str) -> io::Result<NtfsNode>;
    fn close(&mut self, node: NtfsNode) -> io::Result<()>;
    fn create(&mut self, parent: NtfsNode, name: &str, kind: NtfsCreateKind)
        -> io::Result<NtfsNode>;
    /// Adds a new name for `node` under `parent` (a hard link).
    fn link(&mut self, node: NtfsNode, parent: NtfsNode, name: &str) -> io::Result<()>;
    /// Opens a `$DATA` attribute; `""` is the unnamed stream, anything else
    /// a named stream created on demand.
    fn attr_open(&mut self, node: NtfsNode, stream_name: &str) -> io::Result<NtfsAttr>;
    fn attr_pwrite(&mut self, attr: NtfsAttr, offset: u64, data: &[u8]) -> io::Result<usize>;
    fn attr_close(&mut self, attr: NtfsAttr);
    fn set_attributes(&mut self, node: NtfsNode, attributes: u32) -> io::Result<()>;
    fn set_security(
        &mut self,
        node: NtfsNode,
        selection: SecurityInformation,
        descriptor: &[u8],
    ) -> io::Result<()>;
    /// Sets the full reparse buffer (8-byte header plus payload).
    fn set_reparse_data(&mut self, node: NtfsNode, data: &[u8]) -> io::Result<()>;
    fn set_dos_name(&mut self, node: NtfsNode, parent: NtfsNode, short_name: &str)
        -> io::Result<()>;
    fn set_times(
        &mut self,
        node: NtfsNode,
        creation: FileTime,
        last_write: FileTime,
        last_access: FileTime,
    ) -> io::Result<()>;
}

fn ntfs_op<T>(result: io::Result<T>, what: &str, path: &str) -> Result<T> {
    result.map_err(|source| {
        log::error!("{what} failed on {path}: {source}");
        Error::Ntfs(source)
    })
}

/// Closes a node; a close failure never masks an earlier error, but it does
/// demote a success.
fn close_keep(volume: &mut dyn NtfsVolume, node: NtfsNode, path: &str, ret: &mut Result<()>) {
    if let Err(source) = volume.close(node) {
        log::error!("Failed to close inode for {path}: {source}");
        if ret.is_ok() {
            *ret = Err(Error::Ntfs(source));
        }
    }
}

fn full_path(tree: &ImageTree, id: DentryId) -> Result<&str> {
    tree.dentry(id)
        .full_path()
        .ok_or_else(|| Error::InvalidDentry("dentry has no computed path".to_string()))
}

pub(crate) fn apply_image(
    image: &ImageMetadata,
    table: &LookupTable,
    volume: &mut dyn NtfsVolume,
    flags: ExtractFlags,
) -> Result<()> {
    let mut extractor = NtfsExtractor {
        tree: &image.tree,
        table,
        sd_set: &image.sd_set,
        volume,
        flags,
        applied: HashSet::new(),
        extracted: HashMap::new(),
    };

    extractor.apply_root()?;
    for id in image.tree.pre_order() {
        if id != image.tree.root() {
            extractor.extract_dentry(id)?;
        }
    }
    for id in image.tree.post_order() {
        extractor.apply_times(id)?;
    }
    Ok(())
}

struct NtfsExtractor<'a> {
    tree: &'a ImageTree,
    table: &'a LookupTable,
    sd_set: &'a SecurityDescriptorSet,
    volume: &'a mut dyn NtfsVolume,
    flags: ExtractFlags,
    /// Dentries already handled in pass 1 (out of tree order when the
    /// short-name rule pulls one forward).
    applied: HashSet<DentryId>,
    /// First extracted path of each multi-link inode; later names hard-link
    /// to it.
    extracted: HashMap<InodeId, String>,
}

impl NtfsExtractor<'_> {
    /// The volume root is never created, only decorated.
    fn apply_root(&mut self) -> Result<()> {
        let tree = self.tree;
        self.applied.insert(tree.root());
        let inode = tree.inode_of(tree.root());
        let node = ntfs_op(self.volume.resolve("/"), "Opening volume root", "/")?;
        let mut ret = self.apply_metadata(node, inode, "/");
        close_keep(self.volume, node, "/", &mut ret);
        ret
    }

    fn extract_dentry(&mut self, id: DentryId) -> Result<()> {
        if !self.applied.insert(id) {
            return Ok(());
        }
        let tree = self.tree;
        let dentry = tree.dentry(id);
        let inode_id = dentry.inode;
        let inode = tree.inode(inode_id);

        // A pending short name elsewhere in the link group must be bound
        // before this name is created, so it attaches to a Win32-namespace
        // long name rather than a POSIX alias made by a later link.
        if inode.link_count() > 1 && dentry.short_name.is_none() {
            for &sibling in inode.links() {
                if sibling == id || self.applied.contains(&sibling) {
                    continue;
                }
                let s = tree.dentry(sibling);
                if s.parent == dentry.parent
                    && s.short_name.as_ref().is_some_and(|n| !n.is_empty())
                {
                    self.extract_dentry(sibling)?;
                }
            }
        }

        let path = full_path(tree, id)?;
        let parent_path = match dentry.parent {
            Some(parent) => full_path(tree, parent)?,
            None => {
                return Err(Error::InvalidDentry(format!(
                    "{path} is detached from the tree"
                )))
            }
        };
        if self.flags.contains(ExtractFlags::VERBOSE) {
            log::info!("Extracting {path}");
        }

        let parent = ntfs_op(
            self.volume.resolve(parent_path),
            "Opening directory",
            parent_path,
        )?;
        let mut parent_node = Some(parent);
        let mut node: Option<NtfsNode> = None;
        let mut is_hardlink = false;

        let mut ret = self.create_object(
            inode_id,
            parent,
            &dentry.name,
            path,
            &mut node,
            &mut is_hardlink,
        );

        if ret.is_ok() && !is_hardlink {
            if let Some(n) = node {
                ret = self.apply_metadata(n, inode, path);
            }
        }

        if ret.is_ok() {
            if let Some(short) = dentry.short_name.as_ref().filter(|n| !n.is_empty()) {
                ret = self.apply_short_name(
                    short,
                    is_hardlink,
                    path,
                    parent_path,
                    &mut node,
                    &mut parent_node,
                );
            }
        }

        if let Some(n) = node.take() {
            close_keep(self.volume, n, path, &mut ret);
        }
        if let Some(p) = parent_node.take() {
            close_keep(self.volume, p, parent_path, &mut ret);
        }
        ret
    }

    /// Creates the on-volume object for one dentry: a directory, a reparse
    /// point, a fresh regular file with all of its streams, or a hard link
    /// to an already-extracted name of the same inode.
    fn create_object(
        &mut self,
        inode_id: InodeId,
        parent: NtfsNode,
        name: &str,
        path: &str,
        node: &mut Option<NtfsNode>,
        is_hardlink: &mut bool,
    ) -> Result<()> {
        let tree = self.tree;
        let inode = tree.inode(inode_id);

        if inode.is_reparse_point() {
            let n = ntfs_op(
                self.volume.create(parent, name, NtfsCreateKind::Regular),
                "Creating reparse point",
                path,
            )?;
            *node = Some(n);
            return self.write_reparse(n, inode, path);
        }

        if inode.is_directory() {
            let n = ntfs_op(
                self.volume.create(parent, name, NtfsCreateKind::Directory),
                "Creating directory",
                path,
            )?;
            *node = Some(n);
            return Ok(());
        }

        if let Some(existing) = self.extracted.get(&inode_id).cloned() {
            let target = ntfs_op(
                self.volume.resolve(&existing),
                "Opening link target",
                &existing,
            )?;
            *node = Some(target);
            ntfs_op(self.volume.link(target, parent, name), "Creating hard link", path)?;
            *is_hardlink = true;
            return Ok(());
        }

        let n = ntfs_op(
            self.volume.create(parent, name, NtfsCreateKind::Regular),
            "Creating file",
            path,
        )?;
        *node = Some(n);
        self.extracted.insert(inode_id, path.to_string());
        self.write_streams(n, inode, path)
    }

    /// Copies the unnamed stream and every ADS onto the volume, verifying
    /// each stream's digest as it goes.
    fn write_streams(&mut self, node: NtfsNode, inode: &Inode, path: &str) -> Result<()> {
        let mut streams: Vec<(String, Option<Sha1Hash>)> = vec![(String::new(), inode.unnamed)];
        for ads in &inode.ads {
            streams.push((ads.name.clone(), ads.hash));
        }

        let volume: &mut dyn NtfsVolume = &mut *self.volume;
        let table = self.table;
        for (stream_name, hash) in streams {
            let attr = ntfs_op(
                volume.attr_open(node, &stream_name),
                "Opening attribute",
                path,
            )?;
            let result = match hash.and_then(|h| table.lookup(&h)) {
                None => {
                    // A zero-length stream: created by the open itself.
                    if let Some(h) = hash {
                        log::warn!("Stream {h} of {path} is missing from the lookup table");
                    }
                    Ok(())
                }
                Some(lte) => resource::copy_verified(lte, |offset, chunk| {
                    pwrite_all(volume, attr, offset, chunk, path)
                }),
            };
            volume.attr_close(attr);
            result?;
        }
        Ok(())
    }

    fn write_reparse(&mut self, node: NtfsNode, inode: &Inode, path: &str) -> Result<()> {
        let body = match inode.unnamed.and_then(|h| self.table.lookup(&h)) {
            Some(lte) => resource::read_to_vec(lte)?,
            None => Vec::new(),
        };
        if body.len() >= REPARSE_POINT_MAX_DATA_SIZE {
            return Err(Error::InvalidDentry(format!(
                "reparse data of {path} is {} bytes, above the {} byte limit",
                body.len(),
                REPARSE_POINT_MAX_DATA_SIZE - 1
            )));
        }
        let tag = inode.reparse_tag.ok_or_else(|| {
            Error::InvalidDentry(format!("{path} is a reparse point without a reparse tag"))
        })?;
        let buffer = ReparseBuffer::new(tag, body).to_bytes()?;
        ntfs_op(
            self.volume.set_reparse_data(node, &buffer),
            "Setting reparse data",
            path,
        )
    }

    fn apply_metadata(&mut self, node: NtfsNode, inode: &Inode, path: &str) -> Result<()> {
        ntfs_op(
            self.volume.set_attributes(node, inode.attributes.as_u32()),
            "Setting attributes",
            path,
        )?;
        if let Some(sid) = inode.security_id {
            let descriptor = self.sd_set.get(sid).ok_or_else(|| {
                Error::InvalidDentry(format!("security ID {sid} is out of range"))
            })?;
            ntfs_op(
                self.volume
                    .set_security(node, SecurityInformation::all(), descriptor),
                "Setting security descriptor",
                path,
            )?;
        }
        Ok(())
    }

    /// Binds an 8.3 alias. When the long name was hard-linked rather than
    /// created, both inodes are closed and re-resolved first; the NTFS
    /// helper would otherwise tear them down in the wrong order.
    fn apply_short_name(
        &mut self,
        short: &[u16],
        is_hardlink: bool,
        path: &str,
        parent_path: &str,
        node: &mut Option<NtfsNode>,
        parent_node: &mut Option<NtfsNode>,
    ) -> Result<()> {
        let short_str = String::from_utf16(short)
            .map_err(|_| Error::InvalidUtf8(format!("short name of {path}").into()))?;

        if is_hardlink {
            let mut ret = Ok(());
            if let Some(n) = node.take() {
                close_keep(self.volume, n, path, &mut ret);
            }
            if let Some(p) = parent_node.take() {
                close_keep(self.volume, p, parent_path, &mut ret);
            }
            ret?;
            let parent = ntfs_op(
                self.volume.resolve(parent_path),
                "Reopening directory",
                parent_path,
            )?;
            *parent_node = Some(parent);
            let child = ntfs_op(self.volume.resolve(path), "Reopening inode", path)?;
            *node = Some(child);
            return ntfs_op(
                self.volume.set_dos_name(child, parent, &short_str),
                "Setting DOS name",
                path,
            );
        }

        match (*node, *parent_node) {
            (Some(child), Some(parent)) => ntfs_op(
                self.volume.set_dos_name(child, parent, &short_str),
                "Setting DOS name",
                path,
            ),
            _ => Err(Error::InvalidDentry(format!(
                "{path} has a short name but no open inode"
            ))),
        }
    }

    fn apply_times(&mut self, id: DentryId) -> Result<()> {
        let tree = self.tree;
        let path = full_path(tree, id)?;
        let inode = tree.inode_of(id);
        let node = ntfs_op(self.volume.resolve(path), "Opening inode", path)?;
        let mut ret = ntfs_op(
            self.volume.set_times(
                node,
                inode.creation_time,
                inode.last_write_time,
                inode.last_access_time,
            ),
            "Setting timestamps",
            path,
        );
        close_keep(self.volume, node, path, &mut ret);
        ret
    }
}

fn pwrite_all(
    volume: &mut dyn NtfsVolume,
    attr: NtfsAttr,
    offset: u64,
    data: &[u8],
    path: &str,
) -> Result<()> {
    let mut written = 0usize;
    while written < data.len() {
        let n = ntfs_op(
            volume.attr_pwrite(attr, offset + written as u64, &data[written..]),
            "Writing stream data",
            path,
        )?;
        if n == 0 {
            return Err(Error::Ntfs(io::Error::new(
                io::ErrorKind::WriteZero,
                "attribute write made no progress",
            )));
        }
        written += n;
    }
    Ok(())
}
