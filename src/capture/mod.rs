//! The capture engine: builds one branch of an image per capture source and
//! assembles branches into a single dentry tree.

pub mod attach;
pub mod fs;
pub mod source;
#[cfg(windows)]
pub mod win32;

pub use attach::ImageSource;
pub use fs::DiskSource;
pub use source::{CaptureSource, ReparseData, SourceKind, SourceMeta, StreamInfo};
#[cfg(windows)]
pub use win32::Win32Source;

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::config::CaptureConfig;
use crate::error::Error;
use crate::image::{AdsEntry, DentryId, ImageTree, Inode, InodeId};
use crate::lookup::{LookupTable, LookupTableEntry};
use crate::ondisk::{Sha1Hash, StreamHasher, WIM_CHUNK_SIZE};
use crate::pattern;
use crate::progress::{Progress, ProgressEvent};
use crate::security::SecurityDescriptorSet;
use crate::wim::AddImageFlags;
use crate::Result;

pub(crate) struct CaptureContext<'a, 'p, 'q> {
    pub source: &'a mut dyn CaptureSource,
    pub table: &'a mut LookupTable,
    pub sd_set: &'a mut SecurityDescriptorSet,
    pub config: &'a CaptureConfig,
    pub flags: AddImageFlags,
    pub progress: &'a mut Progress<'p, 'q>,
}

/// Builds one branch from one source path. Returns `None` when the branch
/// root itself is excluded by the capture configuration (fatal if this
/// source is the image root).
pub(crate) fn build_dentry_tree(
    ctx: &mut CaptureContext,
    tree: &mut ImageTree,
    disk_path: &Path,
) -> Result<Option<DentryId>> {
    let is_root = ctx.flags.contains(AddImageFlags::ROOT);
    // Source inode number -> image inode, for hard-link consolidation
    // within this branch.
    let mut inode_map = HashMap::new();
    capture_tree(ctx, tree, disk_path, is_root, &mut inode_map)
}

fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::InvalidUtf8(path.as_os_str().to_os_string()))
}

fn capture_tree(
    ctx: &mut CaptureContext,
    tree: &mut ImageTree,
    disk_path: &Path,
    is_root: bool,
    inode_map: &mut HashMap<u64, InodeId>,
) -> Result<Option<DentryId>> {
    let canonical = pattern::canonicalize(path_to_str(disk_path)?);
    let excluded = ctx.config.exclude_path(&canonical, true);
    if ctx.flags.contains(AddImageFlags::VERBOSE) {
        if excluded {
            log::info!("Excluding {canonical} from capture");
        } else {
            log::info!("Scanning {canonical}");
        }
    }
    ctx.progress.emit(ProgressEvent::ScanDentry {
        path: canonical.clone(),
        excluded,
    });
    if excluded {
        if is_root {
            return Err(Error::InvalidCaptureConfig(
                "the capture root itself is excluded".to_string(),
            ));
        }
        return Ok(None);
    }

    let meta = ctx.source.stat(disk_path)?;
    if let SourceKind::Special(what) = meta.kind {
        log::error!("{canonical} is a {what}");
        return Err(Error::SpecialFile(disk_path.to_path_buf()));
    }

    let name = match disk_path.file_name() {
        None => String::new(),
        Some(os) => os
            .to_str()
            .ok_or_else(|| Error::InvalidUtf8(os.to_os_string()))?
            .to_string(),
    };

    let is_reparse = matches!(meta.kind, SourceKind::Symlink) || meta.attributes.reparse_point();

    // Another name for an inode this branch has already captured: join its
    // hard-link group instead of re-reading the content.
    let consolidate = matches!(meta.kind, SourceKind::Regular) && !is_reparse
        && meta.nlink > 1
        && meta.ino != 0;
    if consolidate {
        if let Some(&existing) = inode_map.get(&meta.ino) {
            let dentry = tree.alloc_dentry(name, existing);
            if let Some(hash) = tree.inode(existing).unnamed {
                ctx.table.reference(&hash);
            }
            if let Some(short) = ctx.source.read_short_name(disk_path)? {
                tree.dentry_mut(dentry).short_name = Some(short);
            }
            return Ok(Some(dentry));
        }
    }

    let mut inode = Inode::new(meta.attributes).with_times(
        meta.creation_time,
        meta.last_write_time,
        meta.last_access_time,
    );
    inode.ino = meta.ino;
    inode.unix_data = meta.unix_data;
    let inode_id = tree.new_inode(inode);
    let dentry = tree.alloc_dentry(name, inode_id);
    if consolidate {
        inode_map.insert(meta.ino, inode_id);
    }

    if is_reparse {
        capture_reparse(ctx, tree, inode_id, disk_path)?;
    } else if matches!(meta.kind, SourceKind::Directory) {
        for child_name in ctx.source.read_dir(disk_path)? {
            if child_name == "." || child_name == ".." {
                continue;
            }
            let child_path = disk_path.join(&child_name);
            if let Some(child) = capture_tree(ctx, tree, &child_path, false, inode_map)? {
                tree.add_child(dentry, child)?;
            }
        }
    } else {
        capture_streams(ctx, tree, inode_id, disk_path, &meta)?;
    }

    if let Some(short) = ctx.source.read_short_name(disk_path)? {
        tree.dentry_mut(dentry).short_name = Some(short);
    }
    if let Some(descriptor) = ctx.source.read_security(disk_path)? {
        let id = ctx.sd_set.add(&descriptor);
        tree.inode_mut(inode_id).security_id = Some(id);
    }
    Ok(Some(dentry))
}

/// Captures the reparse payload as the inode's unnamed stream and fixes the
/// attribute bits.
fn capture_reparse(
    ctx: &mut CaptureContext,
    tree: &mut ImageTree,
    inode_id: InodeId,
    disk_path: &Path,
) -> Result<()> {
    let data = ctx.source.read_reparse(disk_path)?;
    {
        let inode = tree.inode_mut(inode_id);
        inode.reparse_tag = Some(data.tag);
        let mut attrs = inode.attributes;
        attrs.set_reparse_point(true);
        attrs.set_normal(false);
        if data.is_directory {
            attrs.set_directory(true);
        }
        inode.attributes = attrs;
    }
    if !data.body.is_empty() {
        let hash = Sha1Hash::of(&data.body);
        let body = data.body;
        ctx.table
            .add_or_ref(hash, move || LookupTableEntry::new_attached(hash, body));
        tree.inode_mut(inode_id).unnamed = Some(hash);
    }
    Ok(())
}

/// Hashes every `$DATA` stream and records it in the content store. Empty
/// streams own no lookup-table entry.
fn capture_streams(
    ctx: &mut CaptureContext,
    tree: &mut ImageTree,
    inode_id: InodeId,
    disk_path: &Path,
    meta: &SourceMeta,
) -> Result<()> {
    for stream in ctx.source.enumerate_streams(disk_path, meta)? {
        let mut reader = ctx.source.open_stream(disk_path, &stream)?;
        let mut hasher = StreamHasher::new();
        let mut buf = vec![0u8; WIM_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(|source| Error::Read {
                path: disk_path.to_path_buf(),
                source,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        drop(reader);
        let (hash, size) = hasher.finish();

        if size == 0 {
            if let Some(name) = stream.name {
                tree.inode_mut(inode_id)
                    .ads
                    .push(AdsEntry { name, hash: None });
            }
            continue;
        }

        let location = ctx.source.stream_location(disk_path, &stream);
        ctx.table
            .add_or_ref(hash, || LookupTableEntry::with_location(hash, location, size));
        match stream.name {
            None => tree.inode_mut(inode_id).unnamed = Some(hash),
            Some(name) => tree.inode_mut(inode_id).ads.push(AdsEntry {
                name,
                hash: Some(hash),
            }),
        }
    }
    Ok(())
}
