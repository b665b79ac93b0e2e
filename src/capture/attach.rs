//! Multi-source assembly: attaching captured branches under their target
//! paths, synthesising filler directories and overlaying into existing ones.

use std::path::PathBuf;

use crate::error::Error;
use crate::image::{DentryId, ImageTree, Inode};
use crate::ondisk::{FileAttributes, FileTime};
use crate::pattern;
use crate::Result;

/// One capture source: a filesystem path and the image path it lands at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub path: PathBuf,
    /// Target inside the image; canonicalised so the image root is `""`.
    pub target: String,
}

impl ImageSource {
    pub fn new(path: impl Into<PathBuf>, target: &str) -> Self {
        Self {
            path: path.into(),
            target: pattern::canonicalize_target(target),
        }
    }
}

/// Canonicalises every target and sorts sources lexicographically by target,
/// so a source targeting `a` is attached before one targeting `a/b`. The
/// sort is stable: duplicate targets keep their given order and overlay.
/// Already-sorted input is left untouched.
pub fn sort_sources(sources: &mut [ImageSource]) {
    for source in sources.iter_mut() {
        source.target = pattern::canonicalize_target(&source.target);
    }
    sources.sort_by(|a, b| a.target.cmp(&b.target));
}

/// Synthesises a directory dentry for a target-path component that exists in
/// no capture source. Filler inodes carry the current time and number 0
/// until the image-wide renumbering pass.
fn new_filler_directory(tree: &mut ImageTree, name: &str) -> DentryId {
    let now = FileTime::now();
    let inode = Inode::new(FileAttributes::directory_only()).with_times(now, now, now);
    let inode_id = tree.new_inode(inode);
    tree.alloc_dentry(name.to_string(), inode_id)
}

/// Transfers every child of `branch` into the existing directory `existing`.
/// A same-named child on both sides is a collision.
fn do_overlay(tree: &mut ImageTree, existing: DentryId, branch: DentryId) -> Result<()> {
    if !tree.inode_of(existing).is_directory() {
        return Err(Error::InvalidOverlay(format!(
            "cannot overlay a branch onto non-directory {:?}",
            tree.dentry(existing).name
        )));
    }
    if !tree.inode_of(branch).is_directory() {
        return Err(Error::InvalidOverlay(format!(
            "cannot overlay non-directory {:?} onto an existing directory",
            tree.dentry(branch).name
        )));
    }
    for child in tree.children(branch) {
        let name = tree.dentry(child).name.clone();
        if tree.child_by_name(existing, &name).is_some() {
            return Err(Error::InvalidOverlay(format!(
                "both sources contain a child named {name:?}"
            )));
        }
        tree.unlink_child(branch, &name);
        tree.add_child(existing, child)?;
    }
    // The branch root dentry is dissolved; drop it from its link group.
    tree.remove_link(branch);
    Ok(())
}

/// Attaches one captured branch under `target` (already canonicalised; `""`
/// is the image root). Missing intermediate directories are synthesised;
/// attaching onto an existing directory overlays into it.
pub(crate) fn attach_branch(tree: &mut ImageTree, branch: DentryId, target: &str) -> Result<()> {
    if target.is_empty() {
        let root = tree.root();
        if !tree.inode_of(branch).is_directory() {
            // A lone file captured into the image root stays a child of it.
            let name = tree.dentry(branch).name.clone();
            if tree.child_by_name(root, &name).is_some() {
                return Err(Error::InvalidOverlay(format!(
                    "the image root already contains {name:?}"
                )));
            }
            return tree.add_child(root, branch);
        }
        if tree.root_is_filler && !tree.dentry(root).has_children() {
            return tree.adopt_root(branch);
        }
        return do_overlay(tree, root, branch);
    }

    let components: Vec<&str> = target.split('/').collect();
    let mut parent = tree.root();
    for (i, component) in components.iter().enumerate() {
        let last = i == components.len() - 1;
        match tree.child_by_name(parent, component) {
            Some(existing) => {
                if last {
                    return do_overlay(tree, existing, branch);
                }
                if !tree.inode_of(existing).is_directory() {
                    return Err(Error::InvalidOverlay(format!(
                        "target component {component:?} is not a directory"
                    )));
                }
                parent = existing;
            }
            None => {
                if last {
                    tree.dentry_mut(branch).name = component.to_string();
                    return tree.add_child(parent, branch);
                }
                let filler = new_filler_directory(tree, component);
                tree.add_child(parent, filler)?;
                parent = filler;
            }
        }
    }
    Ok(())
}
