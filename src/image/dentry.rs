use std::collections::BTreeMap;

use crate::error::Error;
use crate::image::inode::{Inode, InodeId};
use crate::lookup::LookupTable;
use crate::Result;

/// Index of a dentry within one image's tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DentryId(pub(crate) u32);

/// Child-map key with NTFS name collation: names compare case-insensitively,
/// and two names that fold equal collide.
#[derive(Debug, Clone)]
pub struct NameKey(String);

impl NameKey {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().flat_map(char::to_uppercase)
    }
}

impl Ord for NameKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.folded().cmp(other.folded())
    }
}

impl PartialOrd for NameKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NameKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for NameKey {}

/// One node of the directory tree: a name bound to an inode.
#[derive(Debug)]
pub struct Dentry {
    pub name: String,
    /// Optional 8.3 alias, kept as the UTF-16 the filesystem reported.
    pub short_name: Option<Vec<u16>>,
    pub parent: Option<DentryId>,
    pub inode: InodeId,
    children: BTreeMap<NameKey, DentryId>,
    full_path: Option<String>,
}

impl Dentry {
    pub fn full_path(&self) -> Option<&str> {
        self.full_path.as_deref()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Arena-allocated dentry tree plus the inode table it resolves into.
///
/// The root dentry always exists, has an empty name, and starts out as a
/// plain directory so branches can be attached beneath (or onto) it.
#[derive(Debug)]
pub struct ImageTree {
    dentries: Vec<Dentry>,
    inodes: Vec<Inode>,
    /// True until a captured branch is adopted as the image root; the
    /// initial root is a synthetic placeholder directory.
    pub(crate) root_is_filler: bool,
}

impl ImageTree {
    pub fn new() -> Self {
        let mut tree = Self {
            dentries: Vec::new(),
            inodes: Vec::new(),
            root_is_filler: true,
        };
        let root_inode = tree.new_inode(Inode::new(
            crate::ondisk::FileAttributes::directory_only(),
        ));
        tree.alloc_dentry(String::new(), root_inode);
        tree
    }

    pub fn root(&self) -> DentryId {
        DentryId(0)
    }

    pub fn dentry(&self, id: DentryId) -> &Dentry {
        &self.dentries[id.0 as usize]
    }

    pub fn dentry_mut(&mut self, id: DentryId) -> &mut Dentry {
        &mut self.dentries[id.0 as usize]
    }

    pub fn inode(&self, id: InodeId) -> &Inode {
        &self.inodes[id.0 as usize]
    }

    pub fn inode_mut(&mut self, id: InodeId) -> &mut Inode {
        &mut self.inodes[id.0 as usize]
    }

    pub fn inode_of(&self, dentry: DentryId) -> &Inode {
        self.inode(self.dentry(dentry).inode)
    }

    pub fn inode_of_mut(&mut self, dentry: DentryId) -> &mut Inode {
        let inode = self.dentry(dentry).inode;
        self.inode_mut(inode)
    }

    pub fn inodes(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.iter()
    }

    pub fn new_inode(&mut self, inode: Inode) -> InodeId {
        let id = InodeId(self.inodes.len() as u32);
        self.inodes.push(inode);
        id
    }

    /// Allocates a detached dentry bound to `inode` and registers it in the
    /// inode's link group.
    pub fn alloc_dentry(&mut self, name: String, inode: InodeId) -> DentryId {
        let id = DentryId(self.dentries.len() as u32);
        self.dentries.push(Dentry {
            name,
            short_name: None,
            parent: None,
            inode,
            children: BTreeMap::new(),
            full_path: None,
        });
        self.inode_mut(inode).links.push(id);
        id
    }

    pub fn child_by_name(&self, parent: DentryId, name: &str) -> Option<DentryId> {
        self.dentry(parent).children.get(&NameKey::new(name)).copied()
    }

    /// Attaches `child` under `parent`. Two names that compare equal under
    /// NTFS collation cannot coexist in one directory.
    pub fn add_child(&mut self, parent: DentryId, child: DentryId) -> Result<()> {
        let key = NameKey::new(&self.dentry(child).name);
        if self.dentry(parent).children.contains_key(&key) {
            return Err(Error::InvalidDentry(format!(
                "duplicate name {:?} in directory",
                key.as_str()
            )));
        }
        self.dentry_mut(parent).children.insert(key, child);
        self.dentry_mut(child).parent = Some(parent);
        Ok(())
    }

    /// Detaches a child by name, leaving the dentry itself in the arena.
    pub fn unlink_child(&mut self, parent: DentryId, name: &str) -> Option<DentryId> {
        let removed = self.dentry_mut(parent).children.remove(&NameKey::new(name));
        if let Some(id) = removed {
            self.dentry_mut(id).parent = None;
        }
        removed
    }

    /// Removes `dentry` from its inode's link group (used when a branch root
    /// dentry is dissolved into an existing directory).
    pub(crate) fn remove_link(&mut self, dentry: DentryId) {
        let inode = self.dentry(dentry).inode;
        self.inode_mut(inode).links.retain(|&d| d != dentry);
    }

    /// Rebinds the placeholder root to `branch`'s inode and takes over its
    /// children. Only valid while the root is still the pristine filler.
    pub(crate) fn adopt_root(&mut self, branch: DentryId) -> Result<()> {
        let root = self.root();
        debug_assert!(self.root_is_filler && !self.dentry(root).has_children());
        let old_inode = self.dentry(root).inode;
        let new_inode = self.dentry(branch).inode;
        self.inode_mut(old_inode).links.retain(|&d| d != root);
        self.inode_mut(new_inode).links.retain(|&d| d != branch);
        self.inode_mut(new_inode).links.push(root);
        self.dentry_mut(root).inode = new_inode;

        for child in self.children(branch) {
            let name = self.dentry(child).name.clone();
            self.unlink_child(branch, &name);
            self.add_child(root, child)?;
        }
        self.root_is_filler = false;
        Ok(())
    }

    /// Children of `parent` in collation order.
    pub fn children(&self, parent: DentryId) -> Vec<DentryId> {
        self.dentry(parent).children.values().copied().collect()
    }

    /// All reachable dentries, parents before children.
    pub fn pre_order(&self) -> Vec<DentryId> {
        self.pre_order_from(self.root())
    }

    pub fn pre_order_from(&self, start: DentryId) -> Vec<DentryId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            // Reversed so the leftmost child is visited first.
            for child in self.children(id).into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// All reachable dentries, children before parents.
    pub fn post_order(&self) -> Vec<DentryId> {
        let mut order = self.pre_order();
        order.reverse();
        order
    }

    /// Computes and caches the full path of every reachable dentry. The root
    /// is `/`; children append `/name`.
    pub fn compute_full_paths(&mut self) {
        for id in self.pre_order() {
            let path = match self.dentry(id).parent {
                None => "/".to_string(),
                Some(parent) => {
                    let parent_path = self
                        .dentry(parent)
                        .full_path()
                        .unwrap_or("/")
                        .trim_end_matches('/');
                    format!("{}/{}", parent_path, self.dentry(id).name)
                }
            };
            self.dentry_mut(id).full_path = Some(path);
        }
    }

    /// Assigns fresh inode numbers, one per link group, starting at 1.
    pub fn renumber_inodes(&mut self) {
        for (n, inode) in self.inodes.iter_mut().enumerate() {
            inode.ino = n as u64 + 1;
        }
    }

    /// Drops every stream reference held by this tree: once per dentry for
    /// the unnamed stream of its inode, once per ADS entry. Used when a
    /// partially built image is torn down.
    pub fn release_streams(&self, table: &mut LookupTable) {
        for inode in &self.inodes {
            if let Some(hash) = inode.unnamed {
                for _ in 0..inode.links.len() {
                    table.unref(&hash);
                }
            }
            for ads in &inode.ads {
                if let Some(hash) = ads.hash {
                    table.unref(&hash);
                }
            }
        }
    }

    pub fn dentry_count(&self) -> usize {
        self.dentries.len()
    }
}

impl Default for ImageTree {
    fn default() -> Self {
        Self::new()
    }
}
